use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use fred::clients::{Client, Pool};
use fred::prelude::{Builder, ClientLike, Config, Expiration, KeysInterface};

use crate::store::{Backend, Error};

/// Connection settings for [`RedisBackend::connect`].
///
/// The values are passed through to the client unchanged.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: u8,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
        }
    }
}

impl RedisConfig {
    pub fn build() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn db(mut self, db: u8) -> Self {
        self.db = db;
        self
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// A redis [`Backend`].
///
/// Each session is a plain string key written with `SET ... PX`, so expiry is
/// handled entirely by redis.
#[derive(Clone, Debug)]
pub struct RedisBackend<C: KeysInterface + ClientLike + Clone + Send + Sync = Pool> {
    client: Arc<C>,
}

impl<C> RedisBackend<C>
where
    C: KeysInterface + ClientLike + Clone + Send + Sync,
{
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

impl RedisBackend<Client> {
    /// Creates a client for `config` and waits until it is connected.
    #[tracing::instrument(name = "connecting to redis", skip(config), fields(url = %config.url()))]
    pub async fn connect(config: &RedisConfig) -> Result<Self, Error> {
        let client = Builder::from_config(Config::from_url(&config.url())?).build()?;
        client.init().await.map_err(|err| {
            tracing::error!(err = %err, "failed to connect to redis");
            err
        })?;

        Ok(Self::new(Arc::new(client)))
    }
}

impl<C> Backend for RedisBackend<C>
where
    C: KeysInterface + ClientLike + Clone + Debug + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.client.get::<Option<Vec<u8>>, _>(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Error> {
        let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let _: () = self
            .client
            .set(key, value.as_slice(), Some(Expiration::PX(millis)), None, false)
            .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let deleted: i64 = self.client.del(key).await?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, Error> {
        let found: i64 = self.client.exists(key).await?;
        Ok(found > 0)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let pattern = format!("{}*", escape_glob(prefix));
        Ok(self
            .client
            .custom::<Vec<String>, _>(fred::cmd!("KEYS"), vec![pattern])
            .await?)
    }
}

/// Escapes the characters redis treats as glob syntax in `KEYS` patterns.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
