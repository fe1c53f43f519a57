use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::store::Error;

/// An opaque, non-empty session token.
///
/// Ids come from the caller (usually a cookie) and are used verbatim as the suffix
/// of the backend key. Their content is never interpreted.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self, Error> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidId);
        }

        Ok(Self(id))
    }

    /// Generates a fresh id from 16 random bytes, encoded as URL-safe base64.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(BASE64_URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
