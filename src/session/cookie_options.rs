use cookie::SameSite;
use cookie::time::Duration;
use tower_cookies::Cookie;

use crate::SessionId;

/// How [`SessionLayer`](crate::SessionLayer) carries the [`SessionId`] in a cookie.
///
/// The cookie value is the id itself. `max_age` doubles as the session idle timeout:
/// the layer saves sessions to expire `max_age` seconds after the request, so the
/// backend entry and the cookie expire together.
///
/// # Example
///
/// ```rust
/// use sessionkv::CookieOptions;
///
/// // A 30 minute session, scoped to the `/app` subtree.
/// let cookie_options = CookieOptions::build()
///         .name("app_session")
///         .same_site(cookie::SameSite::Strict)
///         .max_age(30 * 60)
///         .path("/app");
/// ```
#[derive(Clone, Copy, Debug)]
pub struct CookieOptions {
    pub http_only: bool,
    /// Cookie name the session id is read from and written to.
    pub name: &'static str,
    pub domain: Option<&'static str>,
    pub path: Option<&'static str>,
    pub same_site: SameSite,
    pub secure: bool,
    /// Seconds until both the cookie and the stored session expire.
    pub max_age: i64,
}

impl Default for CookieOptions {
    /// A `session_id` cookie for the whole site: `HttpOnly`, `Secure`, `SameSite=Lax`,
    /// one hour.
    fn default() -> Self {
        Self {
            http_only: true,
            name: "session_id",
            domain: None,
            path: Some("/"),
            same_site: SameSite::Lax,
            secure: true,
            max_age: 60 * 60,
        }
    }
}

impl CookieOptions {
    pub fn build() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Keeps the session id out of reach of client-side scripts.
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    /// Only send the session id over HTTPS.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn domain(mut self, domain: &'static str) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Limits the session to requests under `path`.
    pub fn path(mut self, path: &'static str) -> Self {
        self.path = Some(path);
        self
    }

    /// Sets the cookie lifetime and session idle timeout, in seconds.
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    pub(crate) fn session_cookie(&self, id: &SessionId) -> Cookie<'static> {
        let mut cookie = Cookie::build((self.name, id.to_string()))
            .secure(self.secure)
            .http_only(self.http_only)
            .same_site(self.same_site)
            .max_age(Duration::seconds(self.max_age));

        if let Some(domain) = self.domain {
            cookie = cookie.domain(domain);
        }
        if let Some(path) = self.path {
            cookie = cookie.path(path);
        }

        cookie.build()
    }

    /// A cookie matching the session cookie's name, domain and path, for removal.
    pub(crate) fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build(self.name);

        if let Some(domain) = self.domain {
            cookie = cookie.domain(domain);
        }
        if let Some(path) = self.path {
            cookie = cookie.path(path);
        }

        cookie.build()
    }
}
