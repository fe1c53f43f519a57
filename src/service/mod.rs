//! Session management middleware for tower applications.
//!
//! This module provides [`SessionLayer`], which opens a [`SessionHandle`] for every
//! request and closes it once the inner service has responded.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::{Request, Response, StatusCode};
use tower::{Layer, Service};
use tower_cookies::Cookies;

use crate::session::{HandleOptions, HandleState, SavePolicy, Session, SessionHandle};
use crate::store::{Backend, SessionStore};
use crate::{CookieOptions, SessionId};

/// A Tower Middleware to use [`Session`].
///
/// For each request it reads the session id from the cookie (or generates one),
/// opens the session, makes it available as a [`Session`] request extension and,
/// once the inner service has produced a response, saves it and updates the cookie.
#[derive(Clone, Debug)]
pub struct SessionService<S, B: Backend> {
    inner: S,
    store: SessionStore<B>,
    cookie_options: Arc<CookieOptions>,
    handle_options: HandleOptions,
}

impl<ReqBody, ResBody, S, B> Service<Request<ReqBody>> for SessionService<S, B>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
    B: Backend,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let Some(cookies) = req.extensions().get::<Cookies>().cloned() else {
            tracing::error!("cookies not found in the request extensions");
            return Box::pin(async { Ok(internal_error()) });
        };

        let id = cookies
            .get(self.cookie_options.name)
            .and_then(|cookie| {
                SessionId::new(cookie.value())
                    .map_err(|err| tracing::warn!(err = %err, "ignoring malformed session cookie"))
                    .ok()
            })
            .unwrap_or_else(SessionId::generate);

        let store = self.store.clone();
        let cookie_options = Arc::clone(&self.cookie_options);
        let handle_options = self.handle_options;

        // The ready service is the one that must handle this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let handle = match SessionHandle::open(&store, id, handle_options).await {
                Ok(handle) => Arc::new(handle),
                Err(err) => {
                    tracing::error!(err = %err, "failed to open session");
                    return Ok(internal_error());
                }
            };

            req.extensions_mut().insert(Session::new(Arc::clone(&handle)));

            let res = match inner.call(req).await {
                Ok(res) => res,
                Err(err) => {
                    let _ = handle.discard();
                    return Err(err);
                }
            };

            let deleted = match handle.state() {
                HandleState::Released => {
                    tracing::debug!(session_id = %handle.id(), "session already released by the handler");
                    return Ok(res);
                }
                state => state == HandleState::Discarded,
            };
            match handle.close().await {
                Ok(saved) => {
                    if deleted {
                        cookies.remove(cookie_options.removal_cookie());
                    } else if saved {
                        cookies.add(cookie_options.session_cookie(handle.id()));
                    }
                    Ok(res)
                }
                Err(err) => {
                    tracing::error!(err = %err, "failed to close session");
                    Ok(internal_error())
                }
            }
        })
    }
}

/// Layer to apply [`SessionService`] middleware.
///
/// `CookieManagerLayer` from `tower-cookies` must wrap this layer, i.e. be added
/// after it.
///
/// # Example
///
/// ```rust
/// use axum::Router;
/// use sessionkv::{CookieOptions, SavePolicy, SessionLayer};
/// use sessionkv::store::SessionStore;
/// use sessionkv::store::memory::MemoryBackend;
/// use tower_cookies::CookieManagerLayer;
///
/// let cookie_options = CookieOptions::build()
///         .name("test_sess")
///         .http_only(true)
///         .same_site(cookie::SameSite::Lax)
///         .secure(true)
///         .max_age(30 * 60)
///         .path("/");
///
/// let store = SessionStore::new(MemoryBackend::new());
/// let session_layer = SessionLayer::new(store)
///     .with_cookie_options(cookie_options)
///     .with_save_policy(SavePolicy::Always);
///
/// let _: Router<()> = Router::new()
///     .layer(session_layer)
///     .layer(CookieManagerLayer::new());
/// ```
#[derive(Clone, Debug)]
pub struct SessionLayer<B: Backend> {
    store: SessionStore<B>,
    cookie_options: CookieOptions,
    handle_options: HandleOptions,
}

impl<B> SessionLayer<B>
where
    B: Backend,
{
    /// Create a new session layer with default cookie options.
    pub fn new(store: SessionStore<B>) -> Self {
        let cookie_options = CookieOptions::default();
        Self {
            store,
            cookie_options,
            handle_options: HandleOptions::build()
                .idle_timeout(time::Duration::seconds(cookie_options.max_age)),
        }
    }

    /// Set the cookie options. `max_age` also becomes the session idle timeout.
    pub fn with_cookie_options(mut self, options: CookieOptions) -> Self {
        self.cookie_options = options;
        self.handle_options.idle_timeout = time::Duration::seconds(options.max_age);
        self
    }

    pub fn with_save_policy(mut self, policy: SavePolicy) -> Self {
        self.handle_options.save_policy = policy;
        self
    }

    /// Fail requests that wait longer than `timeout` for their session.
    pub fn with_lock_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.handle_options.lock_timeout = Some(timeout);
        self
    }
}

impl<S, B> Layer<S> for SessionLayer<B>
where
    B: Backend,
{
    type Service = SessionService<S, B>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionService {
            inner,
            store: self.store.clone(),
            cookie_options: Arc::new(self.cookie_options),
            handle_options: self.handle_options,
        }
    }
}

fn internal_error<B: Default>() -> Response<B> {
    let mut res = Response::new(B::default());
    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    res
}
