//! # sessionkv: pluggable key-value session storage
//!
//! `sessionkv` stores per-user session payloads in a key-value backend with
//! expiration, and serializes concurrent access to the same session so that two
//! requests for one session never interleave their load-mutate-save cycles.
//!
//! The pieces are:
//!
//! - A [`Backend`](store::Backend): byte-oriented get/set/delete with a TTL, plus
//!   prefix listing. [`MemoryBackend`](store::memory::MemoryBackend) ships by default,
//!   `RedisBackend` behind the `redis-store` feature.
//! - The [codec](store::codec), which turns a [`Payload`](store::Payload) into
//!   versioned bytes and back.
//! - A [`SessionStore`](store::SessionStore), which combines a backend, a key prefix
//!   and a per-session [`LockRegistry`](store::LockRegistry).
//! - A [`SessionHandle`], which holds a session's lock from open to close.
//!
//! # Quick Start
//!
//! ```rust
//! use sessionkv::{HandleOptions, SessionHandle, SessionId};
//! use sessionkv::store::SessionStore;
//! use sessionkv::store::memory::MemoryBackend;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), sessionkv::Error> {
//! let store = SessionStore::new(MemoryBackend::new()).with_prefix("app:session:");
//! let id: SessionId = "abc123".parse()?;
//!
//! let handle = SessionHandle::open(&store, id.clone(), HandleOptions::default()).await?;
//! handle.insert("user", "alice")?;
//! handle.close().await?;
//!
//! let handle = SessionHandle::open(&store, id, HandleOptions::default()).await?;
//! assert_eq!(handle.get::<String>("user")?.as_deref(), Some("alice"));
//! handle.discard()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Axum
//!
//! With the `axum` feature (enabled by default), [`SessionLayer`] opens a handle for
//! every request from the session cookie, and [`Session`] extracts it in handlers.
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use sessionkv::{CookieOptions, Session, SessionLayer};
//! use sessionkv::store::SessionStore;
//! use sessionkv::store::memory::MemoryBackend;
//! use tower_cookies::CookieManagerLayer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cookie_options = CookieOptions::build()
//!         .name("session")
//!         .max_age(3600)
//!         .path("/");
//!
//!     let session_layer = SessionLayer::new(SessionStore::new(MemoryBackend::new()))
//!         .with_cookie_options(cookie_options);
//!
//!     let app = Router::new()
//!         .route("/", get(handler))
//!         .layer(session_layer)
//!         .layer(CookieManagerLayer::new()); // CookieManagerLayer must be after
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//!
//! async fn handler(session: Session<MemoryBackend>) -> String {
//!     let count = session.get::<i64>("count").unwrap().unwrap_or(0) + 1;
//!     session.insert("count", count).unwrap();
//!     format!("You've visited this page {} times", count)
//! }
//! ```
//!
//! # Redis
//!
//! Requires the `redis-store` feature.
//!
//! ```rust,ignore
//! use sessionkv::store::SessionStore;
//! use sessionkv::store::redis::{RedisBackend, RedisConfig};
//!
//! let backend = RedisBackend::connect(&RedisConfig::build().host("cache").db(1)).await?;
//! let store = SessionStore::new(backend);
//! ```
//!
//! ## Serialization
//!
//! Payload bodies are encoded with one of:
//!
//! - [`bincode`](https://crates.io/crates/bincode) (default) - Fast, compact binary serialization.
//! - [`rmp-serde`](https://crates.io/crates/rmp-serde) (MessagePack) - Cross-language compatible serialization.
//!
//! ```toml
//! [dependencies]
//! sessionkv = { version = "0.1", default-features = false, features = ["axum", "messagepack"] }
//! ```
//!
//! Every encoded payload starts with a format version byte; entries written with an
//! unknown version fail to load with [`store::Error::Version`].

pub use cookie;

#[cfg(feature = "axum")]
mod extract;

#[cfg(feature = "redis-store")]
pub use fred;

mod service;
pub use service::*;

mod session;
pub use session::*;

pub mod store;

pub use tower_cookies;
