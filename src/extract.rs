use axum_core::extract::FromRequestParts;
use http::{StatusCode, request::Parts};

use crate::Session;
use crate::store::Backend;

/// Axum Extractor for [`Session`].
///
/// The session is opened by [`SessionLayer`](crate::SessionLayer); extraction fails
/// with a 500 if the layer is missing.
impl<S, B> FromRequestParts<S> for Session<B>
where
    S: Send + Sync,
    B: Backend,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Session<B>>().cloned().ok_or_else(|| {
            tracing::error!("session layer not found in the request extensions");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "session not found in the request",
            )
        })
    }
}
