//! `HashSHA256` body signature middleware
//!
//! Requests carrying the header must match the body; requests without it
//! pass through. Every response body is signed into the same header.

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::{debug, trace};

use crate::api::error::ApiError;
use crate::integrity::Signer;

/// Lowercase form of [`crate::integrity::HASH_HEADER`]
pub const HASH_HEADER_NAME: HeaderName = HeaderName::from_static("hashsha256");

/// Largest request body the middleware will buffer
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Signature middleware
pub async fn signature_middleware(
    State(signer): State<Signer>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("failed to read body: {e}")))?;

    if let Some(signature) = parts.headers.get(&HASH_HEADER_NAME) {
        let signature = signature
            .to_str()
            .map_err(|_| ApiError::InvalidRequest("malformed signature header".to_string()))?;

        signer
            .verify(&bytes, signature)
            .inspect_err(|e| debug!("rejecting {} {}: {e}", parts.method, parts.uri))?;
        trace!("request signature verified");
    }

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    sign_response(&signer, response).await
}

async fn sign_response(signer: &Signer, response: Response) -> Result<Response, ApiError> {
    let (mut parts, body) = response.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to read response body: {e}")))?;

    let signature = signer.sign(&bytes)?;
    let value = HeaderValue::from_str(&signature).map_err(|e| ApiError::Internal(e.to_string()))?;
    parts.headers.insert(HASH_HEADER_NAME, value);

    Ok(Response::from_parts(parts, Body::from(bytes)))
}
