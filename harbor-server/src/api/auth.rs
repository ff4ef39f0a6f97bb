//! Request authentication
//!
//! Extractors that decode the `Authorization: Bearer <token>` header through
//! the service's token authority.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use harbor_core::domain::status::ErrorCode;

use crate::api::error::ApiError;
use crate::auth::{Token, TokenKind};
use crate::service::Service;

/// The caller's token, if one was presented. A token that was presented
/// but does not decode is rejected.
pub struct MaybeToken(pub Option<Token>);

/// An operator login token
pub struct LoginToken(pub Token);

/// A token allowed to queue jobs: login or trigger
pub struct QueueToken(pub Token);

fn bearer(parts: &Parts) -> Result<Option<&str>, ApiError> {
    let Some(value) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::unauthenticated("authorization header is not valid text"))?;
    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthenticated("authorization header must be a bearer token"))?;
    Ok(Some(token))
}

fn decode(parts: &Parts, service: &Service) -> Result<Option<Token>, ApiError> {
    match bearer(parts)? {
        Some(raw) => service.authority().decode(raw).map(Some).ok_or_else(|| {
            tracing::warn!("Rejected request with an unknown token");
            ApiError::unauthenticated("invalid token")
        }),
        None => Ok(None),
    }
}

fn require(parts: &Parts, service: &Service) -> Result<Token, ApiError> {
    decode(parts, service)?.ok_or_else(|| ApiError::unauthenticated("authentication required"))
}

impl FromRequestParts<Arc<Service>> for MaybeToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &Arc<Service>,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeToken(decode(parts, service)?))
    }
}

impl FromRequestParts<Arc<Service>> for LoginToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &Arc<Service>,
    ) -> Result<Self, Self::Rejection> {
        let token = require(parts, service)?;
        if !token.is_login() {
            tracing::warn!(method = %parts.method, uri = %parts.uri, "Non-login token rejected");
            return Err(ApiError::new(
                ErrorCode::PermissionDenied,
                "a login token is required",
            ));
        }
        Ok(LoginToken(token))
    }
}

impl FromRequestParts<Arc<Service>> for QueueToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &Arc<Service>,
    ) -> Result<Self, Self::Rejection> {
        let token = require(parts, service)?;
        match token.kind {
            TokenKind::Login { .. } | TokenKind::Trigger { .. } => Ok(QueueToken(token)),
            TokenKind::Runner { .. } => {
                tracing::warn!("Runner token used to queue a job");
                Err(ApiError::new(
                    ErrorCode::PermissionDenied,
                    "runner tokens cannot queue jobs",
                ))
            }
        }
    }
}
