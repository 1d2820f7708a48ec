//! Request extractors for the caller's identity.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use shared::Viewer;
use tracing::warn;

use crate::api::AppState;
use crate::error::AppError;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// The signed-in caller. Rejects with 401 when the request carries no valid session.
#[derive(Debug, Clone)]
pub struct CurrentViewer(pub Viewer);

/// The caller if signed in. An invalid token counts as anonymous.
#[derive(Debug, Clone)]
pub struct MaybeViewer(pub Option<Viewer>);

/// Operator access through the shared admin token.
#[derive(Debug, Clone, Copy)]
pub struct Admin;

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn resolve(parts: &mut Parts, state: &AppState) -> Result<Option<Viewer>, AppError> {
    if let Some(viewer) = parts.extensions.get::<Viewer>() {
        return Ok(Some(viewer.clone()));
    }
    let Some(token) = bearer_token(parts) else {
        return Ok(None);
    };

    let viewer = state.sessions.resolve_session(token).await?;
    if let Some(viewer) = &viewer {
        parts.extensions.insert(viewer.clone());
    }
    Ok(viewer)
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentViewer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match resolve(parts, state).await? {
            Some(viewer) => Ok(CurrentViewer(viewer)),
            None => Err(AppError::Unauthorized("Sign in to continue".to_string())),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeViewer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybeViewer(resolve(parts, state).await?))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Admin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token.as_deref() else {
            return Err(AppError::Forbidden("Admin access is disabled".to_string()));
        };
        let presented = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        if presented.is_empty() || presented != expected {
            warn!(uri = %parts.uri, "Rejected admin request");
            return Err(AppError::Forbidden("Invalid admin token".to_string()));
        }
        Ok(Admin)
    }
}
