//! Bearer-token authentication and role checks for the HTTP API.
//!
//! Tokens arrive as `Authorization: Bearer <token>` or `X-Api-Key: <token>`.
//! Only their SHA-256 digests are configured; when auth is disabled every
//! caller is treated as an anonymous Owner.

use crate::domain::error::{AppError, Result};
use crate::domain::role::{Permission, Principal};
use crate::infrastructure::config::AuthSettings;
use crate::infrastructure::security::hash_token;
use actix_web::http::header::AUTHORIZATION;
use actix_web::HttpRequest;

pub const API_KEY_HEADER: &str = "X-Api-Key";

fn presented_token(req: &HttpRequest) -> Option<String> {
    let bearer = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_string())
        });

    bearer
        .or_else(|| {
            req.headers()
                .get(API_KEY_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.trim().to_string())
        })
        .filter(|token| !token.is_empty())
}

pub fn authenticate(req: &HttpRequest, auth: &AuthSettings) -> Result<Principal> {
    if !auth.enabled {
        return Ok(Principal::anonymous_owner());
    }

    let token = presented_token(req)
        .ok_or_else(|| AppError::Unauthorized("Missing API token".to_string()))?;
    let digest = hash_token(&token);

    auth.users
        .iter()
        .find(|user| user.token_sha256.trim().eq_ignore_ascii_case(&digest))
        .map(|user| Principal {
            name: user.name.clone(),
            role: user.role,
        })
        .ok_or_else(|| AppError::Unauthorized("Unknown API token".to_string()))
}

/// Authenticate and require `permission`
pub fn authorize(req: &HttpRequest, auth: &AuthSettings, permission: Permission) -> Result<Principal> {
    let principal = authenticate(req, auth)?;
    if principal.can(permission) {
        Ok(principal)
    } else {
        Err(AppError::Forbidden(format!(
            "Role {} is not allowed to {:?}",
            principal.role, permission
        )))
    }
}
