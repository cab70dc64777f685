use crate::{
    auth::token::{AccessGrant, AccessTokenService},
    error::{ApiError, ErrorCode},
};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use primal_common::types::Role;
use std::sync::Arc;
use uuid::Uuid;

/// Identity attached to a request by the bearer-auth middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthenticatedUser {
    /// Guard helper: error when the caller's role is below `required`.
    pub fn require_role(&self, required: Role) -> Result<(), ApiError> {
        if self.role.allows(required) {
            Ok(())
        } else {
            Err(ApiError::from_code(ErrorCode::AuthForbidden))
        }
    }
}

/// Optional identity for routes that also serve anonymous callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaybeUser(pub Option<AuthenticatedUser>);

/// Rejects requests without a valid bearer token.
pub async fn require_bearer_auth(
    State(tokens): State<Arc<AccessTokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(user) = authenticated_user(&tokens, &request) else {
        return ApiError::from_code(ErrorCode::AuthRequired).into_response();
    };

    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Attaches the caller's identity when a valid bearer token is present,
/// and passes the request through either way.
pub async fn maybe_bearer_auth(
    State(tokens): State<Arc<AccessTokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = authenticated_user(&tokens, &request);
    request.extensions_mut().insert(MaybeUser(user));
    next.run(request).await
}

fn authenticated_user(tokens: &AccessTokenService, request: &Request) -> Option<AuthenticatedUser> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)?;

    let AccessGrant { user_id, role } = tokens.validate(token).ok()?;
    Some(AuthenticatedUser { user_id, role })
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}
