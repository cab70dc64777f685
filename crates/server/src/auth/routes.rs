// Account endpoints: register, login, logout, current identity.

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{Extension, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use primal_common::types::{PublicUser, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::OkResponse,
    auth::middleware::{maybe_bearer_auth, MaybeUser},
    db::{now_ms, InsertOutcome, NewUser},
    error::{ApiError, ErrorCode},
    state::AppState,
};

const MIN_PASSWORD_CHARS: usize = 6;

pub fn router(state: Arc<AppState>) -> Router {
    let maybe_auth = middleware::from_fn_with_state(state.tokens.clone(), maybe_bearer_auth);

    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/me", get(me).route_layer(maybe_auth))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    ok: bool,
    token: String,
    user: PublicUser,
}

#[derive(Debug, Serialize)]
struct MeResponse {
    user: Option<PublicUser>,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = payload.email.trim().to_lowercase();
    let username = payload.username.trim().to_owned();
    if email.is_empty() || username.is_empty() || payload.password.is_empty() {
        return Err(ApiError::new(ErrorCode::ValidationFailed, "missing fields"));
    }
    if payload.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ApiError::new(ErrorCode::ValidationFailed, "password too short"));
    }

    let user = NewUser {
        id: Uuid::new_v4(),
        email,
        username,
        password_hash: hash_password(&payload.password)?,
        role: Role::Viewer,
        created_at: now_ms(),
    };

    match state.db.create_user(&user).await? {
        InsertOutcome::Conflict => return Err(ApiError::from_code(ErrorCode::AccountConflict)),
        InsertOutcome::Inserted => {}
    }

    let token = state.tokens.issue(user.id, user.role)?;
    Ok(Json(AuthResponse {
        ok: true,
        token,
        user: PublicUser {
            id: user.id,
            email: user.email,
            username: user.username,
            role: user.role,
            created_at: user.created_at,
        },
    }))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::new(ErrorCode::ValidationFailed, "missing fields"));
    }

    // Unknown email and wrong password answer identically.
    let Some(user) = state.db.user_by_email(&email).await? else {
        return Err(ApiError::from_code(ErrorCode::CredentialsInvalid));
    };
    if !verify_password(&payload.password, &user.password_hash) {
        return Err(ApiError::from_code(ErrorCode::CredentialsInvalid));
    }

    let token = state.tokens.issue(user.id, user.role)?;
    Ok(Json(AuthResponse { ok: true, token, user: user.public() }))
}

async fn logout() -> Json<OkResponse> {
    // Access tokens are stateless; logout is a client-side token discard.
    Json(OkResponse { ok: true })
}

async fn me(
    State(state): State<Arc<AppState>>,
    Extension(MaybeUser(identity)): Extension<MaybeUser>,
) -> Result<Json<MeResponse>, ApiError> {
    let Some(identity) = identity else {
        return Ok(Json(MeResponse { user: None }));
    };

    let user = state.db.user_by_id(identity.user_id).await?;
    Ok(Json(MeResponse { user: user.map(|row| row.public()) }))
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| {
            tracing::error!(%error, "password hashing failed");
            ApiError::from_code(ErrorCode::InternalError)
        })
}

fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

#[cfg(test)]
mod tests {
    use super::{hash_password, verify_password};

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").expect("hashing should succeed");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn verify_rejects_malformed_stored_hashes() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
