//! Authentication module with JWT
//!
//! Tokens carry the caller's organization; every org-scoped handler reads it
//! from [`Claims`] instead of trusting request input.

use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    Json,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{LoginRequest, LoginResponse, RegisterRequest, User, UserRole};
use crate::server::{AppState, db};

/// Token lifetime
const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub sub: Uuid,       // user id
    pub email: String,
    pub organization_id: Uuid,
    pub role: String,
    pub exp: usize,      // expiration timestamp
}

#[derive(Debug, Serialize)]
pub struct AuthError {
    pub message: String,
}

type AuthRejection = (StatusCode, Json<AuthError>);

fn reject(status: StatusCode, message: &str) -> AuthRejection {
    (status, Json(AuthError { message: message.to_string() }))
}

/// Hash a password using bcrypt
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password, DEFAULT_COST)
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

/// Create a JWT token for a user
pub fn create_token(user: &User, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(TOKEN_TTL_HOURS)).timestamp() as usize;

    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        organization_id: user.organization_id,
        role: user.role.as_str().to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Validate a JWT token and extract claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// JWT Auth extractor - extracts Claims from Authorization header
impl FromRequestParts<Arc<AppState>> for Claims {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Missing authorization header"))?;

        validate_token(bearer.token(), &state.jwt_secret)
            .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Invalid token"))
    }
}

/// Login handler
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthRejection> {
    let email = req.email.trim().to_lowercase();
    let user = db::users::get_by_email(&state.db, &email)
        .await
        .map_err(|e| {
            tracing::error!("Login lookup failed: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        })?
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Invalid credentials"))?;

    let valid = verify_password(&req.password, &user.password_hash)
        .map_err(|_| reject(StatusCode::INTERNAL_SERVER_ERROR, "Password verification error"))?;

    if !valid {
        return Err(reject(StatusCode::UNAUTHORIZED, "Invalid credentials"));
    }

    let token = create_token(&user, &state.jwt_secret)
        .map_err(|_| reject(StatusCode::INTERNAL_SERVER_ERROR, "Token generation error"))?;

    Ok(Json(LoginResponse {
        token,
        user: user.to_info(),
    }))
}

/// Register handler: creates an organization and its first admin
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<LoginResponse>, AuthRejection> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() || req.organization_name.trim().is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "Organization, email and password are required"));
    }

    if let Ok(Some(_)) = db::users::get_by_email(&state.db, &email).await {
        return Err(reject(StatusCode::CONFLICT, "Email already registered"));
    }

    let password_hash = hash_password(&req.password)
        .map_err(|_| reject(StatusCode::INTERNAL_SERVER_ERROR, "Password hashing error"))?;

    let db_error = |e: sqlx::Error| {
        tracing::error!("Registration failed: {}", e);
        reject(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create account")
    };

    let mut tx = state.db.begin().await.map_err(db_error)?;
    let organization_id = db::organizations::create(&mut tx, req.organization_name.trim())
        .await
        .map_err(db_error)?;
    let user = db::users::create(&mut tx, organization_id, &email, &req.name, &password_hash, UserRole::Admin)
        .await
        .map_err(db_error)?;
    tx.commit().await.map_err(db_error)?;

    tracing::info!("Registered organization {} with admin {}", organization_id, user.email);

    let token = create_token(&user, &state.jwt_secret)
        .map_err(|_| reject(StatusCode::INTERNAL_SERVER_ERROR, "Token generation error"))?;

    Ok(Json(LoginResponse {
        token,
        user: user.to_info(),
    }))
}
