// src/utils/jwt.rs

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::{TimeDelta, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{config::Config, error::AppError};

pub const ADMIN_ROLE: &str = "admin";

/// Claims carried by portal bearer tokens.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Claims {
    /// Operator name or service id the token was issued to.
    pub sub: String,
    pub role: String,
    /// Unix timestamp.
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

/// Signs a token for `subject` that expires `expiration_seconds` from now.
pub fn sign_jwt(
    subject: &str,
    role: &str,
    secret: &str,
    expiration_seconds: u64,
) -> Result<String, AppError> {
    let lifetime = i64::try_from(expiration_seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| AppError::BadRequest("Token lifetime out of range".to_string()))?;
    let exp = usize::try_from((Utc::now() + lifetime).timestamp())
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    let claims = Claims {
        sub: subject.to_owned(),
        role: role.to_owned(),
        exp,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Checks signature and expiry.
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::AuthError("Invalid token".to_string()))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Rejects the request with 401 unless it carries a valid bearer token.
/// The decoded `Claims` are left in the request extensions.
pub async fn auth_middleware(
    State(config): State<Config>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;
    let claims = verify_jwt(token, &config.jwt_secret).map_err(|_| StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// 403 unless the token carries the admin role. Layer it inside
/// `auth_middleware`.
pub async fn admin_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !claims.is_admin() {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(req).await)
}
