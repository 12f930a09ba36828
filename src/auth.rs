// Authentication: password hashing, JWT tokens, and extractors.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{Database, User};

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

// ── JWT ──────────────────────────────────────────────────────────────

/// JWT secret – in production this should come from an env var.
fn jwt_secret() -> Vec<u8> {
    std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "nexus-dev-secret-change-in-production".to_string())
        .into_bytes()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64, // user id
    pub username: String,
    pub role: String,
    pub exp: usize, // expiry (unix timestamp)
}

pub fn create_token(user_id: i64, username: &str, role: &str) -> Result<String, String> {
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(24))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role: role.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(&jwt_secret()),
    )
    .map_err(|e| format!("Failed to create token: {e}"))
}

pub fn verify_token(token: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(&jwt_secret()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| format!("Invalid token: {e}"))
}

// ── Password hashing ─────────────────────────────────────────────────

pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| format!("Failed to hash password: {e}"))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, String> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| format!("Invalid password hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

// ── Axum extractors ──────────────────────────────────────────────────

/// Extracts the authenticated user from the Authorization header.
/// Usage: `AuthUser(claims)` in handler parameters.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Missing Authorization header"})),
            )
        })?;

        match verify_token(token) {
            Ok(claims) => Ok(AuthUser(claims)),
            Err(_) => Err((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Invalid token"})),
            )),
        }
    }
}

/// Like `AuthUser`, but additionally requires the admin role. Catalog
/// mutations go through this extractor.
#[derive(Debug, Clone)]
pub struct AdminUser(pub Claims);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(claims) = AuthUser::from_request_parts(parts, state).await?;
        if claims.role != ROLE_ADMIN {
            return Err((
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({"error": "Administrator role required"})),
            ));
        }
        Ok(AdminUser(claims))
    }
}

// ── Auth API handlers ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserPublic,
}

#[derive(Serialize)]
pub struct UserPublic {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: String,
    pub bits: i64,
    pub manager_exp: i64,
    pub created_at: String,
}

impl From<User> for UserPublic {
    fn from(u: User) -> Self {
        UserPublic {
            id: u.id,
            username: u.username,
            email: u.email,
            display_name: u.display_name,
            role: u.role,
            bits: u.bits,
            manager_exp: u.manager_exp,
            created_at: u.created_at,
        }
    }
}

fn json_error(status: StatusCode, msg: &str) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "error": msg })))
}

pub async fn register(
    State(db): State<Arc<Database>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    if req.username.is_empty() || req.password.is_empty() || req.email.is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "username, email and password are required",
        )
        .into_response();
    }

    match db.get_user_by_username(&req.username).await {
        Ok(Some(_)) => {
            return json_error(StatusCode::CONFLICT, "Username already taken").into_response()
        }
        Ok(None) => {}
        Err(e) => return e.into_response(),
    }

    let hash = match hash_password(&req.password) {
        Ok(h) => h,
        Err(e) => {
            tracing::error!("Password hashing failed: {e}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                .into_response();
        }
    };

    // The first account on a fresh install becomes the catalog admin.
    let role = match db.count_users().await {
        Ok(0) => ROLE_ADMIN,
        Ok(_) => ROLE_USER,
        Err(e) => return e.into_response(),
    };

    let user = match db
        .create_user(
            &req.username,
            &req.email,
            &hash,
            req.display_name.as_deref(),
            role,
        )
        .await
    {
        Ok(u) => u,
        Err(e) => return e.into_response(),
    };

    let token = match create_token(user.id, &user.username, &user.role) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Token creation failed: {e}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                .into_response();
        }
    };

    (
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    )
        .into_response()
}

pub async fn login(
    State(db): State<Arc<Database>>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let user = match db.get_user_by_username(&req.username).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            return json_error(StatusCode::UNAUTHORIZED, "Invalid credentials").into_response()
        }
        Err(e) => return e.into_response(),
    };

    match verify_password(&req.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            return json_error(StatusCode::UNAUTHORIZED, "Invalid credentials").into_response()
        }
        Err(e) => {
            tracing::error!("Password verification failed: {e}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                .into_response();
        }
    }

    let token = match create_token(user.id, &user.username, &user.role) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Token creation failed: {e}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                .into_response();
        }
    };

    let display = user.display_name.clone().unwrap_or(user.username.clone());
    if let Err(e) = db
        .log_activity(user.id, "login", &format!("{display} signed in"))
        .await
    {
        tracing::warn!("Failed to log login activity: {e}");
    }

    (
        StatusCode::OK,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    )
        .into_response()
}

pub async fn me(State(db): State<Arc<Database>>, auth: AuthUser) -> impl IntoResponse {
    match db.get_user(auth.0.sub).await {
        Ok(Some(user)) => (StatusCode::OK, Json(UserPublic::from(user))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "User not found").into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn update_profile(
    State(db): State<Arc<Database>>,
    auth: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> impl IntoResponse {
    match db
        .update_display_name(auth.0.sub, req.display_name.as_deref())
        .await
    {
        Ok(Some(user)) => (StatusCode::OK, Json(UserPublic::from(user))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "User not found").into_response(),
        Err(e) => e.into_response(),
    }
}
