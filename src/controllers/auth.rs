use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::{ApiError, ApiResult},
    middleware::AuthUser,
    models::{Role, User},
    services::auth::{hash_password, issue_token, verify_password, JwtKeys},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/profile", put(update_profile))
}

#[derive(Debug, Deserialize, Validate)]
struct RegisterRequest {
    #[validate(length(min = 1, max = 100, message = "name is required"))]
    name: String,
    #[validate(email(message = "email must be valid"))]
    email: String,
    #[validate(length(min = 6, max = 128, message = "password must be at least 6 characters"))]
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

/// Profile form body. The form always posts `password`, empty when unchanged.
#[derive(Debug, Default, Deserialize)]
struct ProfileRequest {
    name: Option<String>,
    password: Option<String>,
}

#[derive(Debug, PartialEq, Validate)]
struct ProfileChanges {
    #[validate(length(min = 1, max = 100, message = "name is required"))]
    name: Option<String>,
    #[validate(length(min = 6, max = 128, message = "password must be at least 6 characters"))]
    password: Option<String>,
}

impl ProfileRequest {
    fn changes(self) -> ApiResult<ProfileChanges> {
        let changes = ProfileChanges {
            name: self.name.map(|n| n.trim().to_string()),
            password: self.password.filter(|p| !p.is_empty()),
        };
        changes.validate()?;
        Ok(changes)
    }
}

/// What the client stores after login/register.
#[derive(Debug, Serialize)]
struct SessionResponse {
    #[serde(rename = "_id")]
    id: i64,
    name: String,
    email: String,
    role: Role,
    token: String,
}

fn session_for(user: &User, keys: &JwtKeys) -> ApiResult<SessionResponse> {
    let token = issue_token(user, keys)
        .map_err(|e| ApiError::Internal(format!("token signing failed: {}", e)))?;
    Ok(SessionResponse {
        id: user.id,
        name: user.name.clone(),
        email: user.email.clone(),
        role: user.role,
        token,
    })
}

// bcrypt is CPU-bound
async fn hash_off_thread(password: String) -> ApiResult<String> {
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::Internal(format!("hashing task failed: {}", e)))??;
    Ok(hash)
}

// POST /api/auth/register
async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let name = req.name.trim();
    let email = req.email.trim();

    if User::find_by_email(&state.db.pool, email).await?.is_some() {
        return Err(ApiError::Conflict("User already exists".into()));
    }

    let role = if state.config.admin.is_admin_email(email) {
        Role::Admin
    } else {
        Role::User
    };

    let hash = hash_off_thread(req.password.clone()).await?;

    let user = match User::insert(&state.db.pool, name, email, &hash, role).await {
        Ok(user) => user,
        // lost a race against a concurrent registration
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            return Err(ApiError::Conflict("User already exists".into()));
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!("Registered user {} ({})", user.id, user.role.as_str());
    Ok((StatusCode::CREATED, Json(session_for(&user, &state.jwt)?)))
}

// POST /api/auth/login
async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let invalid = || ApiError::Unauthorized("Invalid email or password".into());

    let user = User::find_by_email(&state.db.pool, req.email.trim())
        .await?
        .ok_or_else(invalid)?;

    let hash = user.password_hash.clone();
    let password = req.password;
    let ok = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError::Internal(format!("verify task failed: {}", e)))?;
    if !ok {
        return Err(invalid());
    }

    Ok((StatusCode::OK, Json(session_for(&user, &state.jwt)?)))
}

// GET /api/auth/me
async fn me(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Json<User>> {
    User::find_by_id(&state.db.pool, user.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("User"))
}

// PUT /api/auth/profile
async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<ProfileRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let changes = req.changes()?;
    let password_hash = match changes.password {
        Some(password) => Some(hash_off_thread(password).await?),
        None => None,
    };

    let updated = User::update_profile(
        &state.db.pool,
        user.user_id,
        changes.name.as_deref(),
        password_hash.as_deref(),
    )
    .await?
    .ok_or_else(|| ApiError::not_found("User"))?;

    tracing::info!(
        "User {} updated profile (password changed: {})",
        updated.id,
        password_hash.is_some()
    );
    Ok(Json(session_for(&updated, &state.jwt)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::decode_token;
    use axum::http::StatusCode;
    use chrono::Utc;

    fn request(name: Option<&str>, password: Option<&str>) -> ProfileRequest {
        ProfileRequest {
            name: name.map(String::from),
            password: password.map(String::from),
        }
    }

    #[test]
    fn empty_password_leaves_it_unchanged() {
        let changes = request(Some(" Kavya R "), Some("")).changes().unwrap();
        assert_eq!(
            changes,
            ProfileChanges {
                name: Some("Kavya R".into()),
                password: None,
            }
        );
    }

    #[test]
    fn new_password_is_validated() {
        let err = request(Some("Kavya"), Some("123")).changes().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("at least 6"));

        let changes = request(None, Some("s3cret-pass")).changes().unwrap();
        assert_eq!(changes.name, None);
        assert_eq!(changes.password.as_deref(), Some("s3cret-pass"));
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = request(Some("   "), None).changes().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn profile_body_accepts_client_form() {
        let req: ProfileRequest =
            serde_json::from_value(serde_json::json!({ "name": "Kavya", "password": "" })).unwrap();
        assert_eq!(req.changes().unwrap().password, None);
    }

    #[test]
    fn session_carries_a_token_for_the_updated_user() {
        let keys = JwtKeys::new("profile-secret", 1);
        let user = User {
            id: 14,
            name: "Kavya R".into(),
            email: "kavya@example.com".into(),
            password_hash: String::new(),
            role: Role::User,
            created_at: Utc::now(),
        };

        let session = session_for(&user, &keys).unwrap();
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["_id"], 14);
        assert_eq!(value["name"], "Kavya R");
        assert_eq!(value["role"], "user");
        assert_eq!(decode_token(&session.token, &keys).unwrap().sub, 14);
    }
}
