use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use std::sync::Arc;

use crate::{
    error::ApiError,
    models::Role,
    services::auth::{decode_token, JwtKeys},
    AppState,
};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners see their own records; admins see everything.
    pub fn can_access(&self, owner_id: i64) -> bool {
        self.is_admin() || self.user_id == owner_id
    }
}

/// Same as `AuthUser` but rejects non-admins with 403.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header_value = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Not authorized, no token".into()))?;

    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Not authorized, bearer token expected".into()))
}

pub fn authenticate(parts: &Parts, keys: &JwtKeys) -> Result<AuthUser, ApiError> {
    let token = bearer_token(parts)?;
    let claims = decode_token(token, keys).map_err(|e| {
        tracing::debug!("rejected token: {:?}", e);
        ApiError::Unauthorized("Not authorized, token failed".into())
    })?;
    Ok(AuthUser {
        user_id: claims.sub,
        email: claims.email,
        role: claims.role,
    })
}

// Bearer JWT extractor
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        authenticate(parts, &state.jwt)
    }
}

impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = authenticate(parts, &state.jwt)?;
        if !user.is_admin() {
            return Err(ApiError::Forbidden("Not authorized as an admin".into()));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::services::auth::issue_token;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;

    fn parts_with(header_value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/bookings/my-bookings");
        if let Some(v) = header_value {
            builder = builder.header(header::AUTHORIZATION, v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn token_for(role: Role, keys: &JwtKeys) -> String {
        let user = User {
            id: 9,
            name: "Priya".into(),
            email: "priya@example.com".into(),
            password_hash: String::new(),
            role,
            created_at: Utc::now(),
        };
        issue_token(&user, keys).unwrap()
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let keys = JwtKeys::new("s", 1);
        let err = authenticate(&parts_with(None), &keys).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn basic_scheme_is_unauthorized() {
        let keys = JwtKeys::new("s", 1);
        let err = authenticate(&parts_with(Some("Basic dXNlcjpwYXNz")), &keys).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn valid_bearer_token_authenticates() {
        let keys = JwtKeys::new("s", 1);
        let header_value = format!("Bearer {}", token_for(Role::User, &keys));
        let user = authenticate(&parts_with(Some(&header_value)), &keys).unwrap();
        assert_eq!(user.user_id, 9);
        assert!(!user.is_admin());
        assert!(user.can_access(9));
        assert!(!user.can_access(10));
    }

    #[test]
    fn admin_can_access_any_owner() {
        let keys = JwtKeys::new("s", 1);
        let header_value = format!("Bearer {}", token_for(Role::Admin, &keys));
        let user = authenticate(&parts_with(Some(&header_value)), &keys).unwrap();
        assert!(user.can_access(12345));
    }
}
