use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{auth::JwtService, handlers::AppState, store::LedgerStore};

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    pub balance: i64,
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": message, "status": 401})),
    )
        .into_response()
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok());

        let token = auth_header
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| unauthorized("Authentication required"))?;

        let jwt_service = JwtService::new(&state.config.jwt_secret);
        let claims = jwt_service
            .verify_access_token(token)
            .map_err(|_| unauthorized("Invalid or expired token"))?;

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| unauthorized("Invalid token"))?;

        // Re-check against the store so deleted users and revoked admin
        // rights take effect before token expiry.
        match state.store.find_user_by_id(user_id).await {
            Ok(Some(user)) => Ok(AuthenticatedUser {
                id: user.id,
                name: user.name,
                email: user.email,
                is_admin: user.is_admin,
                balance: user.balance,
            }),
            Ok(None) => Err(unauthorized("User not found")),
            Err(e) => {
                tracing::error!("Failed to load user for auth check: {}", e);
                Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Database error", "status": 500})),
                )
                    .into_response())
            }
        }
    }
}

/// Client metadata captured for audit entries and last-login records.
/// Always succeeds; absent headers simply yield `None`.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let ip = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_string())
            .or_else(|| {
                parts
                    .headers
                    .get("x-real-ip")
                    .and_then(|value| value.to_str().ok())
                    .map(|value| value.to_string())
            });

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        Ok(ClientInfo { ip, user_agent })
    }
}
