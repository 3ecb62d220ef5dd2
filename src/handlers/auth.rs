use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::{JwtService, PasswordService},
    errors::{AppError, Result},
    handlers::AppState,
    middleware::auth::AuthenticatedUser,
    middleware::ClientInfo,
    models::{AuthResponse, CreateUserRequest, LoginInfo, LoginRequest, NewUser, UserResponse},
    services::GeoLocator,
    store::LedgerStore,
};

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    if request.name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    if !request.email.contains('@') {
        return Err(AppError::Validation("Invalid email format".to_string()));
    }

    PasswordService::validate_password_strength(&request.password)?;

    if state
        .store
        .find_user_by_email(&request.email)
        .await?
        .is_some()
    {
        return Err(AppError::Validation(
            "User with this email already exists".to_string(),
        ));
    }

    let password_hash = PasswordService::hash_password(&request.password)?;

    // New accounts start with a small complimentary token balance.
    let user = state
        .store
        .create_user(NewUser {
            name: request.name.trim().to_string(),
            email: request.email.trim().to_string(),
            password_hash,
            starting_balance: state.config.starting_balance,
        })
        .await?;

    tracing::info!(user_id = %user.id, "user registered");

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let access_token = jwt_service.generate_access_token(user.id, &user.email, user.is_admin)?;
    let refresh_token = jwt_service.generate_refresh_token(user.id, &user.email, user.is_admin)?;

    let response = AuthResponse {
        access_token,
        refresh_token,
        user: UserResponse::from(user),
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered successfully",
            "data": response
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>> {
    let user = state
        .store
        .find_user_by_email(&request.email)
        .await?
        .ok_or_else(|| AppError::Auth("Invalid email or password".to_string()))?;

    if !PasswordService::verify_password(&request.password, &user.password_hash)? {
        return Err(AppError::Auth("Invalid email or password".to_string()));
    }

    // Best-effort geolocation of the client IP for the back office.
    let location = match client.ip.as_deref() {
        Some(ip) => state.geo.locate(ip).await.unwrap_or_default(),
        None => Default::default(),
    };
    state
        .store
        .record_login(
            user.id,
            LoginInfo {
                ip: client.ip,
                country: location.country,
                city: location.city,
            },
        )
        .await?;

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let access_token = jwt_service.generate_access_token(user.id, &user.email, user.is_admin)?;
    let refresh_token = jwt_service.generate_refresh_token(user.id, &user.email, user.is_admin)?;

    // Re-read so the response reflects the login we just recorded.
    let user = state
        .store
        .find_user_by_id(user.id)
        .await?
        .ok_or(AppError::UnknownUser)?;

    let response = AuthResponse {
        access_token,
        refresh_token,
        user: UserResponse::from(user),
    };

    Ok(Json(json!({
        "message": "Login successful",
        "data": response
    })))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>> {
    let refresh_token = request
        .get("refresh_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Validation("Refresh token is required".to_string()))?;

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let claims = jwt_service.verify_refresh_token(refresh_token)?;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Auth("Invalid user ID in token".to_string()))?;

    let user = state
        .store
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Auth("User not found".to_string()))?;

    let access_token = jwt_service.generate_access_token(user.id, &user.email, user.is_admin)?;

    Ok(Json(json!({
        "message": "Token refreshed successfully",
        "data": {
            "access_token": access_token,
            "user": UserResponse::from(user)
        }
    })))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>> {
    let user = state
        .store
        .find_user_by_id(user.id)
        .await?
        .ok_or(AppError::UnknownUser)?;

    Ok(Json(json!({
        "data": UserResponse::from(user)
    })))
}
