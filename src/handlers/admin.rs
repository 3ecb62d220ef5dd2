use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
    middleware::auth::AuthenticatedUser,
    middleware::ClientInfo,
    models::{AuditQuery, ListQuery, NewAuditEntry, UsageQuery, UserResponse},
    store::LedgerStore,
};

fn require_admin(user: &AuthenticatedUser) -> Result<()> {
    if !user.is_admin {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// Appends one audit entry for an admin mutation. Failures are logged and
/// swallowed: the mutation they describe has already happened and must not
/// be reported as failed because bookkeeping lagged.
async fn record_audit(
    state: &AppState,
    admin: &AuthenticatedUser,
    action: &str,
    target: Uuid,
    details: serde_json::Value,
    client: &ClientInfo,
) {
    let entry = NewAuditEntry {
        admin_user_id: admin.id,
        action: action.to_string(),
        target_user_id: target,
        details,
        ip_address: client.ip.clone(),
        user_agent: client.user_agent.clone(),
    };
    if let Err(e) = state.store.append_audit(entry).await {
        tracing::warn!(
            admin = %admin.id,
            action = action,
            target = %target,
            "failed to append audit entry: {}",
            e
        );
    }
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>> {
    require_admin(&user)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let users = state.store.list_users(limit, offset).await?;
    let users: Vec<UserResponse> = users.into_iter().map(UserResponse::from).collect();

    Ok(Json(json!({ "data": users })))
}

pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    client: ClientInfo,
    Path(target_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    require_admin(&user)?;

    if target_id == user.id {
        return Err(AppError::Validation(
            "Admins cannot delete their own account".to_string(),
        ));
    }

    let images = state.store.list_images(target_id, 10_000, 0).await?;
    state.store.delete_user(target_id).await?;

    for image in &images {
        if let Err(e) = state.vault.remove(image.id).await {
            tracing::warn!(image_id = %image.id, "failed to remove assets: {}", e);
        }
    }

    record_audit(
        &state,
        &user,
        "delete_user",
        target_id,
        json!({ "images_removed": images.len() }),
        &client,
    )
    .await;

    Ok(Json(json!({ "message": "User deleted" })))
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub is_admin: bool,
}

pub async fn set_role(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    client: ClientInfo,
    Path(target_id): Path<Uuid>,
    Json(request): Json<SetRoleRequest>,
) -> Result<Json<serde_json::Value>> {
    require_admin(&user)?;

    if target_id == user.id && !request.is_admin {
        return Err(AppError::Validation(
            "Admins cannot revoke their own role".to_string(),
        ));
    }

    state.store.set_admin(target_id, request.is_admin).await?;

    record_audit(
        &state,
        &user,
        "set_role",
        target_id,
        json!({ "is_admin": request.is_admin }),
        &client,
    )
    .await;

    Ok(Json(json!({ "message": "Role updated" })))
}

#[derive(Debug, Deserialize)]
pub struct GrantTokensRequest {
    pub amount: i64,
}

pub async fn grant_tokens(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    client: ClientInfo,
    Path(target_id): Path<Uuid>,
    Json(request): Json<GrantTokensRequest>,
) -> Result<Json<serde_json::Value>> {
    require_admin(&user)?;

    if request.amount <= 0 {
        return Err(AppError::Validation(
            "Grant amount must be positive".to_string(),
        ));
    }

    let balance = state.store.credit(target_id, request.amount).await?;
    tracing::info!(
        admin = %user.id,
        target = %target_id,
        amount = request.amount,
        "tokens granted"
    );

    record_audit(
        &state,
        &user,
        "grant_tokens",
        target_id,
        json!({ "amount": request.amount, "balance_after": balance }),
        &client,
    )
    .await;

    Ok(Json(json!({
        "message": "Tokens granted",
        "data": { "balance": balance }
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetBalanceRequest {
    pub amount: i64,
}

pub async fn set_balance(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    client: ClientInfo,
    Path(target_id): Path<Uuid>,
    Json(request): Json<SetBalanceRequest>,
) -> Result<Json<serde_json::Value>> {
    require_admin(&user)?;

    let balance = state.store.set_balance(target_id, request.amount).await?;

    record_audit(
        &state,
        &user,
        "set_balance",
        target_id,
        json!({ "amount": request.amount }),
        &client,
    )
    .await;

    Ok(Json(json!({
        "message": "Balance updated",
        "data": { "balance": balance }
    })))
}

pub async fn usage_stats(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<UsageQuery>,
) -> Result<Json<serde_json::Value>> {
    require_admin(&user)?;

    let to = query.to.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let from = query.from.unwrap_or(to - chrono::Duration::days(30));
    if from > to {
        return Err(AppError::Validation(
            "Range start must not be after range end".to_string(),
        ));
    }

    let usage = state.store.usage_stats(from, to).await?;

    Ok(Json(json!({ "data": usage })))
}

pub async fn audit_log(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<AuditQuery>,
) -> Result<Json<serde_json::Value>> {
    require_admin(&user)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let entries = state.store.audit_page(limit, offset).await?;

    Ok(Json(json!({ "data": entries })))
}
