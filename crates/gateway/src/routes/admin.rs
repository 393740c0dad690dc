use {
    axum::extract::{Path, State},
    serde::Deserialize,
    serde_json::json,
    tracing::info,
    wagate_common::{EventSet, TenantId},
    wagate_tenants::NewTenant,
};

use crate::{
    error::{ApiError, SessionError},
    routes::{Admin, ApiResult, JsonBody, ok, webhook::validate_url},
    server::AppState,
    session::StopReason,
};

pub async fn list_users(State(state): State<AppState>, _: Admin) -> ApiResult {
    let records = state.gateway.store.list().await?;
    let users: Vec<_> = records.iter().map(|r| r.summary()).collect();
    ok(users)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUserBody {
    name: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    webhook: Option<String>,
    #[serde(default)]
    events: Option<Vec<String>>,
    /// Account expiry, unix seconds.
    #[serde(default)]
    expiration: Option<i64>,
}

pub async fn add_user(
    State(state): State<AppState>,
    _: Admin,
    JsonBody(req): JsonBody<AddUserBody>,
) -> ApiResult {
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("missing name"));
    }
    let mut tenant = NewTenant::named(req.name.trim());
    if let Some(token) = req.token.filter(|t| !t.is_empty()) {
        tenant = tenant.with_token(token);
    }
    if let Some(url) = req.webhook.filter(|u| !u.is_empty()) {
        validate_url(&url)?;
        tenant = tenant.with_webhook(url);
    }
    if let Some(tags) = req.events {
        tenant = tenant
            .with_events(EventSet::from_tags(&tags).map_err(|e| ApiError::bad_request(e.to_string()))?);
    }
    tenant.expiration = req.expiration;
    let record = state.gateway.store.create(tenant).await?;
    info!(tenant = record.id, name = %record.name, "tenant created");
    ok(record.summary())
}

pub async fn delete_user(
    State(state): State<AppState>,
    _: Admin,
    Path(id): Path<TenantId>,
) -> ApiResult {
    let gw = &state.gateway;
    match gw.sessions.stop(id, StopReason::OperatorRequested).await {
        Ok(()) | Err(SessionError::NotActive(_)) => {},
        Err(e) => return Err(e.into()),
    }
    if gw.store.delete(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("tenant {id} not found")));
    }
    gw.auth_cache.invalidate_tenant(id);
    gw.sessions.forget(id);
    info!(tenant = id, "tenant deleted");
    ok(json!({ "id": id, "details": "deleted" }))
}
