use {
    axum::extract::State,
    serde::Deserialize,
    serde_json::json,
    wagate_channels::Presence,
};

use crate::{
    error::ApiError,
    routes::{ApiResult, JsonBody, Tenant, normalize_recipient, ok},
    server::AppState,
};

#[derive(Debug, Deserialize)]
pub struct PresenceBody {
    #[serde(rename = "type")]
    presence: Presence,
}

pub async fn presence(
    State(state): State<AppState>,
    Tenant(id): Tenant,
    JsonBody(req): JsonBody<PresenceBody>,
) -> ApiResult {
    let client = state.gateway.sessions.live_handle(id)?;
    client.set_presence(req.presence).await?;
    ok(json!({ "details": "presence set" }))
}

#[derive(Debug, Deserialize)]
pub struct CheckBody {
    phones: Vec<String>,
}

pub async fn check(
    State(state): State<AppState>,
    Tenant(id): Tenant,
    JsonBody(req): JsonBody<CheckBody>,
) -> ApiResult {
    if req.phones.is_empty() {
        return Err(ApiError::bad_request("no phones given"));
    }
    let phones = req
        .phones
        .iter()
        .map(|p| normalize_recipient(p))
        .collect::<Result<Vec<_>, _>>()?;
    let client = state.gateway.sessions.live_handle(id)?;
    let users = client.check_users(&phones).await?;
    ok(json!({ "users": users }))
}
