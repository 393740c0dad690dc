use {
    axum::{body::Bytes, extract::State},
    serde::Deserialize,
    serde_json::json,
    tracing::info,
    wagate_common::EventSet,
    wagate_tenants::TenantUpdate,
};

use crate::{
    error::{ApiError, SessionError},
    router::WebhookTarget,
    routes::{ApiResult, JsonBody, Tenant, normalize_recipient, ok},
    server::AppState,
    session::{SessionState, StopReason},
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectBody {
    /// Replace the tenant's event subscription before connecting.
    #[serde(default)]
    subscribe: Option<Vec<String>>,
}

pub async fn connect(State(state): State<AppState>, Tenant(id): Tenant, body: Bytes) -> ApiResult {
    let gw = &state.gateway;
    let body: ConnectBody = if body.is_empty() {
        ConnectBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(format!("invalid body: {e}")))?
    };
    if let Some(tags) = body.subscribe {
        let events = EventSet::from_tags(&tags).map_err(|e| ApiError::bad_request(e.to_string()))?;
        let record = gw
            .store
            .update(id, TenantUpdate {
                events: Some(events),
                ..TenantUpdate::default()
            })
            .await?;
        gw.router.update_target(id, WebhookTarget::from_record(&record));
    }
    let status = gw.sessions.start(id).await?;
    ok(json!({
        "details": "connected",
        "state": status.state,
        "sessionId": status.session_id,
    }))
}

pub async fn disconnect(State(state): State<AppState>, Tenant(id): Tenant) -> ApiResult {
    state
        .gateway
        .sessions
        .stop(id, StopReason::OperatorRequested)
        .await?;
    ok(json!({ "details": "disconnected" }))
}

pub async fn logout(State(state): State<AppState>, Tenant(id): Tenant) -> ApiResult {
    state.gateway.sessions.logout(id).await?;
    info!(tenant = id, "tenant logged out");
    ok(json!({ "details": "logged out" }))
}

pub async fn status(State(state): State<AppState>, Tenant(id): Tenant) -> ApiResult {
    let status = state.gateway.sessions.status(id);
    ok(json!({
        "state": status.state,
        "connected": status.state == SessionState::Connected,
        "loggedIn": status.session_id.is_some(),
        "sessionId": status.session_id,
    }))
}

pub async fn qr(State(state): State<AppState>, Tenant(id): Tenant) -> ApiResult {
    let gw = &state.gateway;
    let status = gw.sessions.status(id);
    if status.state == SessionState::Absent {
        return Err(ApiError::from(SessionError::NotActive(id)));
    }
    if status.session_id.is_some() {
        return Err(ApiError::bad_request("already logged in"));
    }
    let code = match gw.sessions.qr(id) {
        Some(code) => Some(code),
        None => gw.store.get_by_id(id).await?.and_then(|r| r.qrcode),
    };
    ok(json!({ "qrCode": code }))
}

#[derive(Debug, Deserialize)]
pub struct PairPhoneBody {
    phone: String,
}

pub async fn pair_phone(
    State(state): State<AppState>,
    Tenant(id): Tenant,
    JsonBody(body): JsonBody<PairPhoneBody>,
) -> ApiResult {
    let phone = normalize_recipient(&body.phone)?;
    let client = state.gateway.sessions.live_handle(id)?;
    if client.session_id().is_some() {
        return Err(ApiError::bad_request("already logged in"));
    }
    let code = client.pair_phone(&phone).await?;
    ok(json!({ "linkingCode": code }))
}

pub async fn events(State(state): State<AppState>, Tenant(id): Tenant) -> ApiResult {
    ok(state.gateway.router.recent(id))
}
