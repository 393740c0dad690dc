use {
    axum::extract::State,
    serde::Deserialize,
    serde_json::json,
    url::Url,
    wagate_common::EventSet,
    wagate_tenants::{TenantRecord, TenantUpdate},
};

use crate::{
    error::ApiError,
    router::WebhookTarget,
    routes::{ApiResult, JsonBody, Tenant, ok},
    server::AppState,
};

fn view(record: &TenantRecord) -> serde_json::Value {
    json!({
        "webhook": record.webhook,
        "subscribe": record.events.tags(),
    })
}

pub(crate) fn validate_url(raw: &str) -> Result<(), ApiError> {
    let url = Url::parse(raw).map_err(|e| ApiError::bad_request(format!("invalid webhook url: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::bad_request("webhook url must be http or https"));
    }
    Ok(())
}

pub async fn get_webhook(State(state): State<AppState>, Tenant(id): Tenant) -> ApiResult {
    let record = state
        .gateway
        .store
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("tenant {id} not found")))?;
    ok(view(&record))
}

#[derive(Debug, Deserialize)]
pub struct SetWebhookBody {
    #[serde(default)]
    webhook: Option<String>,
    #[serde(default)]
    events: Option<Vec<String>>,
}

pub async fn set_webhook(
    State(state): State<AppState>,
    Tenant(id): Tenant,
    JsonBody(req): JsonBody<SetWebhookBody>,
) -> ApiResult {
    if let Some(url) = req.webhook.as_deref().filter(|u| !u.is_empty()) {
        validate_url(url)?;
    }
    let events = req
        .events
        .map(|tags| EventSet::from_tags(&tags))
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let gw = &state.gateway;
    let record = gw
        .store
        .update(id, TenantUpdate {
            webhook: req.webhook.map(Some),
            events,
            ..TenantUpdate::default()
        })
        .await?;
    gw.router.update_target(id, WebhookTarget::from_record(&record));
    ok(view(&record))
}

pub async fn delete_webhook(State(state): State<AppState>, Tenant(id): Tenant) -> ApiResult {
    let gw = &state.gateway;
    let record = gw
        .store
        .update(id, TenantUpdate {
            webhook: Some(None),
            ..TenantUpdate::default()
        })
        .await?;
    gw.router.update_target(id, WebhookTarget::from_record(&record));
    ok(json!({ "details": "webhook removed" }))
}
