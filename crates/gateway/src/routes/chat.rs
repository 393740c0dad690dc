use {
    axum::extract::State,
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    serde::Deserialize,
    serde_json::json,
    wagate_channels::{ChatPresence, MediaKind, MediaRef, MessageBody, OutgoingMessage},
};

use crate::{
    error::ApiError,
    routes::{ApiResult, JsonBody, Tenant, normalize_recipient, ok},
    server::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextBody {
    phone: String,
    body: String,
    #[serde(default)]
    id: Option<String>,
}

pub async fn send_text(
    State(state): State<AppState>,
    Tenant(id): Tenant,
    JsonBody(req): JsonBody<SendTextBody>,
) -> ApiResult {
    if req.body.is_empty() {
        return Err(ApiError::bad_request("missing message body"));
    }
    let message = OutgoingMessage {
        to: normalize_recipient(&req.phone)?,
        id: req.id,
        body: MessageBody::Text { text: req.body },
    };
    let client = state.gateway.sessions.live_handle(id)?;
    let receipt = client.send_message(message).await?;
    ok(json!({ "details": "sent", "id": receipt.message_id, "timestamp": receipt.timestamp }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMediaBody {
    phone: String,
    kind: MediaKind,
    /// Base64 payload, optionally as a `data:<mime>;base64,` URL.
    data: String,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

/// Split a data URL into its mime type and payload; plain base64 passes through.
fn split_data_url(raw: &str) -> (Option<&str>, &str) {
    raw.strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .map_or((None, raw), |(mime, data)| (Some(mime), data))
}

pub async fn send_media(
    State(state): State<AppState>,
    Tenant(id): Tenant,
    JsonBody(req): JsonBody<SendMediaBody>,
) -> ApiResult {
    let (embedded_mime, encoded) = split_data_url(&req.data);
    let data = BASE64
        .decode(encoded.trim())
        .map_err(|e| ApiError::bad_request(format!("invalid base64 payload: {e}")))?;
    if data.is_empty() {
        return Err(ApiError::bad_request("empty media payload"));
    }
    if req.kind == MediaKind::Document && req.file_name.is_none() {
        return Err(ApiError::bad_request("documents need a fileName"));
    }
    let message = OutgoingMessage {
        to: normalize_recipient(&req.phone)?,
        id: req.id,
        body: MessageBody::Media {
            kind: req.kind,
            data,
            mime_type: req.mime_type.or_else(|| embedded_mime.map(str::to_string)),
            caption: req.caption,
            file_name: req.file_name,
        },
    };
    let client = state.gateway.sessions.live_handle(id)?;
    let receipt = client.send_message(message).await?;
    ok(json!({ "details": "sent", "id": receipt.message_id, "timestamp": receipt.timestamp }))
}

#[derive(Debug, Deserialize)]
pub struct ChatPresenceBody {
    phone: String,
    state: ChatPresence,
}

pub async fn chat_presence(
    State(state): State<AppState>,
    Tenant(id): Tenant,
    JsonBody(req): JsonBody<ChatPresenceBody>,
) -> ApiResult {
    let chat = normalize_recipient(&req.phone)?;
    let client = state.gateway.sessions.live_handle(id)?;
    client.send_chat_presence(&chat, req.state).await?;
    ok(json!({ "details": "chat presence set" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadBody {
    chat: String,
    #[serde(default)]
    sender: Option<String>,
    ids: Vec<String>,
}

pub async fn mark_read(
    State(state): State<AppState>,
    Tenant(id): Tenant,
    JsonBody(req): JsonBody<MarkReadBody>,
) -> ApiResult {
    if req.ids.is_empty() {
        return Err(ApiError::bad_request("no message ids given"));
    }
    let chat = normalize_recipient(&req.chat)?;
    let client = state.gateway.sessions.live_handle(id)?;
    client
        .mark_read(&chat, req.sender.as_deref(), &req.ids)
        .await?;
    ok(json!({ "details": "marked read" }))
}

pub async fn download(
    State(state): State<AppState>,
    Tenant(id): Tenant,
    JsonBody(media): JsonBody<MediaRef>,
) -> ApiResult {
    let client = state.gateway.sessions.live_handle(id)?;
    let bytes = client.download_media(&media).await?;
    ok(json!({
        "mimeType": media.mime_type,
        "data": BASE64.encode(bytes),
    }))
}
