use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    wagate_common::EventKind,
};

/// Gateway → sidecar request.
#[derive(Debug, Serialize)]
pub struct BridgeRequest<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BridgeErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

/// Sidecar → gateway frame: either the answer to a request or a pushed event.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BridgeFrame {
    Response {
        id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<BridgeErrorBody>,
    },
    Event {
        event: EventKind,
        #[serde(default)]
        data: Value,
    },
}
