use serde::Serialize;

/// Stable tenant identifier (the `users.id` primary key).
pub type TenantId = i64;

/// Generate a fresh opaque auth token.
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Uniform JSON response body used by the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct ApiEnvelope {
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

impl ApiEnvelope {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            code: 200,
            data: Some(data),
            error: None,
            success: true,
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            data: None,
            error: Some(message.into()),
            success: false,
        }
    }
}
