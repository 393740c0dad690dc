use {
    serde::Serialize,
    wagate_common::{EventSet, TenantId, generate_token},
};

/// A single tenant row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRecord {
    pub id: TenantId,
    pub name: String,
    pub token: String,
    pub webhook: Option<String>,
    /// Opaque protocol session id assigned once the account is paired.
    pub session_id: Option<String>,
    /// Latest pairing QR code, present only while pairing is in progress.
    pub qrcode: Option<String>,
    pub connected: bool,
    /// Account expiry in unix seconds.
    pub expiration: Option<i64>,
    pub events: EventSet,
}

impl TenantRecord {
    /// A disconnected, unpaired tenant subscribed to every event.
    pub fn new(id: TenantId, name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            token: token.into(),
            webhook: None,
            session_id: None,
            qrcode: None,
            connected: false,
            expiration: None,
            events: EventSet::All,
        }
    }

    pub fn is_expired(&self, now_secs: i64) -> bool {
        self.expiration.is_some_and(|exp| exp > 0 && exp <= now_secs)
    }

    /// Public view for admin listings; never includes the QR code.
    pub fn summary(&self) -> TenantSummary {
        TenantSummary {
            id: self.id,
            name: self.name.clone(),
            token: self.token.clone(),
            webhook: self.webhook.clone(),
            session_id: self.session_id.clone(),
            connected: self.connected,
            expiration: self.expiration,
            events: self.events.tags(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSummary {
    pub id: TenantId,
    pub name: String,
    pub token: String,
    pub webhook: Option<String>,
    pub session_id: Option<String>,
    pub connected: bool,
    pub expiration: Option<i64>,
    pub events: Vec<String>,
}

/// Input of the admin create operation.
#[derive(Debug, Clone, Default)]
pub struct NewTenant {
    pub name: String,
    /// Generated when absent.
    pub token: Option<String>,
    pub webhook: Option<String>,
    pub expiration: Option<i64>,
    pub events: EventSet,
}

impl NewTenant {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook = Some(url.into());
        self
    }

    pub fn with_events(mut self, events: EventSet) -> Self {
        self.events = events;
        self
    }

    pub(crate) fn resolved_token(&self) -> String {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(generate_token)
    }
}

/// Partial update; `None` leaves a field untouched, `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub webhook: Option<Option<String>>,
    pub events: Option<EventSet>,
    pub expiration: Option<Option<i64>>,
}

impl TenantUpdate {
    pub fn apply(&self, record: &mut TenantRecord) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(webhook) = &self.webhook {
            record.webhook = webhook.clone().filter(|w| !w.is_empty());
        }
        if let Some(events) = &self.events {
            record.events = events.clone();
        }
        if let Some(expiration) = self.expiration {
            record.expiration = expiration;
        }
    }
}
