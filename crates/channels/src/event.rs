use {
    serde::Serialize,
    serde_json::{Value, json},
    tokio::sync::mpsc,
    wagate_common::EventKind,
};

/// One inbound event produced by a protocol client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Value,
}

impl ProtocolEvent {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    pub fn qr(code: impl Into<String>) -> Self {
        Self::new(EventKind::Qr, json!({ "code": code.into() }))
    }

    pub fn pair_success(session_id: impl Into<String>) -> Self {
        Self::new(EventKind::PairSuccess, json!({ "sessionId": session_id.into() }))
    }

    pub fn connected() -> Self {
        Self::new(EventKind::Connected, json!({}))
    }

    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::new(EventKind::Disconnected, json!({ "reason": reason.into() }))
    }

    pub fn logged_out(reason: impl Into<String>) -> Self {
        Self::new(EventKind::LoggedOut, json!({ "reason": reason.into() }))
    }

    /// QR code carried by a `QR` event.
    pub fn qr_code(&self) -> Option<&str> {
        (self.kind == EventKind::Qr)
            .then(|| self.payload.get("code").and_then(Value::as_str))
            .flatten()
    }

    /// Session id carried by a `PairSuccess` event.
    pub fn paired_session_id(&self) -> Option<&str> {
        (self.kind == EventKind::PairSuccess)
            .then(|| self.payload.get("sessionId").and_then(Value::as_str))
            .flatten()
    }

    pub fn reason(&self) -> &str {
        self.payload
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("unspecified")
    }
}

/// Sending half handed to a protocol client. Never blocks.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ProtocolEvent>,
}

impl EventSink {
    /// Push an event; returns false once the session has gone away.
    pub fn emit(&self, event: ProtocolEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half drained by the session's event task.
pub type EventStream = mpsc::UnboundedReceiver<ProtocolEvent>;

pub fn event_channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_accessors() {
        assert_eq!(ProtocolEvent::qr("2@abc").qr_code(), Some("2@abc"));
        assert_eq!(
            ProtocolEvent::pair_success("123@s.whatsapp.net").paired_session_id(),
            Some("123@s.whatsapp.net")
        );
        assert!(ProtocolEvent::connected().qr_code().is_none());
        assert_eq!(ProtocolEvent::connection_lost("eof").reason(), "eof");
    }

    #[test]
    fn serializes_type_tag() {
        let v = serde_json::to_value(ProtocolEvent::qr("x")).unwrap();
        assert_eq!(v["type"], "QR");
        assert_eq!(v["payload"]["code"], "x");
    }

    #[tokio::test]
    async fn sink_reports_dropped_receiver() {
        let (sink, rx) = event_channel();
        assert!(sink.emit(ProtocolEvent::connected()));
        drop(rx);
        assert!(!sink.emit(ProtocolEvent::connected()));
        assert!(sink.is_closed());
    }
}
