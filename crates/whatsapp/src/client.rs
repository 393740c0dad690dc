//! Per-tenant WebSocket client to the protocol sidecar.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    futures::{SinkExt, Stream, StreamExt},
    serde::de::DeserializeOwned,
    serde_json::{Value, json},
    tokio::{
        sync::{Mutex, mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, trace, warn},
    url::Url,
    wagate_channels::{
        ChatPresence, ClientFactory, ConnectOutcome, EventSink, MediaRef, OutgoingMessage,
        Presence, ProtocolClient, ProtocolError, ProtocolEvent, SendReceipt, UserCheck,
    },
    wagate_common::{EventKind, TenantId},
};

use crate::frames::{BridgeErrorBody, BridgeFrame, BridgeRequest};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, ProtocolError>>>>>;

// ── Factory ──────────────────────────────────────────────────────────────────

/// Builds one [`BridgeClient`] per session start.
#[derive(Debug, Clone)]
pub struct BridgeFactory {
    base: Url,
    request_timeout: Duration,
}

impl BridgeFactory {
    pub fn new(base: &str, request_timeout: Duration) -> Result<Self, ProtocolError> {
        let base = Url::parse(base)
            .map_err(|e| ProtocolError::Transport(format!("invalid bridge url '{base}': {e}")))?;
        if !matches!(base.scheme(), "ws" | "wss") {
            return Err(ProtocolError::Transport(format!(
                "unsupported bridge scheme '{}'",
                base.scheme()
            )));
        }
        Ok(Self {
            base,
            request_timeout,
        })
    }

    fn session_url(&self, tenant: TenantId) -> String {
        format!(
            "{}/sessions/{tenant}",
            self.base.as_str().trim_end_matches('/')
        )
    }
}

impl ClientFactory for BridgeFactory {
    fn new_client(
        &self,
        tenant: TenantId,
        session_id: Option<String>,
        events: EventSink,
    ) -> Result<Arc<dyn ProtocolClient>, ProtocolError> {
        Ok(Arc::new(BridgeClient::new(
            self.session_url(tenant),
            tenant,
            session_id,
            events,
            self.request_timeout,
        )))
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

struct Connection {
    writer: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

pub struct BridgeClient {
    url: String,
    tenant: TenantId,
    session_id: Arc<RwLock<Option<String>>>,
    events: EventSink,
    pending: Pending,
    next_id: AtomicU64,
    conn: Mutex<Option<Connection>>,
    /// Set while we are closing the socket ourselves, so the reader does not
    /// report the close as a lost connection.
    closing: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl BridgeClient {
    pub fn new(
        url: String,
        tenant: TenantId,
        session_id: Option<String>,
        events: EventSink,
        request_timeout: Duration,
    ) -> Self {
        Self {
            url,
            tenant,
            session_id: Arc::new(RwLock::new(session_id)),
            events,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            conn: Mutex::new(None),
            closing: Arc::new(AtomicBool::new(false)),
            request_timeout,
        }
    }

    async fn open(&self) -> Result<(), ProtocolError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ProtocolError::Transport(format!("bridge connect failed: {e}")))?;
        let (mut sink, stream) = ws.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "bridge write failed");
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        let reader = tokio::spawn(read_loop(stream, ReaderCtx {
            tenant: self.tenant,
            pending: Arc::clone(&self.pending),
            events: self.events.clone(),
            session_id: Arc::clone(&self.session_id),
            closing: Arc::clone(&self.closing),
        }));

        *self.conn.lock().await = Some(Connection {
            writer: tx,
            reader,
            writer_task,
        });
        Ok(())
    }

    async fn close_connection(&self) {
        let Some(conn) = self.conn.lock().await.take() else {
            return;
        };
        let _ = conn.writer.send(Message::Close(None));
        conn.reader.abort();
        drop(conn.writer);
        if tokio::time::timeout(Duration::from_secs(2), conn.writer_task)
            .await
            .is_err()
        {
            debug!(tenant = self.tenant, "bridge writer did not drain in time");
        }
        fail_pending(&self.pending, "connection closed").await;
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProtocolError> {
        let writer = self
            .conn
            .lock()
            .await
            .as_ref()
            .map(|c| c.writer.clone())
            .ok_or(ProtocolError::NotConnected)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_string(&BridgeRequest { id, method, params })
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        trace!(tenant = self.tenant, method, id, "gateway -> bridge");
        if writer.send(Message::text(frame)).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ProtocolError::ConnectionLost("bridge writer closed".into()));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ProtocolError::ConnectionLost("bridge reader dropped".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ProtocolError::Timeout)
            },
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ProtocolError> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value).map_err(|e| {
            ProtocolError::Transport(format!("malformed '{method}' response from bridge: {e}"))
        })
    }

    fn store_session_id(&self, id: Option<String>) {
        if let Ok(mut guard) = self.session_id.write() {
            *guard = id;
        }
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            conn.reader.abort();
            conn.writer_task.abort();
        }
    }
}

#[async_trait]
impl ProtocolClient for BridgeClient {
    async fn connect(&self) -> Result<ConnectOutcome, ProtocolError> {
        // A reconnect reuses the client, so drop whatever socket is left.
        self.closing.store(true, Ordering::SeqCst);
        self.close_connection().await;
        self.closing.store(false, Ordering::SeqCst);

        self.open().await?;

        let stored = self.session_id();
        let result = match self
            .request("connect", json!({ "sessionId": stored }))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.closing.store(true, Ordering::SeqCst);
                self.close_connection().await;
                return Err(e);
            },
        };

        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string);
        if session_id.is_some() {
            self.store_session_id(session_id.clone());
        }
        debug!(tenant = self.tenant, paired = session_id.is_some(), "bridge session open");
        Ok(ConnectOutcome { session_id })
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        self.closing.store(true, Ordering::SeqCst);
        if self.conn.lock().await.is_none() {
            return Ok(());
        }
        let result = self.request("disconnect", json!({})).await;
        self.close_connection().await;
        match result {
            Ok(_) | Err(ProtocolError::ConnectionLost(_) | ProtocolError::NotConnected) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        self.request("logout", json!({})).await?;
        self.store_session_id(None);
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().ok().and_then(|g| g.clone())
    }

    async fn send_message(&self, message: OutgoingMessage) -> Result<SendReceipt, ProtocolError> {
        let params =
            serde_json::to_value(&message).map_err(|e| ProtocolError::Transport(e.to_string()))?;
        self.call("sendMessage", params).await
    }

    async fn set_presence(&self, presence: Presence) -> Result<(), ProtocolError> {
        self.request("setPresence", json!({ "presence": presence }))
            .await
            .map(|_| ())
    }

    async fn send_chat_presence(
        &self,
        chat: &str,
        presence: ChatPresence,
    ) -> Result<(), ProtocolError> {
        self.request("sendChatPresence", json!({ "chat": chat, "presence": presence }))
            .await
            .map(|_| ())
    }

    async fn mark_read(
        &self,
        chat: &str,
        sender: Option<&str>,
        message_ids: &[String],
    ) -> Result<(), ProtocolError> {
        self.request(
            "markRead",
            json!({ "chat": chat, "sender": sender, "ids": message_ids }),
        )
        .await
        .map(|_| ())
    }

    async fn check_users(&self, phones: &[String]) -> Result<Vec<UserCheck>, ProtocolError> {
        self.call("checkUsers", json!({ "phones": phones })).await
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>, ProtocolError> {
        let params =
            serde_json::to_value(media).map_err(|e| ProtocolError::Transport(e.to_string()))?;
        let result = self.request("downloadMedia", params).await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Transport("downloadMedia returned no data".into()))?;
        BASE64
            .decode(data)
            .map_err(|e| ProtocolError::Transport(format!("invalid media encoding: {e}")))
    }

    async fn pair_phone(&self, phone: &str) -> Result<String, ProtocolError> {
        let result = self.request("pairPhone", json!({ "phone": phone })).await?;
        result
            .get("code")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProtocolError::Transport("pairPhone returned no code".into()))
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

struct ReaderCtx {
    tenant: TenantId,
    pending: Pending,
    events: EventSink,
    session_id: Arc<RwLock<Option<String>>>,
    closing: Arc<AtomicBool>,
}

impl ReaderCtx {
    async fn handle_text(&self, text: &str) {
        trace!(tenant = self.tenant, raw = %text, "bridge -> gateway");
        match serde_json::from_str::<BridgeFrame>(text) {
            Ok(BridgeFrame::Response { id, result, error }) => {
                let outcome = match error {
                    Some(err) => Err(remote_error(err)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                match self.pending.lock().await.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    },
                    None => warn!(tenant = self.tenant, id, "response for unknown request id"),
                }
            },
            Ok(BridgeFrame::Event { event, data }) => {
                let event = ProtocolEvent::new(event, data);
                if let Some(id) = event.paired_session_id() {
                    self.set_session_id(Some(id.to_string()));
                } else if event.kind == EventKind::LoggedOut {
                    self.set_session_id(None);
                }
                self.events.emit(event);
            },
            Err(e) => warn!(tenant = self.tenant, error = %e, "unparseable bridge frame"),
        }
    }

    fn set_session_id(&self, id: Option<String>) {
        if let Ok(mut guard) = self.session_id.write() {
            *guard = id;
        }
    }
}

async fn read_loop<S, E>(mut stream: S, ctx: ReaderCtx)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => ctx.handle_text(text.as_str()).await,
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by bridge".into());
            },
            Some(Ok(_)) => {},
            Some(Err(e)) => break e.to_string(),
            None => break "bridge stream ended".into(),
        }
    };

    fail_pending(&ctx.pending, &reason).await;
    if !ctx.closing.load(Ordering::SeqCst) {
        debug!(tenant = ctx.tenant, %reason, "bridge connection lost");
        ctx.events.emit(ProtocolEvent::connection_lost(reason));
    }
}

async fn fail_pending(pending: &Pending, reason: &str) {
    for (_, tx) in pending.lock().await.drain() {
        let _ = tx.send(Err(ProtocolError::ConnectionLost(reason.to_string())));
    }
}

fn remote_error(err: BridgeErrorBody) -> ProtocolError {
    match err.code.as_deref() {
        Some("pairing_failed") => ProtocolError::PairingFailed(err.message),
        Some("not_connected") => ProtocolError::NotConnected,
        _ => ProtocolError::Rejected(err.message),
    }
}
