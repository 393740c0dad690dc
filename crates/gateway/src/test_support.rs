//! Scriptable protocol client for gateway tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    wagate_channels::{
        ChatPresence, ClientFactory, ConnectOutcome, EventSink, MediaRef, OutgoingMessage,
        Presence, ProtocolClient, ProtocolError, ProtocolEvent, SendReceipt, UserCheck,
    },
    wagate_common::TenantId,
    wagate_config::{SessionsConfig, WebhooksConfig},
    wagate_tenants::TenantStore,
};

use crate::{
    router::EventRouter,
    session::{SessionManager, SessionState, SessionTimings},
};

#[derive(Default)]
struct Script {
    session_id: Option<String>,
    connect_delay: Duration,
    disconnect_delay: Duration,
    failing: HashSet<TenantId>,
}

#[derive(Default)]
struct Inner {
    script: Mutex<Script>,
    clients: Mutex<HashMap<TenantId, Vec<Arc<FakeClient>>>>,
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    inner: Arc<Inner>,
}

impl FakeFactory {
    /// Clients report `session_id` as already paired.
    pub fn paired(session_id: &str) -> Self {
        let f = Self::default();
        f.inner.script.lock().unwrap().session_id = Some(session_id.to_string());
        f
    }

    /// Clients connect without a session and wait for pairing events.
    pub fn unpaired() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.inner.script.lock().unwrap().connect_delay = delay;
        self
    }

    pub fn with_disconnect_delay(self, delay: Duration) -> Self {
        self.inner.script.lock().unwrap().disconnect_delay = delay;
        self
    }

    /// Every connect for `tenant` is refused.
    pub fn failing_for(self, tenant: TenantId) -> Self {
        self.inner.script.lock().unwrap().failing.insert(tenant);
        self
    }

    /// Most recent client built for `tenant`.
    pub fn client(&self, tenant: TenantId) -> Arc<FakeClient> {
        let clients = self.inner.clients.lock().unwrap();
        Arc::clone(clients[&tenant].last().unwrap())
    }

    pub fn created(&self, tenant: TenantId) -> usize {
        self.inner
            .clients
            .lock()
            .unwrap()
            .get(&tenant)
            .map_or(0, Vec::len)
    }
}

impl ClientFactory for FakeFactory {
    fn new_client(
        &self,
        tenant: TenantId,
        session_id: Option<String>,
        events: EventSink,
    ) -> Result<Arc<dyn ProtocolClient>, ProtocolError> {
        let script = self.inner.script.lock().unwrap();
        let client = Arc::new(FakeClient {
            events,
            session_id: Mutex::new(session_id.or_else(|| script.session_id.clone())),
            connect_delay: script.connect_delay,
            disconnect_delay: script.disconnect_delay,
            fail_connects: AtomicU32::new(if script.failing.contains(&tenant) {
                u32::MAX
            } else {
                0
            }),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        });
        self.inner
            .clients
            .lock()
            .unwrap()
            .entry(tenant)
            .or_default()
            .push(Arc::clone(&client));
        Ok(client)
    }
}

pub struct FakeClient {
    events: EventSink,
    session_id: Mutex<Option<String>>,
    connect_delay: Duration,
    disconnect_delay: Duration,
    fail_connects: AtomicU32,
    connects: AtomicU32,
    disconnects: AtomicU32,
    sent: Mutex<Vec<OutgoingMessage>>,
}

impl FakeClient {
    pub fn emit(&self, event: ProtocolEvent) -> bool {
        self.events.emit(event)
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// True once the session's event loop has dropped its receiver.
    pub fn events_closed(&self) -> bool {
        self.events.is_closed()
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    async fn connect(&self) -> Result<ConnectOutcome, ProtocolError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let failing = self
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProtocolError::ConnectionLost("scripted failure".into()));
        }
        Ok(ConnectOutcome {
            session_id: self.session_id(),
        })
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if !self.disconnect_delay.is_zero() {
            tokio::time::sleep(self.disconnect_delay).await;
        }
        Ok(())
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        *self.session_id.lock().unwrap() = None;
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.lock().unwrap().clone()
    }

    async fn send_message(&self, message: OutgoingMessage) -> Result<SendReceipt, ProtocolError> {
        let message_id = message.id.clone().unwrap_or_else(|| "3EB0FAKE".into());
        self.sent.lock().unwrap().push(message);
        Ok(SendReceipt {
            message_id,
            timestamp: 1_700_000_000,
        })
    }

    async fn set_presence(&self, _presence: Presence) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn send_chat_presence(&self, _chat: &str, _presence: ChatPresence) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn mark_read(
        &self,
        _chat: &str,
        _sender: Option<&str>,
        _message_ids: &[String],
    ) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn check_users(&self, phones: &[String]) -> Result<Vec<UserCheck>, ProtocolError> {
        Ok(phones
            .iter()
            .map(|p| UserCheck {
                query: p.clone(),
                is_registered: !p.starts_with('0'),
                jid: (!p.starts_with('0')).then(|| format!("{p}@s.whatsapp.net")),
            })
            .collect())
    }

    async fn download_media(&self, _media: &MediaRef) -> Result<Vec<u8>, ProtocolError> {
        Ok(b"media-bytes".to_vec())
    }

    async fn pair_phone(&self, _phone: &str) -> Result<String, ProtocolError> {
        Ok("ABCD-EFGH".into())
    }
}

pub fn manager_with(store: Arc<dyn TenantStore>, factory: FakeFactory) -> Arc<SessionManager> {
    let router = Arc::new(EventRouter::new(&WebhooksConfig::default()));
    Arc::new(SessionManager::new(
        store,
        Arc::new(factory),
        router,
        SessionTimings::from(&SessionsConfig::default()),
    ))
}

pub async fn wait_for_state(manager: &SessionManager, tenant: TenantId, state: SessionState) {
    for _ in 0..10_000 {
        if manager.state(tenant) == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("tenant {tenant} never reached {state:?}, stuck in {:?}", manager.state(tenant));
}
