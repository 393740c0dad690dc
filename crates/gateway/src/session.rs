//! Tenant session lifecycle.
//!
//! One entry per tenant with a live or pending connection. `start`, `stop` and
//! `logout` for a tenant are serialized by a per-tenant lock; different
//! tenants never wait on each other. A `stop` arriving while `start` is still
//! connecting cancels the pending connect instead of queueing behind it.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    dashmap::DashMap,
    futures::future::join_all,
    serde::Serialize,
    tokio::{sync::Mutex, task::JoinHandle, time::timeout},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    wagate_channels::{ClientFactory, EventStream, ProtocolClient, event_channel},
    wagate_common::{EventKind, TenantId},
    wagate_config::SessionsConfig,
    wagate_tenants::{TenantError, TenantStore},
};

use crate::{
    error::SessionError,
    router::{EventRouter, WebhookTarget},
    supervisor::{self, BackoffPolicy, Recovery},
};

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Absent,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Operator asked for the session to end. Clears the connected flag so
    /// the tenant is not resumed on the next boot.
    OperatorRequested,
    /// Process shutdown. The connected flag is left for the next boot.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub generation: Option<u64>,
}

impl SessionStatus {
    fn absent() -> Self {
        Self {
            state: SessionState::Absent,
            session_id: None,
            generation: None,
        }
    }
}

struct SessionEntry {
    generation: u64,
    state: SessionState,
    cancel: CancellationToken,
    client: Option<Arc<dyn ProtocolClient>>,
    stop_requested: bool,
    task: Option<JoinHandle<()>>,
    qr: Option<String>,
    /// Connection loss reported before `connect` returned.
    lost_while_connecting: Option<String>,
}

/// Timeouts and retry policy for session operations.
#[derive(Debug, Clone)]
pub struct SessionTimings {
    pub connect_timeout: Duration,
    pub stop_timeout: Duration,
    pub reconnect: BackoffPolicy,
}

impl From<&SessionsConfig> for SessionTimings {
    fn from(config: &SessionsConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            stop_timeout: config.stop_timeout(),
            reconnect: BackoffPolicy::from(config),
        }
    }
}

// ── Manager ──────────────────────────────────────────────────────────────────

pub struct SessionManager {
    sessions: DashMap<TenantId, SessionEntry>,
    locks: DashMap<TenantId, Arc<Mutex<()>>>,
    store: Arc<dyn TenantStore>,
    factory: Arc<dyn ClientFactory>,
    router: Arc<EventRouter>,
    timings: SessionTimings,
    generations: AtomicU64,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn TenantStore>,
        factory: Arc<dyn ClientFactory>,
        router: Arc<EventRouter>,
        timings: SessionTimings,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            locks: DashMap::new(),
            store,
            factory,
            router,
            timings,
            generations: AtomicU64::new(0),
        }
    }

    pub fn timings(&self) -> &SessionTimings {
        &self.timings
    }

    pub fn store(&self) -> &Arc<dyn TenantStore> {
        &self.store
    }

    fn lock_for(&self, tenant: TenantId) -> Arc<Mutex<()>> {
        self.locks.entry(tenant).or_default().value().clone()
    }

    #[cfg(test)]
    pub(crate) fn has_lock(&self, tenant: TenantId) -> bool {
        self.locks.contains_key(&tenant)
    }

    /// Drop the per-tenant lock of a tenant with no session and no caller
    /// waiting on it. Used once a tenant is deleted or turns out not to exist.
    pub fn forget(&self, tenant: TenantId) {
        if self.sessions.contains_key(&tenant) {
            return;
        }
        self.locks
            .remove_if(&tenant, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Connect `tenant` to the protocol network.
    ///
    /// Fails with `AlreadyActive` when any entry exists for the tenant. On
    /// failure the tenant is left absent.
    pub async fn start(self: &Arc<Self>, tenant: TenantId) -> Result<SessionStatus, SessionError> {
        if self.sessions.contains_key(&tenant) {
            return Err(SessionError::AlreadyActive(tenant));
        }
        let lock = self.lock_for(tenant);
        let guard = lock.lock().await;
        if self.sessions.contains_key(&tenant) {
            return Err(SessionError::AlreadyActive(tenant));
        }

        let Some(record) = self.store.get_by_id(tenant).await? else {
            drop(guard);
            drop(lock);
            self.forget(tenant);
            return Err(SessionError::TenantNotFound(tenant));
        };

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let (sink, events) = event_channel();
        let client = self
            .factory
            .new_client(tenant, record.session_id.clone(), sink)?;

        self.router.register(tenant, WebhookTarget::from_record(&record));
        let task = tokio::spawn(Arc::clone(self).run_events(
            tenant,
            generation,
            Arc::clone(&client),
            events,
            cancel.clone(),
        ));
        self.sessions.insert(tenant, SessionEntry {
            generation,
            state: SessionState::Connecting,
            cancel: cancel.clone(),
            client: Some(Arc::clone(&client)),
            stop_requested: false,
            task: Some(task),
            qr: None,
            lost_while_connecting: None,
        });
        info!(tenant, generation, paired = record.session_id.is_some(), "starting session");

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            res = timeout(self.timings.connect_timeout, client.connect()) => match res {
                Ok(Ok(outcome)) => Ok(outcome),
                Ok(Err(e)) => Err(SessionError::from(e)),
                Err(_) => Err(SessionError::ConnectTimeout),
            },
        };
        let connected =
            connected.and_then(|outcome| self.promote(tenant, generation).map(|()| outcome));

        match connected {
            Ok(outcome) => {
                let session_id = outcome.session_id.or_else(|| client.session_id());
                self.advisory(tenant, "connected flag", self.store.set_connected(tenant, true))
                    .await;
                if session_id.is_some() && session_id != record.session_id {
                    self.advisory(
                        tenant,
                        "session id",
                        self.store.set_session_id(tenant, session_id.as_deref()),
                    )
                    .await;
                }
                info!(tenant, generation, paired = session_id.is_some(), "session connected");
                Ok(self.status(tenant))
            },
            Err(e) => {
                warn!(tenant, generation, error = %e, "session start failed");
                self.release(tenant, generation).await;
                Err(e)
            },
        }
    }

    /// End the session of `tenant`.
    ///
    /// The protocol client gets `stop_timeout` to acknowledge the disconnect;
    /// past that the handle is released anyway and a warning is logged.
    pub async fn stop(self: &Arc<Self>, tenant: TenantId, reason: StopReason) -> Result<(), SessionError> {
        let cancelled_pending = match self.sessions.get_mut(&tenant) {
            Some(mut entry) if entry.state == SessionState::Connecting => {
                entry.stop_requested = true;
                entry.cancel.cancel();
                true
            },
            Some(_) => false,
            None => return Err(SessionError::NotActive(tenant)),
        };

        let lock = self.lock_for(tenant);
        let _guard = lock.lock().await;

        let taken = self.sessions.get_mut(&tenant).map(|mut entry| {
            entry.state = SessionState::Disconnecting;
            entry.stop_requested = true;
            entry.cancel.cancel();
            (entry.generation, entry.client.take(), entry.task.take())
        });
        let Some((generation, client, task)) = taken else {
            if cancelled_pending {
                self.persist_stopped(tenant, reason).await;
                info!(tenant, ?reason, "pending session start cancelled");
                return Ok(());
            }
            return Err(SessionError::NotActive(tenant));
        };

        if let Some(client) = client {
            match timeout(self.timings.stop_timeout, client.disconnect()).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => warn!(tenant, error = %e, "protocol client failed to disconnect cleanly"),
                Err(_) => warn!(
                    tenant,
                    timeout_secs = self.timings.stop_timeout.as_secs(),
                    "protocol client did not acknowledge disconnect, releasing handle; the remote side may still consider it connected"
                ),
            }
        }
        if let Some(task) = task {
            self.join_event_task(tenant, task).await;
        }
        self.sessions.remove_if(&tenant, |_, e| e.generation == generation);
        self.router.close(tenant);
        self.persist_stopped(tenant, reason).await;
        info!(tenant, generation, ?reason, "session stopped");
        Ok(())
    }

    /// Unlink the device, then stop the session.
    pub async fn logout(self: &Arc<Self>, tenant: TenantId) -> Result<(), SessionError> {
        let client = self.live_handle(tenant)?;
        client.logout().await?;
        self.advisory(tenant, "session id", self.store.set_session_id(tenant, None))
            .await;
        match self.stop(tenant, StopReason::OperatorRequested).await {
            // The logged-out event may have torn the session down first.
            Err(SessionError::NotActive(_)) => {
                self.persist_stopped(tenant, StopReason::OperatorRequested)
                    .await;
                Ok(())
            },
            other => other,
        }
    }

    pub fn status(&self, tenant: TenantId) -> SessionStatus {
        match self.sessions.get(&tenant) {
            Some(entry) => SessionStatus {
                state: entry.state,
                session_id: entry.client.as_ref().and_then(|c| c.session_id()),
                generation: Some(entry.generation),
            },
            None => SessionStatus::absent(),
        }
    }

    pub fn state(&self, tenant: TenantId) -> SessionState {
        self.sessions
            .get(&tenant)
            .map_or(SessionState::Absent, |e| e.state)
    }

    /// Client handle for data-plane calls. Only available while connected.
    pub fn live_handle(&self, tenant: TenantId) -> Result<Arc<dyn ProtocolClient>, SessionError> {
        self.sessions
            .get(&tenant)
            .filter(|e| e.state == SessionState::Connected)
            .and_then(|e| e.client.clone())
            .ok_or(SessionError::NotActive(tenant))
    }

    /// Latest pairing QR code seen for an active session.
    pub fn qr(&self, tenant: TenantId) -> Option<String> {
        self.sessions.get(&tenant).and_then(|e| e.qr.clone())
    }

    /// Tenants with an entry in any state.
    pub fn active(&self) -> Vec<TenantId> {
        let mut ids: Vec<_> = self.sessions.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Stop every session, bounded by `deadline` overall. Returns the tenants
    /// still present when the deadline passed.
    pub async fn shutdown(self: &Arc<Self>, deadline: Duration) -> Vec<TenantId> {
        let tenants = self.active();
        if tenants.is_empty() {
            return tenants;
        }
        info!(sessions = tenants.len(), "stopping sessions");
        let stops = tenants.iter().map(|&tenant| {
            let manager = Arc::clone(self);
            async move { (tenant, manager.stop(tenant, StopReason::Shutdown).await) }
        });
        match timeout(deadline, join_all(stops)).await {
            Ok(results) => {
                for (tenant, result) in results {
                    if let Err(e) = result {
                        debug!(tenant, error = %e, "session already gone during shutdown");
                    }
                }
                Vec::new()
            },
            Err(_) => {
                let abandoned = self.active();
                for tenant in &abandoned {
                    warn!(tenant, "session not stopped before shutdown deadline, abandoning");
                }
                abandoned
            },
        }
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Move `tenant` between states if the entry still belongs to
    /// `generation` and no stop has been requested.
    pub(crate) fn transition(
        &self,
        tenant: TenantId,
        generation: u64,
        from: SessionState,
        to: SessionState,
    ) -> bool {
        match self.sessions.get_mut(&tenant) {
            Some(mut entry)
                if entry.generation == generation
                    && entry.state == from
                    && !entry.stop_requested =>
            {
                entry.state = to;
                debug!(tenant, generation, ?from, ?to, "session state change");
                true
            },
            _ => false,
        }
    }

    /// Finish a start: `connecting → connected`, unless the connection was
    /// reported lost while `connect` was still pending.
    fn promote(&self, tenant: TenantId, generation: u64) -> Result<(), SessionError> {
        let Some(mut entry) = self.sessions.get_mut(&tenant) else {
            return Err(SessionError::PairingFailed("session ended while connecting".into()));
        };
        if entry.generation != generation
            || entry.state != SessionState::Connecting
            || entry.stop_requested
        {
            return Err(SessionError::Cancelled);
        }
        if let Some(reason) = entry.lost_while_connecting.take() {
            return Err(SessionError::ConnectionLost(reason));
        }
        entry.state = SessionState::Connected;
        debug!(tenant, generation, "session state change to connected");
        Ok(())
    }

    fn is_current(&self, tenant: TenantId, generation: u64) -> bool {
        self.sessions
            .get(&tenant)
            .is_some_and(|e| e.generation == generation && !e.stop_requested)
    }

    /// Tear down a failed start. Caller holds the tenant lock.
    async fn release(&self, tenant: TenantId, generation: u64) {
        let Some((_, mut entry)) = self
            .sessions
            .remove_if(&tenant, |_, e| e.generation == generation)
        else {
            return;
        };
        entry.cancel.cancel();
        if let Some(client) = entry.client.take()
            && timeout(self.timings.stop_timeout, client.disconnect())
                .await
                .is_err()
        {
            warn!(tenant, "protocol client did not acknowledge disconnect after failed start");
        }
        if let Some(task) = entry.task.take() {
            self.join_event_task(tenant, task).await;
        }
        self.router.close(tenant);
    }

    /// Tear down from inside the event task after the connection is gone for
    /// good. Does not take the tenant lock, removal is guarded by generation.
    async fn retire(&self, tenant: TenantId, generation: u64, why: &str) {
        let Some((_, entry)) = self
            .sessions
            .remove_if(&tenant, |_, e| e.generation == generation && !e.stop_requested)
        else {
            return;
        };
        entry.cancel.cancel();
        self.router.close(tenant);
        if let Some(client) = entry.client
            && timeout(self.timings.stop_timeout, client.disconnect())
                .await
                .is_err()
        {
            warn!(tenant, "protocol client did not acknowledge disconnect while retiring");
        }
        self.advisory(tenant, "connected flag", self.store.set_connected(tenant, false))
            .await;
        self.advisory(tenant, "qr code", self.store.set_qrcode(tenant, None))
            .await;
        warn!(tenant, generation, reason = why, "session ended");
    }

    async fn join_event_task(&self, tenant: TenantId, mut task: JoinHandle<()>) {
        if timeout(self.timings.stop_timeout, &mut task).await.is_err() {
            warn!(tenant, "session event task did not finish in time, aborting it");
            task.abort();
        }
    }

    async fn persist_stopped(&self, tenant: TenantId, reason: StopReason) {
        if reason == StopReason::OperatorRequested {
            self.advisory(tenant, "connected flag", self.store.set_connected(tenant, false))
                .await;
        }
        self.advisory(tenant, "qr code", self.store.set_qrcode(tenant, None))
            .await;
    }

    /// Store writes that must not fail the operation that triggered them.
    async fn advisory(
        &self,
        tenant: TenantId,
        what: &'static str,
        write: impl Future<Output = Result<(), TenantError>>,
    ) {
        if let Err(e) = write.await {
            warn!(tenant, field = what, error = %e, "failed to persist session bookkeeping");
        }
    }

    async fn run_events(
        self: Arc<Self>,
        tenant: TenantId,
        generation: u64,
        client: Arc<dyn ProtocolClient>,
        mut events: EventStream,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = events.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };
            self.router.dispatch(tenant, &event);

            match event.kind {
                EventKind::Qr => {
                    let Some(code) = event.qr_code() else { continue };
                    if let Some(mut entry) = self.sessions.get_mut(&tenant)
                        && entry.generation == generation
                    {
                        entry.qr = Some(code.to_string());
                    }
                    self.advisory(tenant, "qr code", self.store.set_qrcode(tenant, Some(code)))
                        .await;
                },
                EventKind::PairSuccess => {
                    let Some(session_id) = event.paired_session_id() else { continue };
                    info!(tenant, session_id, "device paired");
                    if let Some(mut entry) = self.sessions.get_mut(&tenant)
                        && entry.generation == generation
                    {
                        entry.qr = None;
                    }
                    self.advisory(
                        tenant,
                        "session id",
                        self.store.set_session_id(tenant, Some(session_id)),
                    )
                    .await;
                    self.advisory(tenant, "qr code", self.store.set_qrcode(tenant, None))
                        .await;
                },
                EventKind::LoggedOut => {
                    if cancel.is_cancelled() || !self.is_current(tenant, generation) {
                        break;
                    }
                    info!(tenant, reason = event.reason(), "device logged out remotely");
                    self.advisory(tenant, "session id", self.store.set_session_id(tenant, None))
                        .await;
                    self.retire(tenant, generation, "logged out").await;
                    break;
                },
                EventKind::Disconnected => {
                    if cancel.is_cancelled() || !self.is_current(tenant, generation) {
                        break;
                    }
                    if let Some(mut entry) = self.sessions.get_mut(&tenant)
                        && entry.generation == generation
                        && entry.state == SessionState::Connecting
                    {
                        // `start` turns this into its own failure.
                        entry.lost_while_connecting = Some(event.reason().to_string());
                        continue;
                    }
                    if self.state(tenant) != SessionState::Connected {
                        continue;
                    }
                    warn!(tenant, reason = event.reason(), "connection lost");
                    match supervisor::recover(&self, tenant, generation, &client, &cancel).await {
                        Recovery::Reconnected => {},
                        Recovery::Cancelled => break,
                        Recovery::Exhausted => {
                            self.retire(tenant, generation, "reconnect attempts exhausted")
                                .await;
                            break;
                        },
                    }
                },
                _ => {},
            }
        }
        debug!(tenant, generation, "session event loop finished");
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::test_support::{FakeFactory, manager_with, wait_for_state},
        wagate_channels::ProtocolEvent,
        wagate_tenants::{MemoryTenantStore, TenantRecord},
    };

    async fn store_with(ids: &[TenantId]) -> Arc<MemoryTenantStore> {
        let store = Arc::new(MemoryTenantStore::new());
        for &id in ids {
            store
                .insert(TenantRecord::new(id, format!("t{id}"), format!("tok{id}")))
                .await;
        }
        store
    }

    #[tokio::test(start_paused = true)]
    async fn start_then_stop_round_trip() {
        let store = store_with(&[1]).await;
        let factory = FakeFactory::paired("111@s.whatsapp.net");
        let manager = manager_with(store.clone(), factory.clone());

        let status = manager.start(1).await.unwrap();
        assert_eq!(status.state, SessionState::Connected);
        assert_eq!(status.session_id.as_deref(), Some("111@s.whatsapp.net"));
        let rec = store.get_by_id(1).await.unwrap().unwrap();
        assert!(rec.connected);
        assert_eq!(rec.session_id.as_deref(), Some("111@s.whatsapp.net"));

        manager.stop(1, StopReason::OperatorRequested).await.unwrap();
        assert_eq!(manager.state(1), SessionState::Absent);
        assert!(!store.get_by_id(1).await.unwrap().unwrap().connected);
        assert_eq!(factory.client(1).disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected() {
        let manager = manager_with(store_with(&[1]).await, FakeFactory::paired("a@s"));
        manager.start(1).await.unwrap();
        assert_eq!(manager.start(1).await, Err(SessionError::AlreadyActive(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_starts_yield_one_session() {
        let factory = FakeFactory::paired("a@s");
        let manager = manager_with(store_with(&[1]).await, factory.clone());
        let results = join_all((0..10).map(|_| {
            let m = Arc::clone(&manager);
            async move { m.start(1).await }
        }))
        .await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| *e == SessionError::AlreadyActive(1)));
        assert_eq!(factory.created(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_session_is_not_active() {
        let manager = manager_with(store_with(&[1]).await, FakeFactory::paired("a@s"));
        assert_eq!(
            manager.stop(1, StopReason::OperatorRequested).await,
            Err(SessionError::NotActive(1))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_tenant_cannot_start() {
        let manager = manager_with(store_with(&[]).await, FakeFactory::paired("a@s"));
        assert_eq!(manager.start(9).await, Err(SessionError::TenantNotFound(9)));
        assert_eq!(manager.state(9), SessionState::Absent);
        assert!(!manager.locks.contains_key(&9));
    }

    #[tokio::test(start_paused = true)]
    async fn forget_drops_lock_of_stopped_tenant() {
        let manager = manager_with(store_with(&[1]).await, FakeFactory::paired("a@s"));
        manager.start(1).await.unwrap();
        manager.forget(1);
        assert!(manager.locks.contains_key(&1));

        manager.stop(1, StopReason::OperatorRequested).await.unwrap();
        manager.forget(1);
        assert!(!manager.locks.contains_key(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_leaves_tenant_absent() {
        let factory = FakeFactory::paired("a@s").with_connect_delay(Duration::from_secs(3600));
        let manager = manager_with(store_with(&[1]).await, factory);
        assert_eq!(manager.start(1).await, Err(SessionError::ConnectTimeout));
        assert_eq!(manager.state(1), SessionState::Absent);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_start() {
        let store = store_with(&[1]).await;
        let factory = FakeFactory::paired("a@s").with_connect_delay(Duration::from_secs(20));
        let manager = manager_with(store.clone(), factory);
        let starting = {
            let m = Arc::clone(&manager);
            tokio::spawn(async move { m.start(1).await })
        };
        wait_for_state(&manager, 1, SessionState::Connecting).await;

        manager.stop(1, StopReason::OperatorRequested).await.unwrap();
        assert_eq!(starting.await.unwrap(), Err(SessionError::Cancelled));
        assert_eq!(manager.state(1), SessionState::Absent);
        assert!(!store.get_by_id(1).await.unwrap().unwrap().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_disconnect_still_releases() {
        let factory = FakeFactory::paired("a@s").with_disconnect_delay(Duration::from_secs(3600));
        let manager = manager_with(store_with(&[1]).await, factory.clone());
        manager.start(1).await.unwrap();
        let first = factory.client(1);
        manager.stop(1, StopReason::OperatorRequested).await.unwrap();
        assert_eq!(manager.state(1), SessionState::Absent);
        assert_eq!(first.disconnects(), 1);
        assert!(first.events_closed());

        manager.start(1).await.unwrap();
        assert_eq!(factory.created(1), 2);
        assert!(!Arc::ptr_eq(&first, &factory.client(1)));
        assert_eq!(first.disconnects(), 1);
        assert_eq!(first.connects(), 1);
        assert!(!factory.client(1).events_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn start_stop_start_cycles_release_each_client() {
        let factory = FakeFactory::paired("a@s");
        let manager = manager_with(store_with(&[1]).await, factory.clone());
        for round in 1..=3 {
            let status = manager.start(1).await.unwrap();
            assert_eq!(status.generation, Some(round));
            manager.stop(1, StopReason::OperatorRequested).await.unwrap();
            let client = factory.client(1);
            assert_eq!(client.disconnects(), 1);
            assert!(client.events_closed());
        }
        assert_eq!(factory.created(1), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_lost_while_connecting_fails_start() {
        let store = store_with(&[1]).await;
        let factory = FakeFactory::paired("a@s").with_connect_delay(Duration::from_secs(1));
        let manager = manager_with(store.clone(), factory.clone());
        let starting = {
            let m = Arc::clone(&manager);
            tokio::spawn(async move { m.start(1).await })
        };
        wait_for_state(&manager, 1, SessionState::Connecting).await;

        let client = factory.client(1);
        client.emit(ProtocolEvent::connection_lost("socket closed"));
        assert_eq!(
            starting.await.unwrap(),
            Err(SessionError::ConnectionLost("socket closed".into()))
        );
        assert_eq!(manager.state(1), SessionState::Absent);
        assert!(!store.get_by_id(1).await.unwrap().unwrap().connected);
        assert_eq!(client.disconnects(), 1);
        assert!(client.events_closed());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(client.connects(), 1);
        manager.start(1).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_loss_reconnects() {
        let factory = FakeFactory::paired("a@s");
        let manager = manager_with(store_with(&[1]).await, factory.clone());
        manager.start(1).await.unwrap();

        let client = factory.client(1);
        client.fail_next_connects(2);
        client.emit(ProtocolEvent::connection_lost("stream end"));
        wait_for_state(&manager, 1, SessionState::Reconnecting).await;
        wait_for_state(&manager, 1, SessionState::Connected).await;
        assert_eq!(client.connects(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn operator_stop_suppresses_reconnect() {
        let factory = FakeFactory::paired("a@s");
        let manager = manager_with(store_with(&[1]).await, factory.clone());
        manager.start(1).await.unwrap();
        let client = factory.client(1);

        manager.stop(1, StopReason::OperatorRequested).await.unwrap();
        client.emit(ProtocolEvent::connection_lost("closed"));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(manager.state(1), SessionState::Absent);
        assert_eq!(client.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_reconnect_marks_disconnected() {
        let store = store_with(&[1]).await;
        let factory = FakeFactory::paired("a@s");
        let manager = manager_with(store.clone(), factory.clone());
        manager.start(1).await.unwrap();

        let client = factory.client(1);
        client.fail_next_connects(u32::MAX);
        client.emit(ProtocolEvent::connection_lost("network down"));
        wait_for_state(&manager, 1, SessionState::Absent).await;
        assert!(!store.get_by_id(1).await.unwrap().unwrap().connected);
        assert_eq!(client.connects(), 1 + manager.timings().reconnect.max_attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn qr_and_pairing_are_persisted() {
        let store = store_with(&[1]).await;
        let factory = FakeFactory::unpaired();
        let manager = manager_with(store.clone(), factory.clone());
        let status = manager.start(1).await.unwrap();
        assert_eq!(status.session_id, None);

        let client = factory.client(1);
        client.emit(ProtocolEvent::qr("2@qr-one"));
        for _ in 0..50 {
            if manager.qr(1).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.qr(1).as_deref(), Some("2@qr-one"));
        assert_eq!(
            store.get_by_id(1).await.unwrap().unwrap().qrcode.as_deref(),
            Some("2@qr-one")
        );

        client.emit(ProtocolEvent::pair_success("999@s.whatsapp.net"));
        for _ in 0..50 {
            if manager.qr(1).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let rec = store.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(rec.session_id.as_deref(), Some("999@s.whatsapp.net"));
        assert_eq!(rec.qrcode, None);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_logout_tears_down() {
        let store = store_with(&[1]).await;
        let factory = FakeFactory::paired("a@s");
        let manager = manager_with(store.clone(), factory.clone());
        manager.start(1).await.unwrap();
        factory.client(1).emit(ProtocolEvent::logged_out("unlinked from phone"));
        wait_for_state(&manager, 1, SessionState::Absent).await;
        let rec = store.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(rec.session_id, None);
        assert!(!rec.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_keeps_connected_flag() {
        let store = store_with(&[1, 2]).await;
        let manager = manager_with(store.clone(), FakeFactory::paired("a@s"));
        manager.start(1).await.unwrap();
        manager.start(2).await.unwrap();
        let abandoned = manager.shutdown(Duration::from_secs(10)).await;
        assert!(abandoned.is_empty());
        assert!(manager.active().is_empty());
        assert!(store.get_by_id(1).await.unwrap().unwrap().connected);
        assert!(store.get_by_id(2).await.unwrap().unwrap().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_sessions_past_deadline() {
        let store = store_with(&[1]).await;
        let factory = FakeFactory::paired("a@s").with_disconnect_delay(Duration::from_secs(3600));
        let manager = manager_with(store.clone(), factory);
        manager.start(1).await.unwrap();

        let abandoned = manager.shutdown(Duration::from_secs(1)).await;
        assert_eq!(abandoned, vec![1]);
        assert!(store.get_by_id(1).await.unwrap().unwrap().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn live_handle_only_while_connected() {
        let manager = manager_with(store_with(&[1]).await, FakeFactory::paired("a@s"));
        assert!(manager.live_handle(1).is_err());
        manager.start(1).await.unwrap();
        assert!(manager.live_handle(1).is_ok());
        manager.stop(1, StopReason::Shutdown).await.unwrap();
        assert!(manager.live_handle(1).is_err());
    }
}
