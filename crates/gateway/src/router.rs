//! Per-tenant event fan-out to webhooks and the recent-events buffer.
//!
//! `dispatch` never blocks the caller. Each tenant gets a bounded queue and a
//! single worker, so deliveries for one tenant leave in arrival order while a
//! slow endpoint only backs up its own queue.

use std::{collections::VecDeque, sync::Arc};

use {
    dashmap::DashMap,
    serde::Serialize,
    serde_json::Value,
    tokio::sync::mpsc::{self, error::TrySendError},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, warn},
    wagate_channels::ProtocolEvent,
    wagate_common::{EventKind, EventSet, TenantId, time::now_ms},
    wagate_config::WebhooksConfig,
    wagate_tenants::TenantRecord,
};

use crate::webhook::{Delivery, DeliveryError, WebhookPayload, WebhookSender, sign};

/// Where and what to deliver for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub url: Option<String>,
    pub events: EventSet,
    /// HMAC key for signed deliveries.
    pub secret: Option<String>,
}

impl WebhookTarget {
    pub fn from_record(record: &TenantRecord) -> Self {
        Self {
            url: record.webhook.clone().filter(|u| !u.is_empty()),
            events: record.events.clone(),
            secret: Some(record.token.clone()),
        }
    }
}

/// An event kept for `GET /session/events`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub event: Value,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Tenant has no active route.
    NotRouted,
    /// Kind is outside the tenant's subscription.
    Filtered,
    /// Recorded, no webhook configured.
    Recorded,
    Queued,
    /// Queue full; the delivery was dropped.
    Overflow,
}

struct TenantRoute {
    target: WebhookTarget,
    queue: Option<mpsc::Sender<Delivery>>,
    cancel: CancellationToken,
    recent: VecDeque<RecordedEvent>,
}

pub struct EventRouter {
    routes: DashMap<TenantId, TenantRoute>,
    sender: Arc<WebhookSender>,
    queue_capacity: usize,
    recent_capacity: usize,
    sign: bool,
}

impl EventRouter {
    pub fn new(config: &WebhooksConfig) -> Self {
        Self {
            routes: DashMap::new(),
            sender: Arc::new(WebhookSender::new(config)),
            queue_capacity: config.queue_capacity.max(1),
            recent_capacity: config.recent_events,
            sign: config.sign,
        }
    }

    /// Start routing for `tenant`, or replace the target of an existing route
    /// while keeping its queue and history.
    pub fn register(&self, tenant: TenantId, target: WebhookTarget) {
        self.routes
            .entry(tenant)
            .and_modify(|r| r.target = target.clone())
            .or_insert_with(|| TenantRoute {
                target,
                queue: None,
                cancel: CancellationToken::new(),
                recent: VecDeque::new(),
            });
    }

    /// Replace the target only if `tenant` is currently routed.
    pub fn update_target(&self, tenant: TenantId, target: WebhookTarget) -> bool {
        match self.routes.get_mut(&tenant) {
            Some(mut route) => {
                route.target = target;
                true
            },
            None => false,
        }
    }

    /// Stop routing for `tenant`. Queued deliveries are dropped and in-flight
    /// ones are not retried.
    pub fn close(&self, tenant: TenantId) {
        if let Some((_, route)) = self.routes.remove(&tenant) {
            route.cancel.cancel();
            debug!(tenant, "event route closed");
        }
    }

    pub fn is_routed(&self, tenant: TenantId) -> bool {
        self.routes.contains_key(&tenant)
    }

    pub fn recent(&self, tenant: TenantId) -> Vec<RecordedEvent> {
        self.routes
            .get(&tenant)
            .map(|r| r.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn dispatch(&self, tenant: TenantId, event: &ProtocolEvent) -> DispatchOutcome {
        let Some(mut route) = self.routes.get_mut(&tenant) else {
            debug!(tenant, event = %event.kind, "dropping event for unrouted tenant");
            return DispatchOutcome::NotRouted;
        };
        if !route.target.events.contains(event.kind) {
            return DispatchOutcome::Filtered;
        }

        let timestamp = now_ms();
        if self.recent_capacity > 0 {
            if route.recent.len() >= self.recent_capacity {
                route.recent.pop_front();
            }
            route.recent.push_back(RecordedEvent {
                kind: event.kind,
                event: event.payload.clone(),
                timestamp,
            });
        }

        let Some(url) = route.target.url.clone() else {
            return DispatchOutcome::Recorded;
        };
        let body = match serde_json::to_vec(&WebhookPayload {
            kind: event.kind,
            tenant_id: tenant,
            event: &event.payload,
            timestamp,
        }) {
            Ok(body) => body,
            Err(e) => {
                error!(tenant, event = %event.kind, error = %e, "failed to encode webhook payload");
                return DispatchOutcome::Recorded;
            },
        };
        let signature = if self.sign {
            route.target.secret.as_deref().and_then(|s| sign(s, &body))
        } else {
            None
        };
        let delivery = Delivery {
            tenant,
            kind: event.kind,
            url,
            body,
            signature,
            attempts: 0,
        };

        let cancel = route.cancel.clone();
        let queue = route
            .queue
            .get_or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.queue_capacity);
                tokio::spawn(run_worker(tenant, rx, Arc::clone(&self.sender), cancel));
                tx
            })
            .clone();
        match queue.try_send(delivery) {
            Ok(()) => DispatchOutcome::Queued,
            Err(TrySendError::Full(d)) => {
                warn!(tenant, event = %d.kind, capacity = self.queue_capacity, "webhook queue full, dropping event");
                DispatchOutcome::Overflow
            },
            Err(TrySendError::Closed(d)) => {
                warn!(tenant, event = %d.kind, "webhook worker gone, dropping event");
                route.queue = None;
                DispatchOutcome::Overflow
            },
        }
    }
}

async fn run_worker(
    tenant: TenantId,
    mut rx: mpsc::Receiver<Delivery>,
    sender: Arc<WebhookSender>,
    cancel: CancellationToken,
) {
    loop {
        let mut delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(d) => d,
                None => break,
            },
        };
        match sender.deliver(&mut delivery, &cancel).await {
            Ok(()) => debug!(
                tenant,
                event = %delivery.kind,
                attempts = delivery.attempts,
                "webhook delivered"
            ),
            Err(DeliveryError::Cancelled) => break,
            Err(e) => error!(
                tenant,
                event = %delivery.kind,
                attempts = delivery.attempts,
                error = %e,
                "webhook delivery failed, giving up"
            ),
        }
    }
    debug!(tenant, "webhook worker stopped");
}
