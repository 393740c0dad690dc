//! Startup resumption and in-session reconnect.

use std::{sync::Arc, time::Duration};

use {
    futures::future::join_all,
    tokio::time::timeout,
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
    wagate_channels::ProtocolClient,
    wagate_common::{TenantId, time::now_secs},
    wagate_config::SessionsConfig,
};

use crate::session::{SessionManager, SessionState};

/// Bounded exponential backoff for reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// Delay before attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl From<&SessionsConfig> for BackoffPolicy {
    fn from(config: &SessionsConfig) -> Self {
        Self {
            max_attempts: config.reconnect_attempts,
            initial: Duration::from_millis(config.reconnect_initial_ms),
            max: Duration::from_millis(config.reconnect_max_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Reconnected,
    /// A stop arrived while recovering.
    Cancelled,
    Exhausted,
}

/// Re-establish a dropped connection in place, keeping the session entry.
pub(crate) async fn recover(
    manager: &SessionManager,
    tenant: TenantId,
    generation: u64,
    client: &Arc<dyn ProtocolClient>,
    cancel: &CancellationToken,
) -> Recovery {
    if !manager.transition(
        tenant,
        generation,
        SessionState::Connected,
        SessionState::Reconnecting,
    ) {
        return Recovery::Cancelled;
    }
    let policy = &manager.timings().reconnect;
    let connect_timeout = manager.timings().connect_timeout;

    for attempt in 1..=policy.max_attempts {
        let delay = policy.delay(attempt);
        info!(tenant, attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Recovery::Cancelled,
            _ = tokio::time::sleep(delay) => {},
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Recovery::Cancelled,
            res = timeout(connect_timeout, client.connect()) => res,
        };
        match result {
            Ok(Ok(_)) => {
                if manager.transition(
                    tenant,
                    generation,
                    SessionState::Reconnecting,
                    SessionState::Connected,
                ) {
                    info!(tenant, attempt, "session reconnected");
                    return Recovery::Reconnected;
                }
                return Recovery::Cancelled;
            },
            Ok(Err(e)) => warn!(tenant, attempt, error = %e, "reconnect attempt failed"),
            Err(_) => warn!(tenant, attempt, "reconnect attempt timed out"),
        }
    }
    error!(
        tenant,
        attempts = policy.max_attempts,
        "reconnect attempts exhausted, marking tenant disconnected"
    );
    Recovery::Exhausted
}

/// Result of a startup sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub started: Vec<TenantId>,
    pub failed: Vec<(TenantId, String)>,
    pub skipped_expired: Vec<TenantId>,
}

/// Resumes sessions that were connected when the process last stopped.
pub struct ConnectionSupervisor {
    manager: Arc<SessionManager>,
}

impl ConnectionSupervisor {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Start every tenant flagged connected. Starts run concurrently and a
    /// failing tenant does not hold up the others.
    pub async fn connect_on_startup(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();
        let records = match self.manager.store().list_connected().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "could not list connected tenants, skipping startup resume");
                return summary;
            },
        };
        if records.is_empty() {
            info!("no sessions to resume");
            return summary;
        }

        let now = now_secs();
        let mut pending = Vec::with_capacity(records.len());
        for record in records {
            if record.is_expired(now) {
                info!(tenant = record.id, "not resuming expired account");
                summary.skipped_expired.push(record.id);
            } else {
                pending.push(record.id);
            }
        }
        info!(count = pending.len(), "resuming sessions");

        let results = join_all(pending.into_iter().map(|tenant| {
            let manager = Arc::clone(&self.manager);
            async move { (tenant, manager.start(tenant).await) }
        }))
        .await;
        for (tenant, result) in results {
            match result {
                Ok(_) => summary.started.push(tenant),
                Err(e) => {
                    warn!(tenant, error = %e, "failed to resume session");
                    summary.failed.push((tenant, e.to_string()));
                },
            }
        }
        info!(
            started = summary.started.len(),
            failed = summary.failed.len(),
            "startup resume finished"
        );
        summary
    }
}
