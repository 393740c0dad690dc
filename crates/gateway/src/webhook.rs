//! Outbound webhook delivery: payload shape, signing and retry.

use std::{sync::Arc, time::Duration};

use {
    hmac::{Hmac, Mac},
    reqwest::header::CONTENT_TYPE,
    serde::Serialize,
    serde_json::Value,
    sha2::Sha256,
    tokio::sync::Semaphore,
    tokio_util::sync::CancellationToken,
    tracing::warn,
    wagate_common::{EventKind, TenantId},
    wagate_config::WebhooksConfig,
};

pub const SIGNATURE_HEADER: &str = "X-Wagate-Signature";

/// JSON body POSTed to a tenant's webhook URL.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload<'a> {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub tenant_id: TenantId,
    pub event: &'a Value,
    /// Unix milliseconds at which the router accepted the event.
    pub timestamp: u64,
}

/// One queued POST, carried through its retries.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tenant: TenantId,
    pub kind: EventKind,
    pub url: String,
    pub body: Vec<u8>,
    pub signature: Option<String>,
    pub attempts: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("webhook responded with status {0}")]
    Status(u16),
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("delivery abandoned, tenant no longer routed")]
    Cancelled,
}

type HmacSha256 = Hmac<Sha256>;

/// `sha256=<hex>` HMAC of `body` keyed by `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Some(format!("sha256={hex}"))
}

/// Shared HTTP sender. The semaphore bounds concurrent POSTs across all
/// tenants.
pub struct WebhookSender {
    client: reqwest::Client,
    limiter: Arc<Semaphore>,
    max_attempts: u32,
    retry_initial: Duration,
}

impl WebhookSender {
    pub fn new(config: &WebhooksConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("wagate/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build webhook client, using defaults");
                reqwest::Client::new()
            });
        Self {
            client,
            limiter: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            max_attempts: config.max_attempts.max(1),
            retry_initial: Duration::from_millis(config.retry_initial_ms),
        }
    }

    /// POST until a 2xx, the attempt budget runs out, or `cancel` fires.
    /// Retries back off exponentially from the configured initial delay.
    pub async fn deliver(
        &self,
        delivery: &mut Delivery,
        cancel: &CancellationToken,
    ) -> Result<(), DeliveryError> {
        let mut backoff = self.retry_initial;
        loop {
            if cancel.is_cancelled() {
                return Err(DeliveryError::Cancelled);
            }
            delivery.attempts += 1;
            let err = match self.attempt(delivery).await {
                Ok(()) => return Ok(()),
                Err(e) if delivery.attempts >= self.max_attempts => return Err(e),
                Err(e) => e,
            };
            warn!(
                tenant = delivery.tenant,
                event = %delivery.kind,
                attempt = delivery.attempts,
                retry_in_ms = backoff.as_millis() as u64,
                error = %err,
                "webhook delivery failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
                _ = tokio::time::sleep(backoff) => {},
            }
            backoff = backoff.saturating_mul(2);
        }
    }

    async fn attempt(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| DeliveryError::Cancelled)?;
        let mut req = self
            .client
            .post(&delivery.url)
            .header(CONTENT_TYPE, "application/json")
            .body(delivery.body.clone());
        if let Some(sig) = &delivery.signature {
            req = req.header(SIGNATURE_HEADER, sig);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher, serde_json::json};

    fn config() -> WebhooksConfig {
        WebhooksConfig {
            timeout_secs: 2,
            max_attempts: 3,
            retry_initial_ms: 10,
            ..WebhooksConfig::default()
        }
    }

    fn delivery(url: String) -> Delivery {
        Delivery {
            tenant: 1,
            kind: EventKind::Message,
            url,
            body: br#"{"type":"Message"}"#.to_vec(),
            signature: None,
            attempts: 0,
        }
    }

    #[test]
    fn signature_is_stable_hex() {
        let sig = sign("secret", b"{}").unwrap();
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
        assert_eq!(sign("secret", b"{}"), Some(sig));
        assert_ne!(sign("other", b"{}"), sign("secret", b"{}"));
    }

    #[test]
    fn payload_shape() {
        let event = json!({ "id": "m1" });
        let v = serde_json::to_value(WebhookPayload {
            kind: EventKind::ReadReceipt,
            tenant_id: 4,
            event: &event,
            timestamp: 1_700_000_000_000,
        })
        .unwrap();
        assert_eq!(v["type"], "ReadReceipt");
        assert_eq!(v["tenantId"], 4);
        assert_eq!(v["event"]["id"], "m1");
    }

    #[tokio::test]
    async fn retries_until_budget_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;
        let sender = WebhookSender::new(&config());
        let mut d = delivery(format!("{}/hook", server.url()));
        let err = sender
            .deliver(&mut d, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Status(500)));
        assert_eq!(d.attempts, 3);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn stops_after_first_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header(SIGNATURE_HEADER, Matcher::Regex("^sha256=".into()))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;
        let sender = WebhookSender::new(&config());
        let mut d = delivery(format!("{}/hook", server.url()));
        d.signature = sign("tok", &d.body);
        sender
            .deliver(&mut d, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(d.attempts, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn cancellation_prevents_retries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(503)
            .expect(0)
            .create_async()
            .await;
        let sender = WebhookSender::new(&config());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut d = delivery(format!("{}/hook", server.url()));
        let err = sender.deliver(&mut d, &cancel).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Cancelled));
        assert_eq!(d.attempts, 0);
        mock.assert_async().await;
    }
}
