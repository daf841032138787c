//! Provider-facing transport.
//!
//! Wraps the external transactional-mail API behind the `EmailTransport`
//! trait. The adapter never retries; a failed call is reported upward and
//! the scheduler decides what happens next.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use coursedrip_core::mail::{DeliveryReceipt, EmailTransport, OutboundEmail};
use coursedrip_core::DripResult;

/// Connection settings for the transactional-mail provider.
#[derive(Debug, Clone)]
pub struct MailProviderConfig {
    pub api_base: String,
    pub from_email: String,
    pub from_name: String,
    pub open_tracking: bool,
    pub click_tracking: bool,
}

impl Default for MailProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.mailprovider.example/v1".to_string(),
            from_email: "courses@coursedrip.example".to_string(),
            from_name: "CourseDrip".to_string(),
            open_tracking: true,
            click_tracking: true,
        }
    }
}

/// Transactional-mail provider adapter.
pub struct TransactionalMailProvider {
    config: MailProviderConfig,
}

impl TransactionalMailProvider {
    pub fn new(config: MailProviderConfig) -> Self {
        info!(
            from = %config.from_email,
            api_base = %config.api_base,
            "mail provider initialized"
        );
        Self { config }
    }

    pub fn config(&self) -> &MailProviderConfig {
        &self.config
    }
}

#[async_trait]
impl EmailTransport for TransactionalMailProvider {
    /// Send one email via the provider API.
    /// In production: POST {api_base}/messages
    async fn send(&self, email: &OutboundEmail) -> DripResult<DeliveryReceipt> {
        debug!(to = %email.to, subject = %email.subject, "sending email");

        metrics::counter!("delivery.send_attempts").increment(1);

        // Provider API payload (stub; production does an HTTP POST here).
        let _payload = serde_json::json!({
            "from": {
                "email": self.config.from_email,
                "name": self.config.from_name,
            },
            "to": [{"email": email.to}],
            "subject": email.subject,
            "content": [
                {"type": "text/html", "value": email.html_body},
                {"type": "text/plain", "value": email.text_body},
            ],
            "custom_args": {
                "user_id": email.user_id,
                "sequence_id": email.sequence_id,
                "step_id": email.step_id,
            },
            "tracking_settings": {
                "open_tracking": {"enable": self.config.open_tracking},
                "click_tracking": {"enable": self.config.click_tracking},
            },
        });

        Ok(DeliveryReceipt {
            provider_message_id: format!("msg-{}", Uuid::new_v4()),
            accepted_at: Utc::now(),
        })
    }
}
