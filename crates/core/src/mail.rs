//! Boundary traits between the scheduling core and the mail plumbing.
//!
//! The runner only ever talks to a transport and a "recently emailed"
//! lookup through these traits, so both can be faked in tests without
//! touching any particular provider or storage technology.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DripResult;

/// A fully-rendered email ready to hand to the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub user_id: Option<Uuid>,
    pub sequence_id: Option<Uuid>,
    pub step_id: Option<Uuid>,
}

/// What the provider handed back for an accepted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub provider_message_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// Transactional-send capability. Implementations must not retry
/// internally; retry policy belongs to the scheduler.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> DripResult<DeliveryReceipt>;
}

/// Cross-system "was this address emailed recently?" query. Spans every
/// subsystem that sends marketing-class mail, not just one sequence.
pub trait RecentSendLookup: Send + Sync {
    fn recently_emailed(&self, address: &str, window: Duration, now: DateTime<Utc>) -> bool;
}
