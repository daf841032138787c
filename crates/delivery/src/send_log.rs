//! The send log — immutable audit trail of every delivery attempt, and the
//! backing store for the cross-system dedup guard.
//!
//! Records are appended once and only touched again to attach open/click
//! timestamps from tracking callbacks. Every subsystem that sends
//! marketing-class mail writes here, which is what lets the guard enforce
//! "at most one email per window" without a unified scheduler.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coursedrip_core::mail::{DeliveryReceipt, OutboundEmail, RecentSendLookup};

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Sent,
    Failed,
}

/// One delivery attempt against one recipient address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRecord {
    pub id: Uuid,
    pub recipient: String,
    pub user_id: Option<Uuid>,
    pub sequence_id: Option<Uuid>,
    pub step_id: Option<Uuid>,
    pub subject: String,
    pub provider_message_id: Option<String>,
    pub status: SendStatus,
    pub sent_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
}

/// Thread-safe append-mostly send log keyed by recipient address.
pub struct SendLog {
    /// lowercase address -> records, oldest first.
    by_recipient: DashMap<String, Vec<SendRecord>>,
    /// record id -> lowercase address, for tracking callbacks.
    by_id: DashMap<Uuid, String>,
}

impl SendLog {
    pub fn new() -> Self {
        Self {
            by_recipient: DashMap::new(),
            by_id: DashMap::new(),
        }
    }

    /// Append a record for an accepted delivery.
    pub fn record_sent(&self, email: &OutboundEmail, receipt: &DeliveryReceipt) -> SendRecord {
        self.append(email, Some(receipt), SendStatus::Sent, receipt.accepted_at)
    }

    /// Append a record for a failed attempt. Failed attempts stay in the
    /// audit trail but never count toward the dedup window.
    pub fn record_failed(&self, email: &OutboundEmail, at: DateTime<Utc>) -> SendRecord {
        self.append(email, None, SendStatus::Failed, at)
    }

    fn append(
        &self,
        email: &OutboundEmail,
        receipt: Option<&DeliveryReceipt>,
        status: SendStatus,
        at: DateTime<Utc>,
    ) -> SendRecord {
        let record = SendRecord {
            id: Uuid::new_v4(),
            recipient: email.to.to_lowercase(),
            user_id: email.user_id,
            sequence_id: email.sequence_id,
            step_id: email.step_id,
            subject: email.subject.clone(),
            provider_message_id: receipt.map(|r| r.provider_message_id.clone()),
            status,
            sent_at: at,
            opened_at: None,
            clicked_at: None,
        };

        self.by_id.insert(record.id, record.recipient.clone());
        self.by_recipient
            .entry(record.recipient.clone())
            .or_default()
            .push(record.clone());

        tracing::debug!(
            recipient = %record.recipient,
            ?status,
            record_id = %record.id,
            "send recorded"
        );
        record
    }

    /// All records for an address, oldest first.
    pub fn records_for(&self, address: &str) -> Vec<SendRecord> {
        self.by_recipient
            .get(&address.to_lowercase())
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Look up a single record by id.
    pub fn get(&self, record_id: &Uuid) -> Option<SendRecord> {
        let address = self.by_id.get(record_id)?.clone();
        self.by_recipient
            .get(&address)?
            .iter()
            .find(|r| r.id == *record_id)
            .cloned()
    }

    /// Attach an open timestamp from a tracking callback. Returns `true`
    /// only when this event set the timestamp; repeats are ignored.
    pub fn mark_opened(&self, record_id: &Uuid, at: DateTime<Utc>) -> bool {
        self.update_record(record_id, |r| {
            if r.opened_at.is_some() {
                return false;
            }
            r.opened_at = Some(at);
            true
        })
    }

    /// Attach a click timestamp. A click implies an open. Returns `true`
    /// only when this event set the click timestamp.
    pub fn mark_clicked(&self, record_id: &Uuid, at: DateTime<Utc>) -> bool {
        self.update_record(record_id, |r| {
            if r.opened_at.is_none() {
                r.opened_at = Some(at);
            }
            if r.clicked_at.is_some() {
                return false;
            }
            r.clicked_at = Some(at);
            true
        })
    }

    fn update_record(&self, record_id: &Uuid, apply: impl FnOnce(&mut SendRecord) -> bool) -> bool {
        let address = match self.by_id.get(record_id) {
            Some(a) => a.clone(),
            None => return false,
        };
        if let Some(mut records) = self.by_recipient.get_mut(&address) {
            if let Some(record) = records.iter_mut().find(|r| r.id == *record_id) {
                return apply(record);
            }
        }
        false
    }

    /// Total records across all recipients.
    pub fn count(&self) -> usize {
        self.by_recipient.iter().map(|e| e.value().len()).sum()
    }
}

impl Default for SendLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RecentSendLookup for SendLog {
    fn recently_emailed(&self, address: &str, window: Duration, now: DateTime<Utc>) -> bool {
        let cutoff = now - window;
        self.by_recipient
            .get(&address.to_lowercase())
            .map(|records| {
                records
                    .iter()
                    .any(|r| r.status == SendStatus::Sent && r.sent_at > cutoff)
            })
            .unwrap_or(false)
    }
}
