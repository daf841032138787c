//! Engagement tracking ingestion.
//!
//! The provider posts open/click events back at us; this is the single
//! point where those events fan out to the send record, the step
//! counters, and the enrollment counters, so nothing is double-counted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use coursedrip_delivery::SendLog;

use crate::store::{EnrollmentStore, SequenceStore};

pub struct TrackingService {
    send_log: Arc<SendLog>,
    sequences: Arc<SequenceStore>,
    enrollments: Arc<EnrollmentStore>,
}

impl TrackingService {
    pub fn new(
        send_log: Arc<SendLog>,
        sequences: Arc<SequenceStore>,
        enrollments: Arc<EnrollmentStore>,
    ) -> Self {
        Self {
            send_log,
            sequences,
            enrollments,
        }
    }

    /// Record an open event. Returns `false` for unknown records and
    /// repeat events.
    pub fn record_open(&self, record_id: &Uuid) -> bool {
        self.record_open_at(record_id, Utc::now())
    }

    pub fn record_open_at(&self, record_id: &Uuid, at: DateTime<Utc>) -> bool {
        let Some(record) = self.send_log.get(record_id) else {
            return false;
        };
        if !self.send_log.mark_opened(record_id, at) {
            return false;
        }
        debug!(record_id = %record_id, recipient = %record.recipient, "open tracked");
        self.bump_open_counters(&record.user_id, &record.sequence_id, &record.step_id);
        true
    }

    /// Record a click event. A click on an unopened record counts as an
    /// open as well.
    pub fn record_click(&self, record_id: &Uuid) -> bool {
        self.record_click_at(record_id, Utc::now())
    }

    pub fn record_click_at(&self, record_id: &Uuid, at: DateTime<Utc>) -> bool {
        let Some(record) = self.send_log.get(record_id) else {
            return false;
        };
        let was_unopened = record.opened_at.is_none();
        if !self.send_log.mark_clicked(record_id, at) {
            return false;
        }
        debug!(record_id = %record_id, recipient = %record.recipient, "click tracked");
        if was_unopened {
            self.bump_open_counters(&record.user_id, &record.sequence_id, &record.step_id);
        }
        if let (Some(seq), Some(step)) = (record.sequence_id, record.step_id) {
            self.sequences.record_step_clicked(&seq, &step);
        }
        if let (Some(user), Some(seq)) = (record.user_id, record.sequence_id) {
            self.enrollments.record_clicked(&user, &seq);
        }
        true
    }

    /// Record an inbound reply attributed to a sent step. Replies are not
    /// deduplicated; each one counts.
    pub fn record_reply(&self, record_id: &Uuid) -> bool {
        let Some(record) = self.send_log.get(record_id) else {
            return false;
        };
        debug!(record_id = %record_id, recipient = %record.recipient, "reply tracked");
        if let (Some(seq), Some(step)) = (record.sequence_id, record.step_id) {
            self.sequences.record_step_replied(&seq, &step);
        }
        true
    }

    fn bump_open_counters(
        &self,
        user_id: &Option<Uuid>,
        sequence_id: &Option<Uuid>,
        step_id: &Option<Uuid>,
    ) {
        if let (Some(seq), Some(step)) = (sequence_id, step_id) {
            self.sequences.record_step_opened(seq, step);
        }
        if let (Some(user), Some(seq)) = (user_id, sequence_id) {
            self.enrollments.record_opened(user, seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Enrollment, Sequence, SequenceStep, SequenceTrigger};
    use coursedrip_core::mail::{DeliveryReceipt, OutboundEmail};

    struct Fixture {
        tracking: TrackingService,
        send_log: Arc<SendLog>,
        sequences: Arc<SequenceStore>,
        enrollments: Arc<EnrollmentStore>,
        sequence_id: Uuid,
        step_id: Uuid,
        user_id: Uuid,
    }

    fn fixture() -> Fixture {
        let send_log = Arc::new(SendLog::new());
        let sequences = Arc::new(SequenceStore::new());
        let enrollments = Arc::new(EnrollmentStore::new());
        let now = Utc::now();

        let step = SequenceStep::new(0, 0, 0, "Hi", "b");
        let step_id = step.id;
        let sequence_id = sequences.insert(Sequence {
            id: Uuid::new_v4(),
            name: "Welcome".to_string(),
            description: String::new(),
            active: true,
            trigger: SequenceTrigger::Signup,
            steps: vec![step],
            total_enrolled: 0,
            total_completed: 0,
            total_exited: 0,
            created_at: now,
            updated_at: now,
        });

        let user_id = Uuid::new_v4();
        enrollments.upsert(Enrollment::new(user_id, sequence_id, now, now));

        let tracking =
            TrackingService::new(send_log.clone(), sequences.clone(), enrollments.clone());
        Fixture {
            tracking,
            send_log,
            sequences,
            enrollments,
            sequence_id,
            step_id,
            user_id,
        }
    }

    fn sent_record(f: &Fixture) -> Uuid {
        let email = OutboundEmail {
            to: "ada@example.com".to_string(),
            subject: "Hi".to_string(),
            html_body: "<p>b</p>".to_string(),
            text_body: None,
            user_id: Some(f.user_id),
            sequence_id: Some(f.sequence_id),
            step_id: Some(f.step_id),
        };
        let receipt = DeliveryReceipt {
            provider_message_id: "msg-1".to_string(),
            accepted_at: Utc::now(),
        };
        f.send_log.record_sent(&email, &receipt).id
    }

    #[test]
    fn test_open_counted_once() {
        let f = fixture();
        let record_id = sent_record(&f);

        assert!(f.tracking.record_open(&record_id));
        assert!(!f.tracking.record_open(&record_id));

        let seq = f.sequences.get(&f.sequence_id).unwrap();
        assert_eq!(seq.steps[0].open_count, 1);
        let row = f.enrollments.get(&f.user_id, &f.sequence_id).unwrap();
        assert_eq!(row.emails_opened, 1);
    }

    #[test]
    fn test_click_implies_open() {
        let f = fixture();
        let record_id = sent_record(&f);

        assert!(f.tracking.record_click(&record_id));

        let seq = f.sequences.get(&f.sequence_id).unwrap();
        assert_eq!(seq.steps[0].open_count, 1);
        assert_eq!(seq.steps[0].click_count, 1);
        let row = f.enrollments.get(&f.user_id, &f.sequence_id).unwrap();
        assert_eq!(row.emails_opened, 1);
        assert_eq!(row.emails_clicked, 1);
    }

    #[test]
    fn test_replies_accumulate() {
        let f = fixture();
        let record_id = sent_record(&f);

        assert!(f.tracking.record_reply(&record_id));
        assert!(f.tracking.record_reply(&record_id));

        let seq = f.sequences.get(&f.sequence_id).unwrap();
        assert_eq!(seq.steps[0].reply_count, 2);
    }

    #[test]
    fn test_unknown_record_ignored() {
        let f = fixture();
        assert!(!f.tracking.record_open(&Uuid::new_v4()));
        assert!(!f.tracking.record_click(&Uuid::new_v4()));
        assert!(!f.tracking.record_reply(&Uuid::new_v4()));
    }
}
