use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An ordered campaign of template emails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub trigger: SequenceTrigger,
    pub steps: Vec<SequenceStep>,
    pub total_enrolled: u64,
    pub total_completed: u64,
    pub total_exited: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sequence {
    /// The step list every other component sees: active steps, ordered.
    pub fn active_steps(&self) -> Vec<SequenceStep> {
        let mut steps: Vec<SequenceStep> =
            self.steps.iter().filter(|s| s.active).cloned().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }
}

/// What external event starts enrollment in a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceTrigger {
    Signup,
    CourseCompleted,
    NonPurchaser,
    Manual,
}

/// One email within a sequence. `order` defines position; the delay is
/// relative to the previous step's send time (enrollment time for the
/// first step).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub id: Uuid,
    pub order: u32,
    pub delay_days: u32,
    pub delay_hours: u32,
    pub subject: String,
    pub body: String,
    pub active: bool,
    pub sent_count: u64,
    pub open_count: u64,
    pub click_count: u64,
    pub reply_count: u64,
}

impl SequenceStep {
    pub fn new(order: u32, delay_days: u32, delay_hours: u32, subject: &str, body: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            order,
            delay_days,
            delay_hours,
            subject: subject.to_string(),
            body: body.to_string(),
            active: true,
            sent_count: 0,
            open_count: 0,
            click_count: 0,
            reply_count: 0,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.delay_days == 0 && self.delay_hours == 0
    }
}

/// Runtime status of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Exited,
}

/// The per-recipient state machine: one row per (user, sequence),
/// mutated only by the runner after creation, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sequence_id: Uuid,
    pub status: EnrollmentStatus,
    /// Next step to send, indexing into the sequence's active step list.
    /// Non-decreasing for the life of the row.
    pub current_step_index: usize,
    /// `None` only when not active, or transiently after the final step
    /// has been sent and the row awaits its completion pass.
    pub next_send_at: Option<DateTime<Utc>>,
    pub emails_received: u64,
    pub emails_opened: u64,
    pub emails_clicked: u64,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<String>,
}

impl Enrollment {
    pub fn new(
        user_id: Uuid,
        sequence_id: Uuid,
        first_send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            sequence_id,
            status: EnrollmentStatus::Active,
            current_step_index: 0,
            next_send_at: Some(first_send_at),
            emails_received: 0,
            emails_opened: 0,
            emails_clicked: 0,
            enrolled_at: now,
            completed_at: None,
            exited_at: None,
            exit_reason: None,
        }
    }

    /// Due for processing: active, with a send time at or before `now` —
    /// or with no send time at all, which only happens after the final
    /// step went out and the row still needs its completion pass.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == EnrollmentStatus::Active
            && self.next_send_at.map(|t| t <= now).unwrap_or(true)
    }
}
