//! In-memory stores for sequence definitions and enrollment rows.
//!
//! `DashMap`-backed and row-independent: each enrollment is owned by the
//! single runner invocation processing it, so no locking beyond the map's
//! own sharding is needed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use coursedrip_core::{DripError, DripResult};

use crate::types::{Enrollment, EnrollmentStatus, Sequence, SequenceStep, SequenceTrigger};

/// Store of sequence definitions and their aggregate counters.
pub struct SequenceStore {
    sequences: DashMap<Uuid, Sequence>,
}

impl SequenceStore {
    pub fn new() -> Self {
        Self {
            sequences: DashMap::new(),
        }
    }

    pub fn insert(&self, sequence: Sequence) -> Uuid {
        let id = sequence.id;
        info!(sequence_id = %id, name = %sequence.name, "sequence registered");
        self.sequences.insert(id, sequence);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<Sequence> {
        self.sequences.get(id).map(|s| s.clone())
    }

    pub fn list(&self) -> Vec<Sequence> {
        self.sequences.iter().map(|s| s.value().clone()).collect()
    }

    /// Resolved step list for an enrollment: active steps in order.
    pub fn active_steps(&self, id: &Uuid) -> DripResult<Vec<SequenceStep>> {
        self.sequences
            .get(id)
            .map(|s| s.active_steps())
            .ok_or(DripError::SequenceNotFound(*id))
    }

    pub fn record_enrolled(&self, id: &Uuid) {
        self.bump(id, |s| s.total_enrolled += 1);
    }

    pub fn record_completed(&self, id: &Uuid) {
        self.bump(id, |s| s.total_completed += 1);
    }

    pub fn record_exited(&self, id: &Uuid) {
        self.bump(id, |s| s.total_exited += 1);
    }

    pub fn record_step_sent(&self, id: &Uuid, step_id: &Uuid) {
        self.bump_step(id, step_id, |s| s.sent_count += 1);
    }

    pub fn record_step_opened(&self, id: &Uuid, step_id: &Uuid) {
        self.bump_step(id, step_id, |s| s.open_count += 1);
    }

    pub fn record_step_clicked(&self, id: &Uuid, step_id: &Uuid) {
        self.bump_step(id, step_id, |s| s.click_count += 1);
    }

    pub fn record_step_replied(&self, id: &Uuid, step_id: &Uuid) {
        self.bump_step(id, step_id, |s| s.reply_count += 1);
    }

    fn bump(&self, id: &Uuid, apply: impl FnOnce(&mut Sequence)) {
        if let Some(mut seq) = self.sequences.get_mut(id) {
            apply(&mut seq);
            seq.updated_at = Utc::now();
        }
    }

    fn bump_step(&self, id: &Uuid, step_id: &Uuid, apply: impl FnOnce(&mut SequenceStep)) {
        if let Some(mut seq) = self.sequences.get_mut(id) {
            if let Some(step) = seq.steps.iter_mut().find(|s| s.id == *step_id) {
                apply(step);
            }
        }
    }

    /// Seeds a three-step onboarding sequence for development and testing.
    pub fn seed_demo_sequences(&self) {
        let now = Utc::now();
        let sequence = Sequence {
            id: Uuid::new_v4(),
            name: "Onboarding".to_string(),
            description: "Welcome series for new learners".to_string(),
            active: true,
            trigger: SequenceTrigger::Signup,
            steps: vec![
                SequenceStep::new(
                    0,
                    0,
                    0,
                    "Welcome to {{course}}, {{first_name}}!",
                    "Hi {{first_name}},\n\nWelcome aboard. Your first lesson is ready.",
                ),
                SequenceStep::new(
                    1,
                    2,
                    0,
                    "Your next lesson is waiting",
                    "Hi {{first_name}},\n\n**Lesson two** just unlocked. *See you inside.*",
                ),
                SequenceStep::new(
                    2,
                    4,
                    0,
                    "How is it going, {{first_name}}?",
                    "Hit reply and tell us how the course is treating you.",
                ),
            ],
            total_enrolled: 0,
            total_completed: 0,
            total_exited: 0,
            created_at: now,
            updated_at: now,
        };
        self.insert(sequence);
        info!("demo sequence seeded");
    }
}

impl Default for SequenceStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// EnrollmentStore
// ---------------------------------------------------------------------------

/// Store of enrollment rows, keyed by (user, sequence) — unique per pair.
pub struct EnrollmentStore {
    rows: DashMap<(Uuid, Uuid), Enrollment>,
}

impl EnrollmentStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    /// Insert or replace the row for this (user, sequence) pair.
    pub fn upsert(&self, enrollment: Enrollment) {
        self.rows
            .insert((enrollment.user_id, enrollment.sequence_id), enrollment);
    }

    pub fn get(&self, user_id: &Uuid, sequence_id: &Uuid) -> Option<Enrollment> {
        self.rows.get(&(*user_id, *sequence_id)).map(|e| e.clone())
    }

    pub fn has_active(&self, user_id: &Uuid, sequence_id: &Uuid) -> bool {
        self.get(user_id, sequence_id)
            .map(|e| e.status == EnrollmentStatus::Active)
            .unwrap_or(false)
    }

    /// All due rows, most overdue first. Rows with no send time (awaiting
    /// their completion pass) sort ahead of everything.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<Enrollment> {
        let mut due: Vec<Enrollment> = self
            .rows
            .iter()
            .filter(|e| e.value().is_due(now))
            .map(|e| e.value().clone())
            .collect();
        due.sort_by_key(|e| e.next_send_at.unwrap_or(DateTime::<Utc>::MIN_UTC));
        due
    }

    /// Persist a step advance. Only active rows move; the index is set,
    /// never decremented, by construction of the single caller.
    pub fn advance(
        &self,
        user_id: &Uuid,
        sequence_id: &Uuid,
        next_index: usize,
        next_send_at: Option<DateTime<Utc>>,
    ) -> DripResult<()> {
        self.mutate_active(user_id, sequence_id, |e| {
            e.current_step_index = next_index;
            e.next_send_at = next_send_at;
        })
    }

    /// Terminal transition: all steps exhausted.
    pub fn complete(
        &self,
        user_id: &Uuid,
        sequence_id: &Uuid,
        now: DateTime<Utc>,
    ) -> DripResult<Enrollment> {
        self.mutate_active(user_id, sequence_id, |e| {
            e.status = EnrollmentStatus::Completed;
            e.completed_at = Some(now);
            e.next_send_at = None;
        })?;
        self.get(user_id, sequence_id)
            .ok_or(DripError::EnrollmentNotFound {
                user_id: *user_id,
                sequence_id: *sequence_id,
            })
    }

    /// Terminal transition: out-of-band exit (conversion, unsubscribe, …).
    pub fn exit(
        &self,
        user_id: &Uuid,
        sequence_id: &Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DripResult<Enrollment> {
        self.mutate_active(user_id, sequence_id, |e| {
            e.status = EnrollmentStatus::Exited;
            e.exited_at = Some(now);
            e.exit_reason = Some(reason.to_string());
            e.next_send_at = None;
        })?;
        self.get(user_id, sequence_id)
            .ok_or(DripError::EnrollmentNotFound {
                user_id: *user_id,
                sequence_id: *sequence_id,
            })
    }

    pub fn record_delivery(&self, user_id: &Uuid, sequence_id: &Uuid) {
        if let Some(mut e) = self.rows.get_mut(&(*user_id, *sequence_id)) {
            e.emails_received += 1;
        }
    }

    pub fn record_opened(&self, user_id: &Uuid, sequence_id: &Uuid) {
        if let Some(mut e) = self.rows.get_mut(&(*user_id, *sequence_id)) {
            e.emails_opened += 1;
        }
    }

    pub fn record_clicked(&self, user_id: &Uuid, sequence_id: &Uuid) {
        if let Some(mut e) = self.rows.get_mut(&(*user_id, *sequence_id)) {
            e.emails_clicked += 1;
        }
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    fn mutate_active(
        &self,
        user_id: &Uuid,
        sequence_id: &Uuid,
        apply: impl FnOnce(&mut Enrollment),
    ) -> DripResult<()> {
        let mut row = self.rows.get_mut(&(*user_id, *sequence_id)).ok_or(
            DripError::EnrollmentNotFound {
                user_id: *user_id,
                sequence_id: *sequence_id,
            },
        )?;
        // Completed/Exited rows are terminal; silently keeping them
        // unchanged would hide bugs, so refuse loudly.
        if row.status != EnrollmentStatus::Active {
            return Err(DripError::Internal(anyhow::anyhow!(
                "enrollment {} is {:?}, not active",
                row.id,
                row.status
            )));
        }
        apply(&mut row);
        Ok(())
    }
}

impl Default for EnrollmentStore {
    fn default() -> Self {
        Self::new()
    }
}
