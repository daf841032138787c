//! Enrollment API — creates and initializes enrollment rows, single and
//! bulk, out-of-band of the runner.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use coursedrip_core::config::SchedulerConfig;
use coursedrip_core::types::{RecipientDirectory, RecipientFilter};
use coursedrip_core::{DripError, DripResult};
use coursedrip_delivery::SuppressionFilter;

use crate::schedule::SendWindow;
use crate::store::{EnrollmentStore, SequenceStore};
use crate::types::{Enrollment, EnrollmentStatus, Sequence, SequenceStep};

/// Options for a single enrollment call.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EnrollOptions {
    /// Reset an existing active/completed row instead of refusing.
    #[serde(default)]
    pub re_enroll: bool,
}

/// What an enrollment call did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "enrollment")]
pub enum EnrollOutcome {
    Enrolled(Enrollment),
    AlreadyEnrolled(Enrollment),
}

impl EnrollOutcome {
    /// The recipient-facing fact conveyed by this outcome.
    pub fn user_message(&self) -> &'static str {
        match self {
            EnrollOutcome::Enrolled(_) => "enrolled",
            EnrollOutcome::AlreadyEnrolled(_) => "already enrolled in this sequence",
        }
    }
}

/// Options for bulk enrollment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkEnrollOptions {
    /// Also enroll recipients who already have an active row (resets it).
    #[serde(default)]
    pub include_enrolled: bool,
    /// First step goes out "soon" instead of on its natural delay.
    #[serde(default)]
    pub send_first_immediately: bool,
    /// Override the configured processing chunk size.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkEnrollError {
    pub email: String,
    pub reason: String,
}

/// Partial-success report: one recipient's failure never aborts the rest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkEnrollReport {
    pub matched: usize,
    pub enrolled: usize,
    pub skipped_suppressed: usize,
    pub skipped_already_enrolled: usize,
    pub failed: usize,
    /// Bounded; `failed` carries the true total.
    pub errors: Vec<BulkEnrollError>,
}

/// Creates and initializes enrollments.
pub struct EnrollmentService {
    sequences: Arc<SequenceStore>,
    enrollments: Arc<EnrollmentStore>,
    directory: Arc<dyn RecipientDirectory>,
    suppression: SuppressionFilter,
    window: SendWindow,
    config: SchedulerConfig,
}

impl EnrollmentService {
    pub fn new(
        sequences: Arc<SequenceStore>,
        enrollments: Arc<EnrollmentStore>,
        directory: Arc<dyn RecipientDirectory>,
        suppression: SuppressionFilter,
        window: SendWindow,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            sequences,
            enrollments,
            directory,
            suppression,
            window,
            config,
        }
    }

    /// Enroll one user. Idempotent per (user, sequence): an existing
    /// active or completed row short-circuits unless `re_enroll` is set.
    pub fn enroll(
        &self,
        user_id: Uuid,
        sequence_id: Uuid,
        options: EnrollOptions,
    ) -> DripResult<EnrollOutcome> {
        self.enroll_at(Utc::now(), user_id, sequence_id, options, false)
    }

    fn enroll_at(
        &self,
        now: DateTime<Utc>,
        user_id: Uuid,
        sequence_id: Uuid,
        options: EnrollOptions,
        first_immediately: bool,
    ) -> DripResult<EnrollOutcome> {
        let (sequence, steps) = self.sendable_sequence(&sequence_id)?;

        if self.directory.get(&user_id).is_none() {
            return Err(DripError::RecipientNotFound(user_id));
        }

        let existing = self.enrollments.get(&user_id, &sequence_id);
        if let Some(prev) = &existing {
            let terminal_reusable = prev.status == EnrollmentStatus::Exited;
            if !terminal_reusable && !options.re_enroll {
                return Ok(EnrollOutcome::AlreadyEnrolled(prev.clone()));
            }
        }

        let first_step = &steps[0];
        let first_send_at = if first_immediately {
            now + self.window.immediate_offset()
        } else {
            self.window
                .next_send_at(now, first_step.delay_days, first_step.delay_hours)
        };

        let mut enrollment = Enrollment::new(user_id, sequence_id, first_send_at, now);
        if let Some(prev) = existing {
            // A re-enrollment resets the same row rather than growing a
            // second one for the pair.
            enrollment.id = prev.id;
        }

        info!(
            user_id = %user_id,
            sequence_id = %sequence_id,
            sequence = %sequence.name,
            next_send_at = %first_send_at,
            "user enrolled"
        );

        self.enrollments.upsert(enrollment.clone());
        self.sequences.record_enrolled(&sequence_id);
        Ok(EnrollOutcome::Enrolled(enrollment))
    }

    /// Enroll everyone matching `filter`, in bounded chunks, skipping
    /// non-sendable and (by default) already-active recipients.
    pub fn bulk_enroll(
        &self,
        sequence_id: Uuid,
        filter: &RecipientFilter,
        options: BulkEnrollOptions,
    ) -> DripResult<BulkEnrollReport> {
        self.bulk_enroll_at(Utc::now(), sequence_id, filter, options)
    }

    fn bulk_enroll_at(
        &self,
        now: DateTime<Utc>,
        sequence_id: Uuid,
        filter: &RecipientFilter,
        options: BulkEnrollOptions,
    ) -> DripResult<BulkEnrollReport> {
        self.sendable_sequence(&sequence_id)?;

        let candidates = self.directory.find(filter);
        let chunk_size = options.batch_size.unwrap_or(self.config.batch_size).max(1);

        let mut report = BulkEnrollReport {
            matched: candidates.len(),
            ..Default::default()
        };

        for (batch_index, chunk) in candidates.chunks(chunk_size).enumerate() {
            debug!(batch = batch_index, size = chunk.len(), "bulk enroll batch");

            for recipient in chunk {
                if !self.suppression.is_sendable(recipient) {
                    report.skipped_suppressed += 1;
                    continue;
                }
                if !options.include_enrolled
                    && self.enrollments.has_active(&recipient.id, &sequence_id)
                {
                    report.skipped_already_enrolled += 1;
                    continue;
                }

                let enroll_options = EnrollOptions {
                    re_enroll: options.include_enrolled,
                };
                match self.enroll_at(
                    now,
                    recipient.id,
                    sequence_id,
                    enroll_options,
                    options.send_first_immediately,
                ) {
                    Ok(EnrollOutcome::Enrolled(_)) => report.enrolled += 1,
                    Ok(EnrollOutcome::AlreadyEnrolled(_)) => {
                        report.skipped_already_enrolled += 1;
                    }
                    Err(e) => {
                        report.failed += 1;
                        if report.errors.len() < self.config.max_reported_errors {
                            report.errors.push(BulkEnrollError {
                                email: recipient.email.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        info!(
            sequence_id = %sequence_id,
            matched = report.matched,
            enrolled = report.enrolled,
            skipped_suppressed = report.skipped_suppressed,
            skipped_already_enrolled = report.skipped_already_enrolled,
            failed = report.failed,
            "bulk enrollment finished"
        );
        Ok(report)
    }

    /// Out-of-band exit (conversion, unsubscribe, admin action).
    pub fn exit(&self, user_id: Uuid, sequence_id: Uuid, reason: &str) -> DripResult<Enrollment> {
        let now = Utc::now();
        let row = self
            .enrollments
            .get(&user_id, &sequence_id)
            .ok_or(DripError::EnrollmentNotFound {
                user_id,
                sequence_id,
            })?;

        if row.status != EnrollmentStatus::Active {
            return Ok(row);
        }

        let exited = self.enrollments.exit(&user_id, &sequence_id, reason, now)?;
        self.sequences.record_exited(&sequence_id);
        info!(user_id = %user_id, sequence_id = %sequence_id, reason, "enrollment exited");
        Ok(exited)
    }

    /// A sequence fit to enroll into: present, active, with active steps.
    fn sendable_sequence(&self, sequence_id: &Uuid) -> DripResult<(Sequence, Vec<SequenceStep>)> {
        let sequence = self
            .sequences
            .get(sequence_id)
            .ok_or(DripError::SequenceNotFound(*sequence_id))?;
        if !sequence.active {
            return Err(DripError::SequenceInactive(*sequence_id));
        }
        let steps = sequence.active_steps();
        if steps.is_empty() {
            return Err(DripError::EmptySequence(*sequence_id));
        }
        Ok((sequence, steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SequenceTrigger;
    use coursedrip_core::types::{InMemoryRecipientDirectory, Recipient};
    use std::collections::HashMap;

    fn make_sequence(steps: Vec<SequenceStep>) -> Sequence {
        let now = Utc::now();
        Sequence {
            id: Uuid::new_v4(),
            name: "Welcome".to_string(),
            description: String::new(),
            active: true,
            trigger: SequenceTrigger::Signup,
            steps,
            total_enrolled: 0,
            total_completed: 0,
            total_exited: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn make_recipient(email: &str, tags: &[&str]) -> Recipient {
        Recipient {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            attributes: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    struct Fixture {
        service: EnrollmentService,
        sequences: Arc<SequenceStore>,
        enrollments: Arc<EnrollmentStore>,
        directory: Arc<InMemoryRecipientDirectory>,
    }

    fn fixture() -> Fixture {
        let sequences = Arc::new(SequenceStore::new());
        let enrollments = Arc::new(EnrollmentStore::new());
        let directory = Arc::new(InMemoryRecipientDirectory::new());
        let window = SendWindow::from_config(&Default::default());
        let service = EnrollmentService::new(
            sequences.clone(),
            enrollments.clone(),
            directory.clone(),
            SuppressionFilter::new(),
            window,
            SchedulerConfig::default(),
        );
        Fixture {
            service,
            sequences,
            enrollments,
            directory,
        }
    }

    #[test]
    fn test_enroll_and_already_enrolled() {
        let f = fixture();
        let seq_id = f
            .sequences
            .insert(make_sequence(vec![SequenceStep::new(0, 0, 0, "Hi", "b")]));
        let user = make_recipient("ada@example.com", &[]);
        let user_id = user.id;
        f.directory.insert(user);

        let first = f
            .service
            .enroll(user_id, seq_id, EnrollOptions::default())
            .unwrap();
        let created = match &first {
            EnrollOutcome::Enrolled(e) => e.clone(),
            other => panic!("expected Enrolled, got {other:?}"),
        };
        assert_eq!(created.current_step_index, 0);
        assert!(created.next_send_at.is_some());
        assert_eq!(f.sequences.get(&seq_id).unwrap().total_enrolled, 1);

        let second = f
            .service
            .enroll(user_id, seq_id, EnrollOptions::default())
            .unwrap();
        match &second {
            EnrollOutcome::AlreadyEnrolled(e) => {
                assert_eq!(e.id, created.id);
                assert_eq!(e.enrolled_at, created.enrolled_at);
                assert_eq!(e.next_send_at, created.next_send_at);
            }
            other => panic!("expected AlreadyEnrolled, got {other:?}"),
        }
        assert_eq!(second.user_message(), "already enrolled in this sequence");
        // No second counter bump.
        assert_eq!(f.sequences.get(&seq_id).unwrap().total_enrolled, 1);
    }

    #[test]
    fn test_empty_sequence_rejected() {
        let f = fixture();
        let mut seq = make_sequence(vec![SequenceStep::new(0, 0, 0, "Hi", "b")]);
        seq.steps[0].active = false;
        let seq_id = f.sequences.insert(seq);
        let user = make_recipient("ada@example.com", &[]);
        let user_id = user.id;
        f.directory.insert(user);

        let err = f
            .service
            .enroll(user_id, seq_id, EnrollOptions::default())
            .unwrap_err();
        assert!(matches!(err, DripError::EmptySequence(_)));
    }

    #[test]
    fn test_inactive_sequence_and_unknown_recipient() {
        let f = fixture();
        let mut seq = make_sequence(vec![SequenceStep::new(0, 0, 0, "Hi", "b")]);
        seq.active = false;
        let inactive_id = f.sequences.insert(seq);
        let active_id = f
            .sequences
            .insert(make_sequence(vec![SequenceStep::new(0, 0, 0, "Hi", "b")]));

        assert!(matches!(
            f.service
                .enroll(Uuid::new_v4(), inactive_id, EnrollOptions::default()),
            Err(DripError::SequenceInactive(_))
        ));
        assert!(matches!(
            f.service
                .enroll(Uuid::new_v4(), active_id, EnrollOptions::default()),
            Err(DripError::RecipientNotFound(_))
        ));
    }

    #[test]
    fn test_re_enroll_resets_row() {
        let f = fixture();
        let seq_id = f
            .sequences
            .insert(make_sequence(vec![SequenceStep::new(0, 0, 0, "Hi", "b")]));
        let user = make_recipient("ada@example.com", &[]);
        let user_id = user.id;
        f.directory.insert(user);

        f.service
            .enroll(user_id, seq_id, EnrollOptions::default())
            .unwrap();
        // Simulate progress.
        f.enrollments.advance(&user_id, &seq_id, 1, None).unwrap();
        f.enrollments.record_delivery(&user_id, &seq_id);

        let outcome = f
            .service
            .enroll(user_id, seq_id, EnrollOptions { re_enroll: true })
            .unwrap();
        let reset = match outcome {
            EnrollOutcome::Enrolled(e) => e,
            other => panic!("expected Enrolled, got {other:?}"),
        };
        assert_eq!(reset.current_step_index, 0);
        assert_eq!(reset.emails_received, 0);
        assert_eq!(reset.status, EnrollmentStatus::Active);
        assert_eq!(f.sequences.get(&seq_id).unwrap().total_enrolled, 2);
    }

    #[test]
    fn test_exited_row_re_enrolls_without_flag() {
        let f = fixture();
        let seq_id = f
            .sequences
            .insert(make_sequence(vec![SequenceStep::new(0, 0, 0, "Hi", "b")]));
        let user = make_recipient("ada@example.com", &[]);
        let user_id = user.id;
        f.directory.insert(user);

        f.service
            .enroll(user_id, seq_id, EnrollOptions::default())
            .unwrap();
        f.service.exit(user_id, seq_id, "purchased").unwrap();
        assert_eq!(f.sequences.get(&seq_id).unwrap().total_exited, 1);

        let outcome = f
            .service
            .enroll(user_id, seq_id, EnrollOptions::default())
            .unwrap();
        assert!(matches!(outcome, EnrollOutcome::Enrolled(_)));
    }

    #[test]
    fn test_exit_is_idempotent_and_requires_row() {
        let f = fixture();
        let seq_id = f
            .sequences
            .insert(make_sequence(vec![SequenceStep::new(0, 0, 0, "Hi", "b")]));
        let user = make_recipient("ada@example.com", &[]);
        let user_id = user.id;
        f.directory.insert(user);

        assert!(matches!(
            f.service.exit(user_id, seq_id, "x"),
            Err(DripError::EnrollmentNotFound { .. })
        ));

        f.service
            .enroll(user_id, seq_id, EnrollOptions::default())
            .unwrap();
        let exited = f.service.exit(user_id, seq_id, "purchased").unwrap();
        assert_eq!(exited.status, EnrollmentStatus::Exited);

        // Second exit is a no-op returning the terminal row.
        let again = f.service.exit(user_id, seq_id, "other").unwrap();
        assert_eq!(again.exit_reason.as_deref(), Some("purchased"));
        assert_eq!(f.sequences.get(&seq_id).unwrap().total_exited, 1);
    }

    #[test]
    fn test_bulk_enroll_partial_success() {
        let f = fixture();
        let seq_id = f
            .sequences
            .insert(make_sequence(vec![SequenceStep::new(0, 3, 0, "Hi", "b")]));

        let fresh_a = make_recipient("a@example.com", &[]);
        let fresh_b = make_recipient("b@example.com", &[]);
        let bounced = make_recipient("c@example.com", &["bounced"]);
        let enrolled = make_recipient("d@example.com", &[]);
        let enrolled_id = enrolled.id;
        for r in [&fresh_a, &fresh_b, &bounced, &enrolled] {
            f.directory.insert(r.clone());
        }
        f.service
            .enroll(enrolled_id, seq_id, EnrollOptions::default())
            .unwrap();

        let report = f
            .service
            .bulk_enroll(
                seq_id,
                &RecipientFilter::default(),
                BulkEnrollOptions {
                    batch_size: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(report.matched, 4);
        assert_eq!(report.enrolled, 2);
        assert_eq!(report.skipped_suppressed, 1);
        assert_eq!(report.skipped_already_enrolled, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(f.enrollments.count(), 3);
    }

    #[test]
    fn test_bulk_send_first_immediately() {
        let f = fixture();
        let seq_id = f
            .sequences
            .insert(make_sequence(vec![SequenceStep::new(0, 3, 0, "Hi", "b")]));
        let user = make_recipient("a@example.com", &[]);
        let user_id = user.id;
        f.directory.insert(user);

        let before = Utc::now();
        f.service
            .bulk_enroll(
                seq_id,
                &RecipientFilter::default(),
                BulkEnrollOptions {
                    send_first_immediately: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let row = f.enrollments.get(&user_id, &seq_id).unwrap();
        let next = row.next_send_at.unwrap();
        // "Soon", not three days out.
        assert!(next < before + chrono::Duration::minutes(10));
    }
}
