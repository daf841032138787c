//! The scheduler/runner — a periodically-invoked batch pass that selects
//! due enrollments, advances their state, and fires deliveries.
//!
//! The invariant that shapes everything here is advance-before-send: the
//! step index moves and is persisted *before* the transport is called.
//! If the provider accepts a message and the response is lost, the row
//! has already moved on — the recipient misses one email in the worst
//! case, and is never double-sent. The triggering mechanism stays
//! outside: any timer, queue consumer, or test harness can call
//! `run_once`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use coursedrip_core::config::SchedulerConfig;
use coursedrip_core::mail::{EmailTransport, OutboundEmail, RecentSendLookup};
use coursedrip_core::types::{Recipient, RecipientDirectory};
use coursedrip_delivery::templates;
use coursedrip_delivery::{SendLog, SuppressionFilter};

use crate::schedule::SendWindow;
use crate::store::{EnrollmentStore, SequenceStore};
use crate::types::{Enrollment, SequenceStep};

/// Per-run statistics, reported to the caller for dashboards/alerting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Candidates selected into this run (suppressed ones never count).
    pub processed: usize,
    pub sent: usize,
    pub completed: usize,
    pub skipped_suppressed: usize,
    pub skipped_deduped: usize,
    pub errors: usize,
}

/// Batch processor over due enrollments.
pub struct SequenceRunner {
    sequences: Arc<SequenceStore>,
    enrollments: Arc<EnrollmentStore>,
    directory: Arc<dyn RecipientDirectory>,
    suppression: SuppressionFilter,
    recent_sends: Arc<dyn RecentSendLookup>,
    transport: Arc<dyn EmailTransport>,
    send_log: Arc<SendLog>,
    window: SendWindow,
    config: SchedulerConfig,
}

impl SequenceRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sequences: Arc<SequenceStore>,
        enrollments: Arc<EnrollmentStore>,
        directory: Arc<dyn RecipientDirectory>,
        suppression: SuppressionFilter,
        recent_sends: Arc<dyn RecentSendLookup>,
        transport: Arc<dyn EmailTransport>,
        send_log: Arc<SendLog>,
        window: SendWindow,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            sequences,
            enrollments,
            directory,
            suppression,
            recent_sends,
            transport,
            send_log,
            window,
            config,
        }
    }

    /// One scheduled pass over everything currently due.
    pub async fn run_once(&self) -> RunSummary {
        self.run_once_at(Utc::now()).await
    }

    /// Clock-injected variant of `run_once`.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> RunSummary {
        let dedup_window = Duration::hours(i64::from(self.config.dedup_window_hours));
        let mut summary = RunSummary::default();

        for enrollment in self.enrollments.due(now) {
            if summary.processed >= self.config.batch_size {
                // Whatever is left stays due and the next run picks it up.
                break;
            }

            let Some(recipient) = self.directory.get(&enrollment.user_id) else {
                warn!(
                    user_id = %enrollment.user_id,
                    sequence_id = %enrollment.sequence_id,
                    "due enrollment has no recipient record"
                );
                summary.errors += 1;
                continue;
            };

            // Suppression facts can arrive at any point in an enrollment's
            // lifetime, so the check happens here, at selection time.
            if let Some(reason) = self.suppression.suppression_reason(&recipient) {
                debug!(user_id = %enrollment.user_id, ?reason, "recipient suppressed");
                summary.skipped_suppressed += 1;
                continue;
            }

            summary.processed += 1;
            self.process_candidate(&enrollment, &recipient, now, dedup_window, &mut summary)
                .await;
        }

        info!(
            processed = summary.processed,
            sent = summary.sent,
            completed = summary.completed,
            skipped_suppressed = summary.skipped_suppressed,
            skipped_deduped = summary.skipped_deduped,
            errors = summary.errors,
            "runner pass finished"
        );
        summary
    }

    async fn process_candidate(
        &self,
        enrollment: &Enrollment,
        recipient: &Recipient,
        now: DateTime<Utc>,
        dedup_window: Duration,
        summary: &mut RunSummary,
    ) {
        let steps = match self.sequences.active_steps(&enrollment.sequence_id) {
            Ok(steps) => steps,
            Err(e) => {
                warn!(error = %e, enrollment_id = %enrollment.id, "step lookup failed");
                summary.errors += 1;
                return;
            }
        };

        // All steps sent: terminal transition.
        if enrollment.current_step_index >= steps.len() {
            match self
                .enrollments
                .complete(&enrollment.user_id, &enrollment.sequence_id, now)
            {
                Ok(_) => {
                    self.sequences.record_completed(&enrollment.sequence_id);
                    summary.completed += 1;
                    info!(
                        user_id = %enrollment.user_id,
                        sequence_id = %enrollment.sequence_id,
                        "enrollment completed"
                    );
                }
                Err(e) => {
                    warn!(error = %e, enrollment_id = %enrollment.id, "completion failed");
                    summary.errors += 1;
                }
            }
            return;
        }

        let step = &steps[enrollment.current_step_index];

        // Another subsystem may have emailed this inbox minutes ago. Skip
        // without touching state; `next_send_at` is unchanged, so the row
        // is simply reconsidered next run.
        if self
            .recent_sends
            .recently_emailed(&recipient.email, dedup_window, now)
        {
            debug!(to = %recipient.email, "recently emailed elsewhere, deferring");
            summary.skipped_deduped += 1;
            return;
        }

        // Advance before send.
        let next_index = enrollment.current_step_index + 1;
        let next_send_at = steps
            .get(next_index)
            .map(|next| self.window.next_send_at(now, next.delay_days, next.delay_hours));
        if let Err(e) = self.enrollments.advance(
            &enrollment.user_id,
            &enrollment.sequence_id,
            next_index,
            next_send_at,
        ) {
            // Nothing externally visible happened; the row retries next run.
            warn!(error = %e, enrollment_id = %enrollment.id, "advance failed, step not sent");
            summary.errors += 1;
            return;
        }

        let email = self.render_step(recipient, enrollment, step);
        match self.transport.send(&email).await {
            Ok(receipt) => {
                self.send_log.record_sent(&email, &receipt);
                self.enrollments
                    .record_delivery(&enrollment.user_id, &enrollment.sequence_id);
                self.sequences
                    .record_step_sent(&enrollment.sequence_id, &step.id);
                summary.sent += 1;
                debug!(
                    to = %recipient.email,
                    step_order = step.order,
                    provider_message_id = %receipt.provider_message_id,
                    "step sent"
                );
            }
            Err(e) => {
                // The index stays advanced: the recipient misses this step
                // rather than ever risking a duplicate.
                self.send_log.record_failed(&email, now);
                warn!(error = %e, to = %recipient.email, "delivery failed");
                summary.errors += 1;
            }
        }
    }

    fn render_step(
        &self,
        recipient: &Recipient,
        enrollment: &Enrollment,
        step: &SequenceStep,
    ) -> OutboundEmail {
        let vars = templates::merge_vars(recipient);
        OutboundEmail {
            to: recipient.email.clone(),
            subject: templates::render_subject(&step.subject, &vars),
            html_body: templates::render_html(&step.body, &vars),
            text_body: Some(templates::render_text(&step.body, &vars)),
            user_id: Some(enrollment.user_id),
            sequence_id: Some(enrollment.sequence_id),
            step_id: Some(step.id),
        }
    }
}
