//! In-process delivery work queue. Jobs are redelivered units of work; every
//! handler must stay idempotent. Delays and rate-limit backoff live here so
//! the business logic only reports outcomes.

use crate::campaign::dispatch::DispatchOutcome;
use crate::shared::models::{RecipientStatus, SequenceEmailStatus};
use crate::shared::state::AppState;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Pick up one page of pending recipients for a campaign or segment.
    Dispatch {
        campaign_id: Uuid,
        segment_id: Option<Uuid>,
    },
    /// Run the per-recipient delivery pipeline.
    Deliver {
        campaign_id: Uuid,
        contact_id: Uuid,
    },
    /// Send one drip step email.
    DeliverSequenceEmail { email_id: Uuid },
    /// Evaluate exit criteria and create the next send attempt.
    ProcessSequenceContact { sequence_contact_id: Uuid },
    /// Tally a finished segment and roll the campaign up if it was the last.
    CompleteSegment { segment_id: Uuid },
}

#[derive(Debug)]
pub struct QueuedJob {
    pub job: Job,
    pub attempt: u32,
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
}

impl JobQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<QueuedJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, job: Job) {
        self.enqueue_attempt(job, 0);
    }

    pub fn enqueue_attempt(&self, job: Job, attempt: u32) {
        if self.tx.send(QueuedJob { job, attempt }).is_err() {
            warn!("job queue closed; dropping job");
        }
    }

    pub fn enqueue_after(&self, job: Job, delay: Duration) {
        self.enqueue_attempt_after(job, 0, delay);
    }

    pub fn enqueue_attempt_after(&self, job: Job, attempt: u32, delay: Duration) {
        if delay.is_zero() {
            self.enqueue_attempt(job, attempt);
            return;
        }
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(QueuedJob { job, attempt }).is_err() {
                warn!("job queue closed; dropping delayed job");
            }
        });
    }
}

pub struct QueueWorker {
    state: Arc<AppState>,
    rx: mpsc::UnboundedReceiver<QueuedJob>,
}

impl QueueWorker {
    pub fn new(state: Arc<AppState>, rx: mpsc::UnboundedReceiver<QueuedJob>) -> Self {
        Self { state, rx }
    }

    pub async fn run(mut self) {
        info!("delivery queue worker started");
        while let Some(queued) = self.rx.recv().await {
            self.handle(queued).await;
        }
        info!("delivery queue worker stopped");
    }

    /// Drains everything currently queued, then returns. Test harness entry
    /// point; production uses `run`.
    pub async fn run_until_idle(&mut self) {
        while let Ok(queued) = self.rx.try_recv() {
            self.handle(queued).await;
        }
    }

    async fn handle(&self, queued: QueuedJob) {
        let QueuedJob { job, attempt } = queued;
        debug!("handling job {job:?} (attempt {attempt})");
        match job.clone() {
            Job::Dispatch {
                campaign_id,
                segment_id,
            } => match self.state.dispatcher().dispatch(campaign_id, segment_id) {
                Ok(DispatchOutcome::MoreRemaining) => {
                    let delay =
                        Duration::from_secs(self.state.config.dispatch.requeue_delay_secs);
                    self.state.queue.enqueue_after(job, delay);
                }
                Ok(_) => {}
                Err(e) => error!("dispatch failed for campaign {campaign_id}: {e}"),
            },
            Job::Deliver {
                campaign_id,
                contact_id,
            } => match self.state.pipeline().deliver(campaign_id, contact_id) {
                Ok(outcome) => debug!("delivery for contact {contact_id}: {outcome:?}"),
                Err(e) if e.is_rate_limited() => {
                    self.retry_or_fail_recipient(job, attempt, campaign_id, contact_id, &e)
                }
                Err(e) => error!("delivery failed for contact {contact_id}: {e}"),
            },
            Job::DeliverSequenceEmail { email_id } => {
                match self.state.sequences().deliver_email(email_id) {
                    Ok(outcome) => debug!("sequence email {email_id}: {outcome:?}"),
                    Err(e) if e.is_rate_limited() => {
                        self.retry_or_fail_sequence_email(job, attempt, email_id, &e)
                    }
                    Err(e) => error!("sequence email {email_id} failed: {e}"),
                }
            }
            Job::ProcessSequenceContact { sequence_contact_id } => {
                if let Err(e) = self.state.sequences().process_contact(sequence_contact_id) {
                    error!("sequence contact {sequence_contact_id} processing failed: {e}");
                }
            }
            Job::CompleteSegment { segment_id } => {
                if let Err(e) = self.state.segments().complete_segment(segment_id) {
                    error!("segment {segment_id} completion failed: {e}");
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.state.config.dispatch.retry_backoff_secs;
        Duration::from_secs(base.saturating_mul(1 << attempt.min(6)))
    }

    fn retry_or_fail_recipient(
        &self,
        job: Job,
        attempt: u32,
        campaign_id: Uuid,
        contact_id: Uuid,
        cause: &crate::delivery::DeliveryError,
    ) {
        let max = self.state.config.dispatch.retry_max_attempts;
        if attempt + 1 < max {
            warn!("rate limited delivering to contact {contact_id}; backing off");
            self.state
                .queue
                .enqueue_attempt_after(job, attempt + 1, self.backoff(attempt));
            return;
        }
        warn!("rate-limit retries exhausted for contact {contact_id}; marking failed");
        let result = self
            .state
            .store
            .recipient(campaign_id, contact_id)
            .and_then(|found| match found {
                Some(mut recipient) if recipient.status == RecipientStatus::Pending => {
                    recipient.failure_reason =
                        Some(format!("rate limited, retries exhausted: {cause}"));
                    recipient.stamp(RecipientStatus::Failed, self.state.clock.now());
                    self.state.store.save_recipient(&recipient)
                }
                _ => Ok(()),
            });
        if let Err(e) = result {
            error!("failed to mark recipient failed after retries: {e}");
        }
    }

    fn retry_or_fail_sequence_email(
        &self,
        job: Job,
        attempt: u32,
        email_id: Uuid,
        cause: &crate::delivery::DeliveryError,
    ) {
        let max = self.state.config.dispatch.retry_max_attempts;
        if attempt + 1 < max {
            warn!("rate limited on sequence email {email_id}; backing off");
            self.state
                .queue
                .enqueue_attempt_after(job, attempt + 1, self.backoff(attempt));
            return;
        }
        warn!("rate-limit retries exhausted for sequence email {email_id}; marking failed");
        let result = self.state.store.sequence_email(email_id).and_then(|found| {
            match found {
                Some(mut email) if email.status == SequenceEmailStatus::Pending => {
                    email.failure_reason =
                        Some(format!("rate limited, retries exhausted: {cause}"));
                    email.status = SequenceEmailStatus::Failed;
                    self.state.store.save_sequence_email(&email)?;
                    // The send outcome is known, so the cursor still advances.
                    self.state.sequences().advance_contact(email.sequence_contact_id)
                }
                _ => Ok(()),
            }
        });
        if let Err(e) = result {
            error!("failed to settle sequence email after retries: {e}");
        }
    }
}
