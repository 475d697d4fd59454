//! Drip-sequence engine: per-enrollment step cursor, delay and time-of-day
//! scheduling, and exit-criteria evaluation. Exits always win over sends;
//! running out of steps is completion, not an exit.

use crate::campaign::commands::ControlError;
use crate::delivery::template::{render, TemplateVars};
use crate::delivery::{DeliveryError, OutboundEmail, Transport};
use crate::queue::{Job, JobQueue};
use crate::shared::clock::Clock;
use crate::shared::models::{
    ExitReason, SequenceContact, SequenceContactStatus, SequenceEmail, SequenceEmailStatus,
    SequenceStatus, SequenceStep,
};
use crate::store::{Store, StoreResult};
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceSendOutcome {
    Sent,
    Failed,
    Skipped,
    MissingRecord,
}

pub struct SequenceEngine<'a> {
    store: &'a dyn Store,
    transport: &'a dyn Transport,
    clock: &'a dyn Clock,
    queue: &'a JobQueue,
}

impl<'a> SequenceEngine<'a> {
    pub fn new(
        store: &'a dyn Store,
        transport: &'a dyn Transport,
        clock: &'a dyn Clock,
        queue: &'a JobQueue,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            queue,
        }
    }

    /// When the step's delay lands, the send happens at the step's preferred
    /// time of day when it has one, rolled forward a day if already past.
    pub fn schedule_step(now: DateTime<Utc>, step: &SequenceStep) -> DateTime<Utc> {
        let target = now + Duration::days(i64::from(step.delay_days));
        match step.send_time {
            None => target,
            Some(time) => {
                let mut candidate = target.date_naive().and_time(time).and_utc();
                if candidate < target {
                    candidate += Duration::days(1);
                }
                candidate
            }
        }
    }

    /// Activation requires at least one step. Paused sequences re-activate.
    pub fn activate(&self, sequence_id: Uuid) -> Result<(), ControlError> {
        let Some(mut sequence) = self.store.sequence(sequence_id)? else {
            return Err(ControlError::NotFound(format!("sequence {sequence_id} not found")));
        };
        match sequence.status {
            SequenceStatus::Active => {
                return Err(ControlError::Rejected("sequence is already active".to_string()));
            }
            SequenceStatus::Draft | SequenceStatus::Paused => {}
        }
        if self.store.steps(sequence_id)?.is_empty() {
            return Err(ControlError::Rejected(
                "sequence needs at least one step before activation".to_string(),
            ));
        }
        sequence.status = SequenceStatus::Active;
        sequence.updated_at = self.clock.now();
        self.store.save_sequence(&sequence)?;
        Ok(())
    }

    pub fn pause(&self, sequence_id: Uuid) -> Result<(), ControlError> {
        let Some(mut sequence) = self.store.sequence(sequence_id)? else {
            return Err(ControlError::NotFound(format!("sequence {sequence_id} not found")));
        };
        if sequence.status != SequenceStatus::Active {
            return Err(ControlError::Rejected(format!(
                "cannot pause a {} sequence",
                sequence.status.as_str()
            )));
        }
        sequence.status = SequenceStatus::Paused;
        sequence.updated_at = self.clock.now();
        self.store.save_sequence(&sequence)?;
        Ok(())
    }

    /// Enrolls contacts that are not already in the sequence; the first
    /// step's delay decides each enrollment's initial send time.
    pub fn add_contacts(&self, sequence_id: Uuid, contact_ids: &[Uuid]) -> Result<usize, ControlError> {
        let Some(sequence) = self.store.sequence(sequence_id)? else {
            return Err(ControlError::NotFound(format!("sequence {sequence_id} not found")));
        };
        let first_step = self.store.step_at(sequence.id, 0)?;
        let now = self.clock.now();
        let mut enrolled = 0;
        for &contact_id in contact_ids {
            if self.store.sequence_contact(sequence_id, contact_id)?.is_some() {
                continue;
            }
            if self.store.contact(contact_id)?.is_none() {
                debug!("skipping unknown contact {contact_id} for sequence {sequence_id}");
                continue;
            }
            let mut sc = SequenceContact::new(sequence_id, contact_id, now);
            sc.next_send_at = Some(match &first_step {
                Some(step) => Self::schedule_step(now, step),
                None => now,
            });
            self.store.insert_sequence_contact(&sc)?;
            enrolled += 1;
        }
        Ok(enrolled)
    }

    pub fn remove_contact(&self, sequence_id: Uuid, contact_id: Uuid) -> Result<(), ControlError> {
        let Some(mut sc) = self.store.sequence_contact(sequence_id, contact_id)? else {
            return Err(ControlError::NotFound(format!(
                "contact {contact_id} is not enrolled in sequence {sequence_id}"
            )));
        };
        if sc.status != SequenceContactStatus::Active {
            return Err(ControlError::Rejected(
                "enrollment has already finished".to_string(),
            ));
        }
        self.exit(&mut sc, ExitReason::Manual)?;
        Ok(())
    }

    /// One enrollment tick: exit criteria first, then either completion by
    /// step exhaustion or a send attempt for the current step. The cursor
    /// is not advanced here; that waits for the send outcome.
    pub fn process_contact(&self, sequence_contact_id: Uuid) -> StoreResult<()> {
        let Some(mut sc) = self.store.sequence_contact_by_id(sequence_contact_id)? else {
            debug!("sequence contact {sequence_contact_id} is gone");
            return Ok(());
        };
        if sc.status != SequenceContactStatus::Active {
            return Ok(());
        }
        let Some(sequence) = self.store.sequence(sc.sequence_id)? else {
            debug!("sequence {} is gone", sc.sequence_id);
            return Ok(());
        };
        if sequence.status != SequenceStatus::Active {
            return Ok(());
        }

        // Exit criteria always win over advancing.
        if self.store.has_closed_won_deal(sc.contact_id)? {
            self.exit(&mut sc, ExitReason::Converted)?;
            return Ok(());
        }
        let unsubscribed = self
            .store
            .contact(sc.contact_id)?
            .is_some_and(|c| c.unsubscribed);
        if unsubscribed {
            self.exit(&mut sc, ExitReason::Unsubscribed)?;
            return Ok(());
        }

        let Some(step) = self.store.step_at(sc.sequence_id, sc.current_step)? else {
            self.complete(&mut sc)?;
            return Ok(());
        };

        // Redelivered ticks must not mint a second attempt for the step.
        if self
            .store
            .sequence_email_for_step(sc.id, step.position)?
            .is_some()
        {
            debug!(
                "step {} already has a send attempt for enrollment {}; skipping",
                step.position, sc.id
            );
            return Ok(());
        }

        let email = SequenceEmail::new(&sc, step.position, self.clock.now());
        self.store.insert_sequence_email(&email)?;
        self.queue.enqueue(Job::DeliverSequenceEmail { email_id: email.id });
        Ok(())
    }

    /// Sends one step email. Rate limits propagate (leaving the record
    /// pending for the retry); any other failure settles the record and
    /// still advances the cursor, since the outcome is known.
    pub fn deliver_email(&self, email_id: Uuid) -> Result<SequenceSendOutcome, DeliveryError> {
        let Some(mut email) = self.store.sequence_email(email_id)? else {
            debug!("sequence email {email_id} is gone");
            return Ok(SequenceSendOutcome::MissingRecord);
        };
        if email.status != SequenceEmailStatus::Pending {
            return Ok(SequenceSendOutcome::Skipped);
        }

        match self.attempt(&email) {
            Ok(message_id) => {
                email.message_id = Some(message_id);
                email.status = SequenceEmailStatus::Sent;
                email.sent_at = Some(self.clock.now());
                if let Err(e) = self.store.save_sequence_email(&email) {
                    error!("failed to record sent sequence email {}: {e}", email.id);
                }
                self.advance_contact(email.sequence_contact_id)?;
                Ok(SequenceSendOutcome::Sent)
            }
            Err(e) if e.is_rate_limited() => Err(e),
            Err(e) => {
                email.failure_reason = Some(e.to_string());
                email.status = SequenceEmailStatus::Failed;
                if let Err(save_err) = self.store.save_sequence_email(&email) {
                    error!("failed to record failed sequence email {}: {save_err}", email.id);
                }
                self.advance_contact(email.sequence_contact_id)?;
                Ok(SequenceSendOutcome::Failed)
            }
        }
    }

    /// Moves the cursor to the next step and computes its send time, or
    /// completes the enrollment when no step remains.
    pub fn advance_contact(&self, sequence_contact_id: Uuid) -> StoreResult<()> {
        let Some(mut sc) = self.store.sequence_contact_by_id(sequence_contact_id)? else {
            return Ok(());
        };
        if sc.status != SequenceContactStatus::Active {
            return Ok(());
        }
        match self.store.step_at(sc.sequence_id, sc.current_step + 1)? {
            Some(next_step) => {
                sc.current_step += 1;
                sc.next_send_at = Some(Self::schedule_step(self.clock.now(), &next_step));
                self.store.save_sequence_contact(&sc)?;
            }
            None => self.complete(&mut sc)?,
        }
        Ok(())
    }

    fn attempt(&self, email: &SequenceEmail) -> Result<String, DeliveryError> {
        let step = self
            .store
            .step_at(email.sequence_id, email.step_position)?
            .ok_or_else(|| {
                DeliveryError::Content(format!(
                    "step {} of sequence {} is gone",
                    email.step_position, email.sequence_id
                ))
            })?;
        let contact = self.store.contact(email.contact_id)?.ok_or_else(|| {
            DeliveryError::Content(format!("contact {} is gone", email.contact_id))
        })?;

        let vars = TemplateVars::from_contact(&contact);
        self.transport.send(&OutboundEmail {
            to_email: contact.email.clone(),
            to_name: contact.display_name(),
            subject: render(&step.subject, &vars),
            body_html: render(&step.body_html, &vars),
        })
    }

    /// Normal exhaustion: distinct from an exit.
    fn complete(&self, sc: &mut SequenceContact) -> StoreResult<()> {
        sc.status = SequenceContactStatus::Completed;
        sc.next_send_at = None;
        sc.finished_at = Some(self.clock.now());
        self.store.save_sequence_contact(sc)?;
        info!("sequence enrollment {} completed", sc.id);
        Ok(())
    }

    fn exit(&self, sc: &mut SequenceContact, reason: ExitReason) -> StoreResult<()> {
        sc.status = SequenceContactStatus::Exited;
        sc.exit_reason = Some(reason);
        sc.next_send_at = None;
        sc.finished_at = Some(self.clock.now());
        self.store.save_sequence_contact(sc)?;
        info!("sequence enrollment {} exited: {}", sc.id, reason.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::RecordingTransport;
    use crate::shared::clock::FixedClock;
    use crate::shared::models::{Contact, Sequence};
    use crate::store::memory::MemStore;
    use crate::store::{ContactStore, SequenceStore};
    use chrono::{NaiveTime, TimeZone, Utc};

    struct Fixture {
        store: MemStore,
        clock: FixedClock,
        transport: RecordingTransport,
        sequence: Sequence,
        contact: Contact,
    }

    impl Fixture {
        /// Steps given as (delay_days, send_time).
        fn new(steps: &[(i32, Option<NaiveTime>)]) -> Self {
            let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 5, 5, 14, 0, 0).unwrap());
            let store = MemStore::new();
            let mut sequence = Sequence::new("drip", clock.now());
            sequence.status = SequenceStatus::Active;
            store.insert_sequence(&sequence).unwrap();
            for (position, (delay_days, send_time)) in steps.iter().enumerate() {
                store
                    .insert_step(&SequenceStep {
                        id: Uuid::new_v4(),
                        sequence_id: sequence.id,
                        position: position as i32,
                        delay_days: *delay_days,
                        send_time: *send_time,
                        subject: format!("Step {position} for {{{{first_name}}}}"),
                        body_html: "<p>hello</p>".to_string(),
                        created_at: clock.now(),
                    })
                    .unwrap();
            }
            let contact = Contact {
                id: Uuid::new_v4(),
                first_name: Some("Mary".to_string()),
                last_name: None,
                email: "mary@example.com".to_string(),
                company: None,
                job_title: None,
                company_id: None,
                pipeline_stage: "none".to_string(),
                unsubscribed: false,
                created_at: clock.now(),
            };
            store.insert_contact(&contact).unwrap();
            Self {
                store,
                clock,
                transport: RecordingTransport::new(),
                sequence,
                contact,
            }
        }

        fn engine<'a>(&'a self, queue: &'a JobQueue) -> SequenceEngine<'a> {
            SequenceEngine::new(&self.store, &self.transport, &self.clock, queue)
        }
    }

    #[test]
    fn enrollment_uses_step_zero_delay() {
        let fx = Fixture::new(&[(0, None), (3, None)]);
        let (queue, _rx) = JobQueue::channel();
        let engine = fx.engine(&queue);

        assert_eq!(engine.add_contacts(fx.sequence.id, &[fx.contact.id]).unwrap(), 1);
        let sc = fx
            .store
            .sequence_contact(fx.sequence.id, fx.contact.id)
            .unwrap()
            .unwrap();
        assert_eq!(sc.current_step, 0);
        assert_eq!(sc.next_send_at, Some(fx.clock.now()));

        // Enrolling again is a no-op.
        assert_eq!(engine.add_contacts(fx.sequence.id, &[fx.contact.id]).unwrap(), 0);
    }

    #[test]
    fn send_then_advance_lands_three_days_out() {
        let fx = Fixture::new(&[(0, None), (3, None)]);
        let (queue, mut rx) = JobQueue::channel();
        let engine = fx.engine(&queue);
        let t0 = fx.clock.now();

        engine.add_contacts(fx.sequence.id, &[fx.contact.id]).unwrap();
        let sc = fx
            .store
            .sequence_contact(fx.sequence.id, fx.contact.id)
            .unwrap()
            .unwrap();

        engine.process_contact(sc.id).unwrap();
        let Job::DeliverSequenceEmail { email_id } = rx.try_recv().unwrap().job else {
            panic!("expected a sequence delivery job");
        };
        assert_eq!(engine.deliver_email(email_id).unwrap(), SequenceSendOutcome::Sent);

        let sc = fx.store.sequence_contact_by_id(sc.id).unwrap().unwrap();
        assert_eq!(sc.current_step, 1);
        assert_eq!(sc.next_send_at, Some(t0 + Duration::days(3)));

        let email = fx.store.sequence_email(email_id).unwrap().unwrap();
        assert_eq!(email.status, SequenceEmailStatus::Sent);
        assert!(email.message_id.is_some());
        assert_eq!(fx.transport.last_sent().unwrap().subject, "Step 0 for Mary");
    }

    #[test]
    fn preferred_time_of_day_adjusts_and_rolls_forward() {
        // Now is 14:00; a same-day 09:00 preference has passed.
        let fx = Fixture::new(&[(0, None)]);
        let morning = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let evening = NaiveTime::from_hms_opt(18, 30, 0).unwrap();
        let now = fx.clock.now();

        let step_morning = SequenceStep {
            id: Uuid::new_v4(),
            sequence_id: fx.sequence.id,
            position: 9,
            delay_days: 2,
            send_time: Some(morning),
            subject: "s".to_string(),
            body_html: "b".to_string(),
            created_at: now,
        };
        let scheduled = SequenceEngine::schedule_step(now, &step_morning);
        assert_eq!(
            scheduled,
            Utc.with_ymd_and_hms(2025, 5, 8, 9, 0, 0).unwrap()
        );

        let step_evening = SequenceStep {
            send_time: Some(evening),
            ..step_morning
        };
        let scheduled = SequenceEngine::schedule_step(now, &step_evening);
        assert_eq!(
            scheduled,
            Utc.with_ymd_and_hms(2025, 5, 7, 18, 30, 0).unwrap()
        );
    }

    #[test]
    fn exhaustion_completes_rather_than_exits() {
        let fx = Fixture::new(&[(0, None)]);
        let (queue, mut rx) = JobQueue::channel();
        let engine = fx.engine(&queue);

        engine.add_contacts(fx.sequence.id, &[fx.contact.id]).unwrap();
        let sc = fx
            .store
            .sequence_contact(fx.sequence.id, fx.contact.id)
            .unwrap()
            .unwrap();

        engine.process_contact(sc.id).unwrap();
        let Job::DeliverSequenceEmail { email_id } = rx.try_recv().unwrap().job else {
            panic!("expected a sequence delivery job");
        };
        engine.deliver_email(email_id).unwrap();

        let sc = fx.store.sequence_contact_by_id(sc.id).unwrap().unwrap();
        assert_eq!(sc.status, SequenceContactStatus::Completed);
        assert_eq!(sc.exit_reason, None);
        assert_eq!(sc.next_send_at, None);
    }

    #[test]
    fn conversion_exit_wins_over_advancing() {
        let fx = Fixture::new(&[(0, None), (3, None)]);
        let (queue, mut rx) = JobQueue::channel();
        let engine = fx.engine(&queue);

        engine.add_contacts(fx.sequence.id, &[fx.contact.id]).unwrap();
        fx.store
            .insert_deal(fx.contact.id, "closed_won", fx.clock.now())
            .unwrap();
        let sc = fx
            .store
            .sequence_contact(fx.sequence.id, fx.contact.id)
            .unwrap()
            .unwrap();

        engine.process_contact(sc.id).unwrap();
        let sc = fx.store.sequence_contact_by_id(sc.id).unwrap().unwrap();
        assert_eq!(sc.status, SequenceContactStatus::Exited);
        assert_eq!(sc.exit_reason, Some(ExitReason::Converted));
        // No send attempt was created.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_exit_stops_the_drip() {
        let fx = Fixture::new(&[(0, None), (3, None)]);
        let (queue, mut rx) = JobQueue::channel();
        let engine = fx.engine(&queue);

        engine.add_contacts(fx.sequence.id, &[fx.contact.id]).unwrap();
        let mut contact = fx.store.contact(fx.contact.id).unwrap().unwrap();
        contact.unsubscribed = true;
        fx.store.save_contact(&contact).unwrap();

        let sc = fx
            .store
            .sequence_contact(fx.sequence.id, fx.contact.id)
            .unwrap()
            .unwrap();
        engine.process_contact(sc.id).unwrap();

        let sc = fx.store.sequence_contact_by_id(sc.id).unwrap().unwrap();
        assert_eq!(sc.exit_reason, Some(ExitReason::Unsubscribed));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn inactive_sequence_is_a_noop() {
        let fx = Fixture::new(&[(0, None)]);
        let (queue, mut rx) = JobQueue::channel();
        let engine = fx.engine(&queue);
        engine.add_contacts(fx.sequence.id, &[fx.contact.id]).unwrap();

        let mut sequence = fx.store.sequence(fx.sequence.id).unwrap().unwrap();
        sequence.status = SequenceStatus::Paused;
        fx.store.save_sequence(&sequence).unwrap();

        let sc = fx
            .store
            .sequence_contact(fx.sequence.id, fx.contact.id)
            .unwrap()
            .unwrap();
        engine.process_contact(sc.id).unwrap();
        assert!(rx.try_recv().is_err());
        let sc = fx.store.sequence_contact_by_id(sc.id).unwrap().unwrap();
        assert_eq!(sc.status, SequenceContactStatus::Active);
    }

    #[test]
    fn redelivered_tick_does_not_mint_a_second_attempt() {
        let fx = Fixture::new(&[(0, None), (3, None)]);
        let (queue, mut rx) = JobQueue::channel();
        let engine = fx.engine(&queue);
        engine.add_contacts(fx.sequence.id, &[fx.contact.id]).unwrap();
        let sc = fx
            .store
            .sequence_contact(fx.sequence.id, fx.contact.id)
            .unwrap()
            .unwrap();

        engine.process_contact(sc.id).unwrap();
        engine.process_contact(sc.id).unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "second tick must not enqueue");
    }

    #[test]
    fn activation_requires_a_step() {
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 5, 5, 14, 0, 0).unwrap());
        let store = MemStore::new();
        let sequence = Sequence::new("empty", clock.now());
        store.insert_sequence(&sequence).unwrap();
        let transport = RecordingTransport::new();
        let (queue, _rx) = JobQueue::channel();
        let engine = SequenceEngine::new(&store, &transport, &clock, &queue);

        assert!(matches!(
            engine.activate(sequence.id),
            Err(ControlError::Rejected(_))
        ));
    }

    #[test]
    fn failed_send_still_advances_the_cursor() {
        let fx = Fixture::new(&[(0, None), (3, None)]);
        let transport = RecordingTransport::with_responses(vec![Err(
            DeliveryError::Transport("550 no such user".to_string()),
        )]);
        let (queue, mut rx) = JobQueue::channel();
        let engine = SequenceEngine::new(&fx.store, &transport, &fx.clock, &queue);

        engine.add_contacts(fx.sequence.id, &[fx.contact.id]).unwrap();
        let sc = fx
            .store
            .sequence_contact(fx.sequence.id, fx.contact.id)
            .unwrap()
            .unwrap();
        engine.process_contact(sc.id).unwrap();
        let Job::DeliverSequenceEmail { email_id } = rx.try_recv().unwrap().job else {
            panic!("expected a sequence delivery job");
        };

        assert_eq!(
            engine.deliver_email(email_id).unwrap(),
            SequenceSendOutcome::Failed
        );
        let sc = fx.store.sequence_contact_by_id(sc.id).unwrap().unwrap();
        assert_eq!(sc.current_step, 1);
        let email = fx.store.sequence_email(email_id).unwrap().unwrap();
        assert_eq!(email.status, SequenceEmailStatus::Failed);
        assert!(email.failure_reason.is_some());
    }
}
