//! User-facing campaign actions as command values run through one invoker.
//! Callers never branch on campaign status; the state machine decides.

use super::state::StateMachine;
use crate::queue::{Job, JobQueue};
use crate::shared::clock::Clock;
use crate::shared::models::{AudienceKind, Campaign, CampaignRecipient};
use crate::store::{Store, StoreError};
use chrono::{DateTime, Utc};
use log::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum CampaignCommand {
    Schedule { at: DateTime<Utc> },
    Send,
    Pause,
    Resume,
    Stop,
    AddRecipients { ids: Vec<Uuid> },
    RemoveRecipients { ids: Vec<Uuid> },
}

/// Transitions report a success flag plus a human-readable reason;
/// recipient mutations report how many records changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Transition { changed: bool, message: String },
    Count(usize),
}

impl CommandOutcome {
    pub fn changed(&self) -> bool {
        match self {
            Self::Transition { changed, .. } => *changed,
            Self::Count(_) => true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("{0}")]
    NotFound(String),
    /// Expected user-facing refusal; carries the reason.
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct CommandInvoker<'a> {
    store: &'a dyn Store,
    clock: &'a dyn Clock,
    queue: &'a JobQueue,
}

impl<'a> CommandInvoker<'a> {
    pub fn new(store: &'a dyn Store, clock: &'a dyn Clock, queue: &'a JobQueue) -> Self {
        Self { store, clock, queue }
    }

    pub fn execute(
        &self,
        campaign_id: Uuid,
        command: CampaignCommand,
    ) -> Result<CommandOutcome, ControlError> {
        let Some(mut campaign) = self.store.campaign(campaign_id)? else {
            return Err(ControlError::NotFound(format!("campaign {campaign_id} not found")));
        };

        let machine = StateMachine::new(self.store, self.clock);
        let (result, success_message) = match command {
            CampaignCommand::Schedule { at } => {
                (machine.schedule(&mut campaign, at)?, "campaign scheduled")
            }
            CampaignCommand::Send => (machine.send(&mut campaign)?, "campaign sending"),
            CampaignCommand::Pause => (machine.pause(&mut campaign)?, "campaign paused"),
            CampaignCommand::Resume => (machine.resume(&mut campaign)?, "campaign resumed"),
            CampaignCommand::Stop => (machine.stop(&mut campaign)?, "campaign stopped"),
            CampaignCommand::AddRecipients { ids } => {
                return Ok(CommandOutcome::Count(self.add_recipients(&campaign, &ids)?));
            }
            CampaignCommand::RemoveRecipients { ids } => {
                return Ok(CommandOutcome::Count(
                    self.store.remove_pending(campaign.id, &ids)?,
                ));
            }
        };

        match result {
            Ok(change) => {
                campaign.updated_at = self.clock.now();
                self.store.save_campaign(&campaign)?;
                if change.begin_dispatch {
                    self.queue.enqueue(Job::Dispatch {
                        campaign_id: campaign.id,
                        segment_id: None,
                    });
                }
                Ok(CommandOutcome::Transition {
                    changed: true,
                    message: success_message.to_string(),
                })
            }
            Err(denied) => Ok(CommandOutcome::Transition {
                changed: false,
                message: denied.0,
            }),
        }
    }

    /// Baseline operation, legal in every state: attach contacts that are
    /// not already on the campaign. Company-audience campaigns take company
    /// ids and expand them to their contacts first.
    fn add_recipients(&self, campaign: &Campaign, ids: &[Uuid]) -> Result<usize, ControlError> {
        let contact_ids = match campaign.audience {
            AudienceKind::Contact => ids.to_vec(),
            AudienceKind::Company => self.store.contact_ids_for_companies(ids)?,
        };

        let existing = self.store.recipient_contact_ids(campaign.id)?;
        let now = self.clock.now();
        let mut added = 0;
        for contact_id in contact_ids {
            if existing.contains(&contact_id) {
                continue;
            }
            if self.store.contact(contact_id)?.is_none() {
                debug!("skipping unknown contact {contact_id} for campaign {}", campaign.id);
                continue;
            }
            self.store
                .insert_recipient(&CampaignRecipient::new(campaign.id, contact_id, now))?;
            added += 1;
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::clock::FixedClock;
    use crate::shared::models::{CampaignStatus, Contact, RecipientStatus};
    use crate::store::memory::MemStore;
    use crate::store::{CampaignStore, ContactStore, RecipientStore};
    use chrono::{TimeZone, Utc};

    fn setup() -> (MemStore, FixedClock, JobQueue, Campaign) {
        let store = MemStore::new();
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
        let (queue, _rx) = JobQueue::channel();
        let campaign = Campaign::new("demo", AudienceKind::Contact, "s", "b", clock.now());
        store.insert_campaign(&campaign).unwrap();
        (store, clock, queue, campaign)
    }

    fn make_contact(store: &MemStore, company_id: Option<Uuid>) -> Contact {
        let contact = Contact {
            id: Uuid::new_v4(),
            first_name: None,
            last_name: None,
            email: format!("{}@example.com", Uuid::new_v4()),
            company: None,
            job_title: None,
            company_id,
            pipeline_stage: "none".to_string(),
            unsubscribed: false,
            created_at: Utc::now(),
        };
        store.insert_contact(&contact).unwrap();
        contact
    }

    #[test]
    fn send_enqueues_dispatch_and_persists_status() {
        let (store, clock, _queue, campaign) = setup();
        let (queue, mut rx) = JobQueue::channel();
        let contact = make_contact(&store, None);
        let invoker = CommandInvoker::new(&store, &clock, &queue);
        invoker
            .execute(campaign.id, CampaignCommand::AddRecipients { ids: vec![contact.id] })
            .unwrap();

        let outcome = invoker.execute(campaign.id, CampaignCommand::Send).unwrap();
        assert!(outcome.changed());
        let stored = store.campaign(campaign.id).unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::InProgress);
        assert!(matches!(
            rx.try_recv().unwrap().job,
            Job::Dispatch { segment_id: None, .. }
        ));
    }

    #[test]
    fn illegal_command_reports_failure_without_mutation() {
        let (store, clock, queue, campaign) = setup();
        let invoker = CommandInvoker::new(&store, &clock, &queue);

        let outcome = invoker.execute(campaign.id, CampaignCommand::Pause).unwrap();
        match outcome {
            CommandOutcome::Transition { changed, message } => {
                assert!(!changed);
                assert_eq!(message, "cannot pause a draft campaign");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let stored = store.campaign(campaign.id).unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Draft);
    }

    #[test]
    fn unknown_campaign_is_not_found() {
        let (store, clock, queue, _) = setup();
        let invoker = CommandInvoker::new(&store, &clock, &queue);
        let err = invoker.execute(Uuid::new_v4(), CampaignCommand::Send).unwrap_err();
        assert!(matches!(err, ControlError::NotFound(_)));
    }

    #[test]
    fn add_recipients_skips_contacts_already_present() {
        let (store, clock, queue, campaign) = setup();
        let invoker = CommandInvoker::new(&store, &clock, &queue);
        let a = make_contact(&store, None);
        let b = make_contact(&store, None);

        let outcome = invoker
            .execute(campaign.id, CampaignCommand::AddRecipients { ids: vec![a.id, b.id] })
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Count(2));

        // Re-adding one plus an unknown contact only counts the genuinely new.
        let outcome = invoker
            .execute(
                campaign.id,
                CampaignCommand::AddRecipients { ids: vec![a.id, Uuid::new_v4()] },
            )
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Count(0));
    }

    #[test]
    fn company_audience_expands_to_member_contacts() {
        let (store, clock, queue, _) = setup();
        let company_id = Uuid::new_v4();
        let _in_company_1 = make_contact(&store, Some(company_id));
        let _in_company_2 = make_contact(&store, Some(company_id));
        let _elsewhere = make_contact(&store, Some(Uuid::new_v4()));

        let campaign = Campaign::new("acct", AudienceKind::Company, "s", "b", clock.now());
        store.insert_campaign(&campaign).unwrap();
        let invoker = CommandInvoker::new(&store, &clock, &queue);

        let outcome = invoker
            .execute(campaign.id, CampaignCommand::AddRecipients { ids: vec![company_id] })
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Count(2));
    }

    #[test]
    fn remove_recipients_only_touches_pending() {
        let (store, clock, queue, campaign) = setup();
        let invoker = CommandInvoker::new(&store, &clock, &queue);
        let keep = make_contact(&store, None);
        let drop_me = make_contact(&store, None);
        invoker
            .execute(
                campaign.id,
                CampaignCommand::AddRecipients { ids: vec![keep.id, drop_me.id] },
            )
            .unwrap();

        // Simulate one recipient already sent.
        let mut sent = store.recipient(campaign.id, keep.id).unwrap().unwrap();
        sent.stamp(RecipientStatus::Sent, clock.now());
        store.save_recipient(&sent).unwrap();

        let outcome = invoker
            .execute(
                campaign.id,
                CampaignCommand::RemoveRecipients { ids: vec![keep.id, drop_me.id] },
            )
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Count(1));
        assert!(store.recipient(campaign.id, keep.id).unwrap().is_some());
        assert!(store.recipient(campaign.id, drop_me.id).unwrap().is_none());
    }
}
