//! Bounded-page batch dispatch. One invocation enqueues at most one page of
//! delivery tasks; the explicit outcome tells the queue worker whether to
//! re-enqueue the dispatcher, which is the system's backpressure mechanism.

use super::state;
use crate::queue::{Job, JobQueue};
use crate::shared::clock::Clock;
use crate::shared::models::CampaignStatus;
use crate::store::{Store, StoreResult};
use log::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A page was enqueued; schedule another tick after a delay.
    MoreRemaining,
    /// No pending recipients remained for a segment-scoped dispatch; the
    /// segment completion check has been enqueued.
    Drained,
    /// The campaign reached a terminal status this tick.
    Finalized(CampaignStatus),
    /// Nothing to do (not processing, unknown campaign, or no recipients).
    Idle,
}

pub struct BatchDispatcher<'a> {
    store: &'a dyn Store,
    clock: &'a dyn Clock,
    queue: &'a JobQueue,
    page_size: usize,
}

impl<'a> BatchDispatcher<'a> {
    pub fn new(
        store: &'a dyn Store,
        clock: &'a dyn Clock,
        queue: &'a JobQueue,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            clock,
            queue,
            page_size,
        }
    }

    pub fn dispatch(
        &self,
        campaign_id: Uuid,
        segment_id: Option<Uuid>,
    ) -> StoreResult<DispatchOutcome> {
        let Some(mut campaign) = self.store.campaign(campaign_id)? else {
            warn!("dispatch tick for unknown campaign {campaign_id}");
            return Ok(DispatchOutcome::Idle);
        };

        if !state::can_process(campaign.status) {
            debug!(
                "campaign {} is {}; dispatch tick is a no-op",
                campaign.id, campaign.status
            );
            return Ok(DispatchOutcome::Idle);
        }

        let page = self
            .store
            .pending_page(campaign_id, segment_id, self.page_size)?;
        for recipient in &page {
            self.queue.enqueue(Job::Deliver {
                campaign_id,
                contact_id: recipient.contact_id,
            });
        }

        if !page.is_empty() {
            // The enqueued deliveries are still pending at this instant, so
            // another tick is owed even for a short page; the next one will
            // see an empty page once they settle.
            debug!(
                "enqueued {} deliveries for campaign {}; more to come",
                page.len(),
                campaign_id
            );
            return Ok(DispatchOutcome::MoreRemaining);
        }

        match segment_id {
            Some(segment_id) => {
                self.queue.enqueue(Job::CompleteSegment { segment_id });
                Ok(DispatchOutcome::Drained)
            }
            None => {
                let tally = self.store.status_tally(campaign_id)?;
                if tally.total() == 0 {
                    // Zero-recipient campaigns are left untouched rather
                    // than force-completed.
                    debug!("campaign {campaign_id} has no recipients; leaving as-is");
                    return Ok(DispatchOutcome::Idle);
                }
                if tally.pending() > 0 {
                    return Ok(DispatchOutcome::Drained);
                }

                let status = if tally.all_failed() {
                    CampaignStatus::Failed
                } else {
                    CampaignStatus::Completed
                };
                campaign.status = status;
                campaign.completed_at = Some(self.clock.now());
                campaign.updated_at = self.clock.now();
                self.store.save_campaign(&campaign)?;
                info!("campaign {campaign_id} finished as {status}");
                Ok(DispatchOutcome::Finalized(status))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::clock::FixedClock;
    use crate::shared::models::{
        AudienceKind, Campaign, CampaignRecipient, RecipientStatus,
    };
    use crate::store::memory::MemStore;
    use crate::store::{CampaignStore, RecipientStore};
    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc::UnboundedReceiver;
    use crate::queue::QueuedJob;

    fn setup(status: CampaignStatus) -> (MemStore, FixedClock, JobQueue, UnboundedReceiver<QueuedJob>, Campaign) {
        let store = MemStore::new();
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 8, 1, 9, 0, 0).unwrap());
        let (queue, rx) = JobQueue::channel();
        let mut campaign = Campaign::new("bulk", AudienceKind::Contact, "s", "b", clock.now());
        campaign.status = status;
        store.insert_campaign(&campaign).unwrap();
        (store, clock, queue, rx, campaign)
    }

    fn seed(store: &MemStore, campaign: &Campaign, status: RecipientStatus, n: usize) {
        for _ in 0..n {
            let mut r = CampaignRecipient::new(campaign.id, Uuid::new_v4(), Utc::now());
            if status != RecipientStatus::Pending {
                r.stamp(status, Utc::now());
            }
            store.insert_recipient(&r).unwrap();
        }
    }

    fn drain(rx: &mut UnboundedReceiver<QueuedJob>) -> Vec<Job> {
        let mut jobs = Vec::new();
        while let Ok(queued) = rx.try_recv() {
            jobs.push(queued.job);
        }
        jobs
    }

    #[test]
    fn full_page_enqueues_deliveries_and_requeues() {
        let (store, clock, queue, mut rx, campaign) = setup(CampaignStatus::InProgress);
        seed(&store, &campaign, RecipientStatus::Pending, 5);

        let dispatcher = BatchDispatcher::new(&store, &clock, &queue, 3);
        let outcome = dispatcher.dispatch(campaign.id, None).unwrap();
        assert_eq!(outcome, DispatchOutcome::MoreRemaining);

        let jobs = drain(&mut rx);
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| matches!(j, Job::Deliver { .. })));
    }

    #[test]
    fn non_processing_campaign_is_idle() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Scheduled,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
            CampaignStatus::Failed,
        ] {
            let (store, clock, queue, mut rx, campaign) = setup(status);
            seed(&store, &campaign, RecipientStatus::Pending, 2);
            let dispatcher = BatchDispatcher::new(&store, &clock, &queue, 50);
            assert_eq!(
                dispatcher.dispatch(campaign.id, None).unwrap(),
                DispatchOutcome::Idle
            );
            assert!(drain(&mut rx).is_empty());
        }
    }

    #[test]
    fn drained_campaign_completes_when_any_recipient_succeeded() {
        let (store, clock, queue, _rx, campaign) = setup(CampaignStatus::InProgress);
        seed(&store, &campaign, RecipientStatus::Sent, 2);
        seed(&store, &campaign, RecipientStatus::Failed, 1);

        let dispatcher = BatchDispatcher::new(&store, &clock, &queue, 50);
        let outcome = dispatcher.dispatch(campaign.id, None).unwrap();
        assert_eq!(outcome, DispatchOutcome::Finalized(CampaignStatus::Completed));

        let stored = store.campaign(campaign.id).unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Completed);
        assert!(stored.completed_at.is_some());
    }

    #[test]
    fn drained_campaign_fails_only_when_every_recipient_failed() {
        let (store, clock, queue, _rx, campaign) = setup(CampaignStatus::InProgress);
        seed(&store, &campaign, RecipientStatus::Failed, 3);

        let dispatcher = BatchDispatcher::new(&store, &clock, &queue, 50);
        let outcome = dispatcher.dispatch(campaign.id, None).unwrap();
        assert_eq!(outcome, DispatchOutcome::Finalized(CampaignStatus::Failed));
    }

    #[test]
    fn zero_recipient_campaign_is_left_untouched() {
        let (store, clock, queue, _rx, campaign) = setup(CampaignStatus::InProgress);
        let dispatcher = BatchDispatcher::new(&store, &clock, &queue, 50);
        assert_eq!(
            dispatcher.dispatch(campaign.id, None).unwrap(),
            DispatchOutcome::Idle
        );
        let stored = store.campaign(campaign.id).unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::InProgress);
    }

    #[test]
    fn segment_scoped_drain_enqueues_completion_check() {
        let (store, clock, queue, mut rx, campaign) = setup(CampaignStatus::InProgress);
        let segment_id = Uuid::new_v4();
        // One recipient in another segment stays pending; the scoped
        // dispatch ignores it.
        seed(&store, &campaign, RecipientStatus::Pending, 1);

        let dispatcher = BatchDispatcher::new(&store, &clock, &queue, 50);
        let outcome = dispatcher.dispatch(campaign.id, Some(segment_id)).unwrap();
        assert_eq!(outcome, DispatchOutcome::Drained);

        let jobs = drain(&mut rx);
        assert_eq!(jobs, vec![Job::CompleteSegment { segment_id }]);
    }
}
