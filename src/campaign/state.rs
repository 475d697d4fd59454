//! Campaign lifecycle rules. One sum type over the six statuses plus
//! exhaustive per-action matches, so every (status, action) pair is decided
//! in exactly one place and illegal pairs fall through to a denial.

use crate::shared::clock::Clock;
use crate::shared::models::{Campaign, CampaignStatus};
use crate::store::{Store, StoreResult};
use chrono::{DateTime, Utc};
use log::info;

/// A denied action: the campaign's current status does not permit it.
/// This is an expected user-facing condition, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denied(pub String);

/// Follow-up work the invoker owes after a successful transition.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// The campaign entered (or re-entered) processing; kick off dispatch.
    pub begin_dispatch: bool,
}

pub fn can_process(status: CampaignStatus) -> bool {
    status == CampaignStatus::InProgress
}

pub fn allowed_transitions(status: CampaignStatus) -> &'static [CampaignStatus] {
    use CampaignStatus::*;
    match status {
        Draft => &[Scheduled, InProgress],
        Scheduled => &[InProgress, Draft],
        InProgress => &[Paused, Completed, Failed],
        Paused => &[InProgress, Completed],
        Completed => &[Draft],
        Failed => &[],
    }
}

pub fn can_transition_to(from: CampaignStatus, to: CampaignStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

pub struct StateMachine<'a> {
    store: &'a dyn Store,
    clock: &'a dyn Clock,
}

impl<'a> StateMachine<'a> {
    pub fn new(store: &'a dyn Store, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    pub fn schedule(
        &self,
        campaign: &mut Campaign,
        at: DateTime<Utc>,
    ) -> StoreResult<Result<StateChange, Denied>> {
        use CampaignStatus::*;
        Ok(match campaign.status {
            Draft => {
                campaign.status = Scheduled;
                campaign.scheduled_at = Some(at);
                Ok(StateChange::default())
            }
            Scheduled => {
                // Rescheduling an already-scheduled campaign just moves the time.
                campaign.scheduled_at = Some(at);
                Ok(StateChange::default())
            }
            InProgress | Paused | Completed | Failed => deny(campaign.status, "schedule"),
        })
    }

    pub fn send(&self, campaign: &mut Campaign) -> StoreResult<Result<StateChange, Denied>> {
        use CampaignStatus::*;
        Ok(match campaign.status {
            Draft => {
                if self.store.status_tally(campaign.id)?.total() == 0 {
                    Err(Denied("campaign has no recipients".to_string()))
                } else {
                    campaign.status = InProgress;
                    Ok(StateChange { begin_dispatch: true })
                }
            }
            Scheduled => {
                // Send-now overrides the schedule.
                campaign.status = InProgress;
                Ok(StateChange { begin_dispatch: true })
            }
            InProgress | Paused | Completed | Failed => deny(campaign.status, "send"),
        })
    }

    pub fn pause(&self, campaign: &mut Campaign) -> StoreResult<Result<StateChange, Denied>> {
        use CampaignStatus::*;
        Ok(match campaign.status {
            InProgress => {
                campaign.status = Paused;
                Ok(StateChange::default())
            }
            Draft | Scheduled | Paused | Completed | Failed => deny(campaign.status, "pause"),
        })
    }

    pub fn resume(&self, campaign: &mut Campaign) -> StoreResult<Result<StateChange, Denied>> {
        use CampaignStatus::*;
        Ok(match campaign.status {
            Paused => {
                campaign.status = InProgress;
                Ok(StateChange { begin_dispatch: true })
            }
            Draft | Scheduled | InProgress | Completed | Failed => deny(campaign.status, "resume"),
        })
    }

    pub fn stop(&self, campaign: &mut Campaign) -> StoreResult<Result<StateChange, Denied>> {
        use CampaignStatus::*;
        match campaign.status {
            Scheduled => {
                campaign.status = Draft;
                campaign.scheduled_at = None;
                Ok(Ok(StateChange::default()))
            }
            // Paused delegates to the in-progress stop: cancel what has not
            // gone out, keep what has.
            InProgress | Paused => {
                let cancelled = self.store.cancel_pending(campaign.id, self.clock.now())?;
                info!(
                    "stopping campaign {}: cancelled {} pending recipients",
                    campaign.id, cancelled
                );
                campaign.status = Completed;
                campaign.completed_at = Some(self.clock.now());
                Ok(Ok(StateChange::default()))
            }
            Completed => {
                // Reset back to an editable draft.
                campaign.status = Draft;
                campaign.scheduled_at = None;
                campaign.completed_at = None;
                Ok(Ok(StateChange::default()))
            }
            Draft | Failed => Ok(deny(campaign.status, "stop")),
        }
    }
}

fn deny(status: CampaignStatus, action: &str) -> Result<StateChange, Denied> {
    Err(Denied(format!("cannot {action} a {status} campaign")))
}
