//! Minute-resolution scheduler tick: promotes due scheduled campaigns and
//! queues due sequence enrollments. Per-item failures are logged and do not
//! stop the sweep.

use crate::campaign::commands::{CampaignCommand, CommandOutcome};
use crate::queue::Job;
use crate::shared::state::AppState;
use crate::store::StoreResult;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::{interval, Duration};

pub struct SchedulerService {
    state: Arc<AppState>,
}

impl SchedulerService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn spawn(self) {
        info!("scheduler service started");
        let mut ticker = interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick() {
                error!("scheduler tick failed: {e}");
            }
        }
    }

    pub fn tick(&self) -> StoreResult<()> {
        let now = self.state.clock.now();

        for campaign in self.state.store.due_scheduled_campaigns(now)? {
            info!("scheduled send time reached for campaign {}", campaign.id);
            match self
                .state
                .invoker()
                .execute(campaign.id, CampaignCommand::Send)
            {
                Ok(CommandOutcome::Transition { changed: true, .. }) => {}
                Ok(CommandOutcome::Transition { message, .. }) => {
                    warn!("scheduled send refused for campaign {}: {message}", campaign.id);
                }
                Ok(CommandOutcome::Count(_)) => {}
                Err(e) => error!("scheduled send failed for campaign {}: {e}", campaign.id),
            }
        }

        for sc in self.state.store.due_sequence_contacts(now)? {
            self.state.queue.enqueue(Job::ProcessSequenceContact {
                sequence_contact_id: sc.id,
            });
        }

        Ok(())
    }
}
