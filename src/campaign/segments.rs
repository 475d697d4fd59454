//! Round-robin segmentation: disjoint, independently sendable sub-batches
//! of a campaign's recipients, with per-segment content overrides.

use super::commands::ControlError;
use crate::queue::{Job, JobQueue};
use crate::shared::clock::Clock;
use crate::shared::models::{Campaign, CampaignStatus, Segment, SegmentStatus};
use crate::store::Store;
use log::info;
use uuid::Uuid;

pub struct SegmentDistributor<'a> {
    store: &'a dyn Store,
    clock: &'a dyn Clock,
    queue: &'a JobQueue,
}

impl<'a> SegmentDistributor<'a> {
    pub fn new(store: &'a dyn Store, clock: &'a dyn Clock, queue: &'a JobQueue) -> Self {
        Self { store, clock, queue }
    }

    /// Splits the campaign's recipients into `count` segments by
    /// `index mod count` in id order. Replaces any existing segmentation.
    pub fn create_segments(
        &self,
        campaign_id: Uuid,
        count: usize,
    ) -> Result<Vec<Segment>, ControlError> {
        let campaign = self.require_campaign(campaign_id)?;
        if campaign.status != CampaignStatus::Draft {
            return Err(ControlError::Rejected(
                "segments can only be created on a draft campaign".to_string(),
            ));
        }
        if count == 0 {
            return Err(ControlError::Rejected(
                "segment count must be at least 1".to_string(),
            ));
        }
        let recipients = self.store.campaign_recipients(campaign_id)?;
        if recipients.is_empty() {
            return Err(ControlError::Rejected(
                "campaign has no recipients to segment".to_string(),
            ));
        }

        self.store.clear_segment_refs(campaign_id)?;
        self.store.delete_segments(campaign_id)?;

        let now = self.clock.now();
        let mut segments = Vec::with_capacity(count);
        for position in 1..=count {
            let segment = Segment::new(campaign_id, position as i32, now);
            self.store.insert_segment(&segment)?;
            segments.push(segment);
        }

        for (index, recipient) in recipients.iter().enumerate() {
            let segment = &segments[index % count];
            self.store.assign_segment(recipient.id, Some(segment.id))?;
        }

        info!(
            "segmented campaign {campaign_id}: {} recipients into {count} segments",
            recipients.len()
        );
        Ok(segments)
    }

    /// Sends one draft segment. The first segment send promotes a draft
    /// campaign to in_progress.
    pub fn send_segment(&self, segment_id: Uuid) -> Result<(), ControlError> {
        let mut segment = self.require_segment(segment_id)?;
        if segment.status != SegmentStatus::Draft {
            return Err(ControlError::Rejected(format!(
                "segment {} has already been sent",
                segment.position
            )));
        }

        let mut campaign = self.require_campaign(segment.campaign_id)?;
        match campaign.status {
            CampaignStatus::Draft => {
                campaign.status = CampaignStatus::InProgress;
                campaign.updated_at = self.clock.now();
                self.store.save_campaign(&campaign)?;
            }
            CampaignStatus::InProgress => {}
            other => {
                return Err(ControlError::Rejected(format!(
                    "cannot send a segment of a {other} campaign"
                )));
            }
        }

        segment.status = SegmentStatus::InProgress;
        segment.sent_at = Some(self.clock.now());
        self.store.save_segment(&segment)?;

        self.queue.enqueue(Job::Dispatch {
            campaign_id: segment.campaign_id,
            segment_id: Some(segment.id),
        });
        Ok(())
    }

    /// Settles a drained segment, then rolls the campaign up once every
    /// segment is terminal. Failure stays local: the campaign only fails
    /// when no segment completed.
    pub fn complete_segment(&self, segment_id: Uuid) -> Result<(), ControlError> {
        let mut segment = self.require_segment(segment_id)?;
        let tally = self.store.segment_tally(segment_id)?;

        segment.status = if tally.all_failed() {
            SegmentStatus::Failed
        } else {
            SegmentStatus::Completed
        };
        segment.completed_at = Some(self.clock.now());
        self.store.save_segment(&segment)?;
        info!(
            "segment {} of campaign {} finished as {}",
            segment.position,
            segment.campaign_id,
            segment.status.as_str()
        );

        let segments = self.store.segments(segment.campaign_id)?;
        if !segments.iter().all(|s| s.status.is_terminal()) {
            return Ok(());
        }

        let mut campaign = self.require_campaign(segment.campaign_id)?;
        let any_completed = segments
            .iter()
            .any(|s| s.status == SegmentStatus::Completed);
        campaign.status = if any_completed {
            CampaignStatus::Completed
        } else {
            CampaignStatus::Failed
        };
        campaign.completed_at = Some(self.clock.now());
        campaign.updated_at = self.clock.now();
        self.store.save_campaign(&campaign)?;
        info!(
            "all segments terminal; campaign {} finished as {}",
            campaign.id, campaign.status
        );
        Ok(())
    }

    /// Deletes all segments while every one is still draft; recipients are
    /// kept, only their segment reference is cleared.
    pub fn delete_segments(&self, campaign_id: Uuid) -> Result<usize, ControlError> {
        let segments = self.store.segments(campaign_id)?;
        if segments.iter().any(|s| s.status != SegmentStatus::Draft) {
            return Err(ControlError::Rejected(
                "segments can only be deleted while all are still draft".to_string(),
            ));
        }
        self.store.clear_segment_refs(campaign_id)?;
        let deleted = self.store.delete_segments(campaign_id)?;
        Ok(deleted)
    }

    pub fn update_segment(
        &self,
        segment_id: Uuid,
        subject_override: Option<String>,
        body_override: Option<String>,
    ) -> Result<Segment, ControlError> {
        let mut segment = self.require_segment(segment_id)?;
        segment.subject_override = subject_override;
        segment.body_override = body_override;
        self.store.save_segment(&segment)?;
        Ok(segment)
    }

    fn require_campaign(&self, campaign_id: Uuid) -> Result<Campaign, ControlError> {
        self.store
            .campaign(campaign_id)?
            .ok_or_else(|| ControlError::NotFound(format!("campaign {campaign_id} not found")))
    }

    fn require_segment(&self, segment_id: Uuid) -> Result<Segment, ControlError> {
        self.store
            .segment(segment_id)?
            .ok_or_else(|| ControlError::NotFound(format!("segment {segment_id} not found")))
    }
}
