//! Tracking ingestion: append an immutable event record, then roll it up
//! into recipient status without ever regressing a more advanced one.

use crate::shared::clock::Clock;
use crate::shared::models::{EmailEvent, RecipientStatus, SequenceEmailStatus};
use crate::store::{Store, StoreResult};
use log::{debug, warn};
use serde_json::Value;
use uuid::Uuid;

/// Ordered pipeline stages a contact moves through; the first open/click
/// nudges the contact one stage forward.
const PIPELINE_STAGES: &[&str] = &["none", "contacted", "engaged", "replied", "customer"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Delivery,
    Open,
    Click,
    Bounce,
    Complaint,
    Response,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Open => "open",
            Self::Click => "click",
            Self::Bounce => "bounce",
            Self::Complaint => "complaint",
            Self::Response => "response",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct EventContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub payload: Value,
}

pub struct EventRecorder<'a> {
    store: &'a dyn Store,
    clock: &'a dyn Clock,
}

impl<'a> EventRecorder<'a> {
    pub fn new(store: &'a dyn Store, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    pub fn record_campaign_event(
        &self,
        campaign_id: Uuid,
        contact_id: Uuid,
        kind: EventKind,
        ctx: EventContext,
    ) -> StoreResult<()> {
        let now = self.clock.now();
        self.store.insert_event(&EmailEvent {
            id: Uuid::new_v4(),
            campaign_id: Some(campaign_id),
            sequence_email_id: None,
            contact_id,
            kind: kind.as_str().to_string(),
            ip: ctx.ip,
            user_agent: ctx.user_agent,
            payload: ctx.payload,
            occurred_at: now,
        })?;

        let Some(mut recipient) = self.store.recipient(campaign_id, contact_id)? else {
            warn!("{kind:?} event for unknown recipient: campaign {campaign_id}, contact {contact_id}");
            return Ok(());
        };

        let had_engaged = recipient.status.has_engaged();
        if let Some(next) = rollup(recipient.status, kind) {
            recipient.stamp(next, now);
            self.store.save_recipient(&recipient)?;
        } else {
            debug!(
                "{} event does not advance recipient {} past {}",
                kind.as_str(),
                recipient.id,
                recipient.status
            );
        }

        if matches!(kind, EventKind::Open | EventKind::Click) && !had_engaged {
            self.nudge_pipeline_stage(contact_id)?;
        }

        Ok(())
    }

    pub fn record_sequence_event(
        &self,
        sequence_email_id: Uuid,
        kind: EventKind,
        ctx: EventContext,
    ) -> StoreResult<()> {
        let Some(mut email) = self.store.sequence_email(sequence_email_id)? else {
            warn!("{kind:?} event for unknown sequence email {sequence_email_id}");
            return Ok(());
        };

        let now = self.clock.now();
        self.store.insert_event(&EmailEvent {
            id: Uuid::new_v4(),
            campaign_id: None,
            sequence_email_id: Some(sequence_email_id),
            contact_id: email.contact_id,
            kind: kind.as_str().to_string(),
            ip: ctx.ip,
            user_agent: ctx.user_agent,
            payload: ctx.payload,
            occurred_at: now,
        })?;

        if let Some(next) = sequence_rollup(email.status, kind) {
            email.status = next;
            self.store.save_sequence_email(&email)?;
        }

        Ok(())
    }

    /// First engagement moves the contact one stage along the pipeline.
    fn nudge_pipeline_stage(&self, contact_id: Uuid) -> StoreResult<()> {
        let Some(mut contact) = self.store.contact(contact_id)? else {
            return Ok(());
        };
        let Some(index) = PIPELINE_STAGES.iter().position(|s| *s == contact.pipeline_stage)
        else {
            debug!(
                "contact {} has custom pipeline stage {:?}; leaving it alone",
                contact_id, contact.pipeline_stage
            );
            return Ok(());
        };
        if index + 1 < PIPELINE_STAGES.len() {
            contact.pipeline_stage = PIPELINE_STAGES[index + 1].to_string();
            self.store.save_contact(&contact)?;
        }
        Ok(())
    }
}

/// The monotonic-progress rule: an event may only move a recipient forward
/// along the engagement lattice. Bounces divert any pre-terminal status;
/// complaints are recorded but deliberately change nothing.
pub fn rollup(current: RecipientStatus, kind: EventKind) -> Option<RecipientStatus> {
    if kind == EventKind::Bounce {
        return if current.is_divert_terminal() {
            None
        } else {
            Some(RecipientStatus::Bounced)
        };
    }
    let candidate = match kind {
        EventKind::Delivery => RecipientStatus::Delivered,
        EventKind::Open => RecipientStatus::Opened,
        EventKind::Click => RecipientStatus::Clicked,
        EventKind::Response => RecipientStatus::Responded,
        EventKind::Complaint => return None,
        EventKind::Bounce => unreachable!(),
    };
    match (current.engagement_rank(), candidate.engagement_rank()) {
        (Some(cur), Some(new)) if new > cur => Some(candidate),
        _ => None,
    }
}

fn sequence_rollup(current: SequenceEmailStatus, kind: EventKind) -> Option<SequenceEmailStatus> {
    if kind == EventKind::Bounce {
        return match current {
            SequenceEmailStatus::Bounced | SequenceEmailStatus::Failed => None,
            _ => Some(SequenceEmailStatus::Bounced),
        };
    }
    let candidate = match kind {
        EventKind::Delivery => SequenceEmailStatus::Delivered,
        EventKind::Open => SequenceEmailStatus::Opened,
        EventKind::Click => SequenceEmailStatus::Clicked,
        EventKind::Complaint | EventKind::Response => return None,
        EventKind::Bounce => unreachable!(),
    };
    match (current.engagement_rank(), candidate.engagement_rank()) {
        (Some(cur), Some(new)) if new > cur => Some(candidate),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::clock::FixedClock;
    use crate::shared::models::{AudienceKind, Campaign, CampaignRecipient, Contact};
    use crate::store::memory::MemStore;
    use crate::store::{CampaignStore, ContactStore, EventStore, RecipientStore};
    use chrono::{TimeZone, Utc};

    fn contact(store: &MemStore, stage: &str) -> Contact {
        let contact = Contact {
            id: Uuid::new_v4(),
            first_name: Some("Grace".to_string()),
            last_name: Some("Hopper".to_string()),
            email: "grace@example.com".to_string(),
            company: None,
            job_title: None,
            company_id: None,
            pipeline_stage: stage.to_string(),
            unsubscribed: false,
            created_at: Utc::now(),
        };
        store.insert_contact(&contact).unwrap();
        contact
    }

    fn seeded_recipient(store: &MemStore, status: RecipientStatus) -> (Uuid, Uuid) {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let campaign = Campaign::new("launch", AudienceKind::Contact, "s", "b", now);
        store.insert_campaign(&campaign).unwrap();
        let c = contact(store, "none");
        let mut recipient = CampaignRecipient::new(campaign.id, c.id, now);
        recipient.stamp(status, now);
        store.insert_recipient(&recipient).unwrap();
        (campaign.id, c.id)
    }

    #[test]
    fn open_never_overwrites_clicked_or_responded() {
        assert_eq!(rollup(RecipientStatus::Clicked, EventKind::Open), None);
        assert_eq!(rollup(RecipientStatus::Responded, EventKind::Open), None);
        assert_eq!(rollup(RecipientStatus::Responded, EventKind::Click), None);
        assert_eq!(
            rollup(RecipientStatus::Clicked, EventKind::Response),
            Some(RecipientStatus::Responded)
        );
        assert_eq!(
            rollup(RecipientStatus::Sent, EventKind::Open),
            Some(RecipientStatus::Opened)
        );
    }

    #[test]
    fn late_delivery_event_does_not_downgrade() {
        let store = MemStore::new();
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 3, 2, 9, 0, 0).unwrap());
        let (campaign_id, contact_id) = seeded_recipient(&store, RecipientStatus::Clicked);

        EventRecorder::new(&store, &clock)
            .record_campaign_event(campaign_id, contact_id, EventKind::Delivery, EventContext::default())
            .unwrap();

        let recipient = store.recipient(campaign_id, contact_id).unwrap().unwrap();
        assert_eq!(recipient.status, RecipientStatus::Clicked);
        // The event itself is still appended.
        assert_eq!(store.events_for_contact(contact_id).unwrap().len(), 1);
    }

    #[test]
    fn bounce_diverts_but_never_reenters_terminal() {
        assert_eq!(
            rollup(RecipientStatus::Sent, EventKind::Bounce),
            Some(RecipientStatus::Bounced)
        );
        assert_eq!(rollup(RecipientStatus::Failed, EventKind::Bounce), None);
        assert_eq!(rollup(RecipientStatus::Cancelled, EventKind::Bounce), None);
    }

    #[test]
    fn complaint_is_recorded_without_status_change() {
        let store = MemStore::new();
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 3, 2, 9, 0, 0).unwrap());
        let (campaign_id, contact_id) = seeded_recipient(&store, RecipientStatus::Sent);

        EventRecorder::new(&store, &clock)
            .record_campaign_event(campaign_id, contact_id, EventKind::Complaint, EventContext::default())
            .unwrap();

        let recipient = store.recipient(campaign_id, contact_id).unwrap().unwrap();
        assert_eq!(recipient.status, RecipientStatus::Sent);
        assert_eq!(store.events_for_contact(contact_id).unwrap().len(), 1);
    }

    #[test]
    fn first_engagement_nudges_pipeline_stage_once() {
        let store = MemStore::new();
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 3, 2, 9, 0, 0).unwrap());
        let (campaign_id, contact_id) = seeded_recipient(&store, RecipientStatus::Sent);
        let recorder = EventRecorder::new(&store, &clock);

        recorder
            .record_campaign_event(campaign_id, contact_id, EventKind::Open, EventContext::default())
            .unwrap();
        assert_eq!(store.contact(contact_id).unwrap().unwrap().pipeline_stage, "contacted");

        // Already engaged: a second open leaves the stage alone.
        recorder
            .record_campaign_event(campaign_id, contact_id, EventKind::Open, EventContext::default())
            .unwrap();
        assert_eq!(store.contact(contact_id).unwrap().unwrap().pipeline_stage, "contacted");
    }
}
