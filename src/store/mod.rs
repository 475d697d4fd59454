pub mod memory;
pub mod pg;

use crate::shared::models::{
    Campaign, CampaignRecipient, Contact, EmailEvent, RecipientStatus, Segment, Sequence,
    SequenceContact, SequenceEmail, SequenceStep,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("connection pool error: {0}")]
    Pool(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Per-status recipient counts for a campaign or segment.
#[derive(Debug, Default, Clone)]
pub struct StatusTally {
    counts: HashMap<RecipientStatus, usize>,
}

impl StatusTally {
    pub fn add(&mut self, status: RecipientStatus, n: usize) {
        *self.counts.entry(status).or_insert(0) += n;
    }

    pub fn count(&self, status: RecipientStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn pending(&self) -> usize {
        self.count(RecipientStatus::Pending)
    }

    /// Failure is only contagious when it is total.
    pub fn all_failed(&self) -> bool {
        self.total() > 0 && self.count(RecipientStatus::Failed) == self.total()
    }
}

pub trait CampaignStore: Send + Sync {
    fn insert_campaign(&self, campaign: &Campaign) -> StoreResult<()>;
    fn campaign(&self, id: Uuid) -> StoreResult<Option<Campaign>>;
    fn save_campaign(&self, campaign: &Campaign) -> StoreResult<()>;
    fn list_campaigns(&self) -> StoreResult<Vec<Campaign>>;
    fn due_scheduled_campaigns(&self, now: DateTime<Utc>) -> StoreResult<Vec<Campaign>>;
}

pub trait RecipientStore: Send + Sync {
    fn insert_recipient(&self, recipient: &CampaignRecipient) -> StoreResult<()>;
    fn recipient(&self, campaign_id: Uuid, contact_id: Uuid)
        -> StoreResult<Option<CampaignRecipient>>;
    fn recipient_by_id(&self, id: Uuid) -> StoreResult<Option<CampaignRecipient>>;
    fn save_recipient(&self, recipient: &CampaignRecipient) -> StoreResult<()>;
    /// Contact ids already attached to the campaign, any status.
    fn recipient_contact_ids(&self, campaign_id: Uuid) -> StoreResult<HashSet<Uuid>>;
    /// All recipients of the campaign in id order.
    fn campaign_recipients(&self, campaign_id: Uuid) -> StoreResult<Vec<CampaignRecipient>>;
    /// Up to `limit` pending recipients in id order, optionally scoped to a segment.
    fn pending_page(
        &self,
        campaign_id: Uuid,
        segment_id: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<CampaignRecipient>>;
    /// The delivery claim: a single conditional `pending → processing` write.
    /// Returns false when the row was not pending (already claimed or settled).
    fn claim_pending(&self, recipient_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;
    /// Deletes the given contacts' rows while still pending; returns rows removed.
    fn remove_pending(&self, campaign_id: Uuid, contact_ids: &[Uuid]) -> StoreResult<usize>;
    /// Cancels every still-pending recipient; returns rows cancelled.
    fn cancel_pending(&self, campaign_id: Uuid, now: DateTime<Utc>) -> StoreResult<usize>;
    fn status_tally(&self, campaign_id: Uuid) -> StoreResult<StatusTally>;
    fn segment_tally(&self, segment_id: Uuid) -> StoreResult<StatusTally>;
    fn assign_segment(&self, recipient_id: Uuid, segment_id: Option<Uuid>) -> StoreResult<()>;
    fn clear_segment_refs(&self, campaign_id: Uuid) -> StoreResult<usize>;
}

pub trait SegmentStore: Send + Sync {
    fn insert_segment(&self, segment: &Segment) -> StoreResult<()>;
    fn segment(&self, id: Uuid) -> StoreResult<Option<Segment>>;
    fn save_segment(&self, segment: &Segment) -> StoreResult<()>;
    /// Segments of the campaign in position order.
    fn segments(&self, campaign_id: Uuid) -> StoreResult<Vec<Segment>>;
    fn delete_segments(&self, campaign_id: Uuid) -> StoreResult<usize>;
}

pub trait SequenceStore: Send + Sync {
    fn insert_sequence(&self, sequence: &Sequence) -> StoreResult<()>;
    fn sequence(&self, id: Uuid) -> StoreResult<Option<Sequence>>;
    fn save_sequence(&self, sequence: &Sequence) -> StoreResult<()>;
    fn list_sequences(&self) -> StoreResult<Vec<Sequence>>;
    fn insert_step(&self, step: &SequenceStep) -> StoreResult<()>;
    /// Steps in position order.
    fn steps(&self, sequence_id: Uuid) -> StoreResult<Vec<SequenceStep>>;
    fn step_at(&self, sequence_id: Uuid, position: i32) -> StoreResult<Option<SequenceStep>>;
    fn insert_sequence_contact(&self, sc: &SequenceContact) -> StoreResult<()>;
    fn sequence_contact(
        &self,
        sequence_id: Uuid,
        contact_id: Uuid,
    ) -> StoreResult<Option<SequenceContact>>;
    fn sequence_contact_by_id(&self, id: Uuid) -> StoreResult<Option<SequenceContact>>;
    fn save_sequence_contact(&self, sc: &SequenceContact) -> StoreResult<()>;
    /// Active enrollments whose next_send_at has come due.
    fn due_sequence_contacts(&self, now: DateTime<Utc>) -> StoreResult<Vec<SequenceContact>>;
    fn insert_sequence_email(&self, email: &SequenceEmail) -> StoreResult<()>;
    fn sequence_email(&self, id: Uuid) -> StoreResult<Option<SequenceEmail>>;
    fn save_sequence_email(&self, email: &SequenceEmail) -> StoreResult<()>;
    /// The send attempt already recorded for a contact's step, if any.
    fn sequence_email_for_step(
        &self,
        sequence_contact_id: Uuid,
        step_position: i32,
    ) -> StoreResult<Option<SequenceEmail>>;
}

pub trait ContactStore: Send + Sync {
    fn insert_contact(&self, contact: &Contact) -> StoreResult<()>;
    fn contact(&self, id: Uuid) -> StoreResult<Option<Contact>>;
    fn save_contact(&self, contact: &Contact) -> StoreResult<()>;
    fn contact_ids_for_companies(&self, company_ids: &[Uuid]) -> StoreResult<Vec<Uuid>>;
    fn has_closed_won_deal(&self, contact_id: Uuid) -> StoreResult<bool>;
    fn insert_deal(&self, contact_id: Uuid, stage: &str, now: DateTime<Utc>) -> StoreResult<()>;
}

pub trait EventStore: Send + Sync {
    fn insert_event(&self, event: &EmailEvent) -> StoreResult<()>;
    fn events_for_contact(&self, contact_id: Uuid) -> StoreResult<Vec<EmailEvent>>;
}

/// The full persistence surface the engine runs against.
pub trait Store:
    CampaignStore + RecipientStore + SegmentStore + SequenceStore + ContactStore + EventStore
{
}

impl<T> Store for T where
    T: CampaignStore + RecipientStore + SegmentStore + SequenceStore + ContactStore + EventStore
{
}
