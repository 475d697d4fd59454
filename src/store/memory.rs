//! Mutex-guarded in-memory store used by the test suite and local runs.

use super::{
    CampaignStore, ContactStore, EventStore, RecipientStore, SegmentStore, SequenceStore,
    StatusTally, StoreResult,
};
use crate::shared::models::{
    Campaign, CampaignRecipient, Contact, EmailEvent, RecipientStatus, Segment, Sequence,
    SequenceContact, SequenceEmail, SequenceContactStatus, SequenceStep,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    campaigns: HashMap<Uuid, Campaign>,
    // BTreeMap so iteration yields recipients in id order.
    recipients: BTreeMap<Uuid, CampaignRecipient>,
    segments: HashMap<Uuid, Segment>,
    contacts: HashMap<Uuid, Contact>,
    deals: Vec<(Uuid, String)>,
    sequences: HashMap<Uuid, Sequence>,
    steps: Vec<SequenceStep>,
    sequence_contacts: HashMap<Uuid, SequenceContact>,
    sequence_emails: HashMap<Uuid, SequenceEmail>,
    events: Vec<EmailEvent>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CampaignStore for MemStore {
    fn insert_campaign(&self, campaign: &Campaign) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.campaigns.insert(campaign.id, campaign.clone());
        Ok(())
    }

    fn campaign(&self, id: Uuid) -> StoreResult<Option<Campaign>> {
        Ok(self.inner.lock().unwrap().campaigns.get(&id).cloned())
    }

    fn save_campaign(&self, campaign: &Campaign) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.campaigns.insert(campaign.id, campaign.clone());
        Ok(())
    }

    fn list_campaigns(&self) -> StoreResult<Vec<Campaign>> {
        let inner = self.inner.lock().unwrap();
        let mut all: Vec<Campaign> = inner.campaigns.values().cloned().collect();
        all.sort_by_key(|c| c.created_at);
        Ok(all)
    }

    fn due_scheduled_campaigns(&self, now: DateTime<Utc>) -> StoreResult<Vec<Campaign>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .campaigns
            .values()
            .filter(|c| {
                c.status == crate::shared::models::CampaignStatus::Scheduled
                    && c.scheduled_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect())
    }
}

impl RecipientStore for MemStore {
    fn insert_recipient(&self, recipient: &CampaignRecipient) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.recipients.insert(recipient.id, recipient.clone());
        Ok(())
    }

    fn recipient(
        &self,
        campaign_id: Uuid,
        contact_id: Uuid,
    ) -> StoreResult<Option<CampaignRecipient>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .recipients
            .values()
            .find(|r| r.campaign_id == campaign_id && r.contact_id == contact_id)
            .cloned())
    }

    fn recipient_by_id(&self, id: Uuid) -> StoreResult<Option<CampaignRecipient>> {
        Ok(self.inner.lock().unwrap().recipients.get(&id).cloned())
    }

    fn save_recipient(&self, recipient: &CampaignRecipient) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.recipients.insert(recipient.id, recipient.clone());
        Ok(())
    }

    fn recipient_contact_ids(&self, campaign_id: Uuid) -> StoreResult<HashSet<Uuid>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .recipients
            .values()
            .filter(|r| r.campaign_id == campaign_id)
            .map(|r| r.contact_id)
            .collect())
    }

    fn campaign_recipients(&self, campaign_id: Uuid) -> StoreResult<Vec<CampaignRecipient>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .recipients
            .values()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    fn pending_page(
        &self,
        campaign_id: Uuid,
        segment_id: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<CampaignRecipient>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .recipients
            .values()
            .filter(|r| {
                r.campaign_id == campaign_id
                    && r.status == RecipientStatus::Pending
                    && segment_id.is_none_or(|sid| r.segment_id == Some(sid))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn claim_pending(&self, recipient_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.recipients.get_mut(&recipient_id) {
            Some(r) if r.status == RecipientStatus::Pending => {
                r.stamp(RecipientStatus::Processing, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove_pending(&self, campaign_id: Uuid, contact_ids: &[Uuid]) -> StoreResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        let doomed: Vec<Uuid> = inner
            .recipients
            .values()
            .filter(|r| {
                r.campaign_id == campaign_id
                    && r.status == RecipientStatus::Pending
                    && contact_ids.contains(&r.contact_id)
            })
            .map(|r| r.id)
            .collect();
        for id in &doomed {
            inner.recipients.remove(id);
        }
        Ok(doomed.len())
    }

    fn cancel_pending(&self, campaign_id: Uuid, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        let mut cancelled = 0;
        for r in inner.recipients.values_mut() {
            if r.campaign_id == campaign_id && r.status == RecipientStatus::Pending {
                r.stamp(RecipientStatus::Cancelled, now);
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    fn status_tally(&self, campaign_id: Uuid) -> StoreResult<StatusTally> {
        let inner = self.inner.lock().unwrap();
        let mut tally = StatusTally::default();
        for r in inner.recipients.values() {
            if r.campaign_id == campaign_id {
                tally.add(r.status, 1);
            }
        }
        Ok(tally)
    }

    fn segment_tally(&self, segment_id: Uuid) -> StoreResult<StatusTally> {
        let inner = self.inner.lock().unwrap();
        let mut tally = StatusTally::default();
        for r in inner.recipients.values() {
            if r.segment_id == Some(segment_id) {
                tally.add(r.status, 1);
            }
        }
        Ok(tally)
    }

    fn assign_segment(&self, recipient_id: Uuid, segment_id: Option<Uuid>) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(r) = inner.recipients.get_mut(&recipient_id) {
            r.segment_id = segment_id;
        }
        Ok(())
    }

    fn clear_segment_refs(&self, campaign_id: Uuid) -> StoreResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        let mut cleared = 0;
        for r in inner.recipients.values_mut() {
            if r.campaign_id == campaign_id && r.segment_id.is_some() {
                r.segment_id = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

impl SegmentStore for MemStore {
    fn insert_segment(&self, segment: &Segment) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.segments.insert(segment.id, segment.clone());
        Ok(())
    }

    fn segment(&self, id: Uuid) -> StoreResult<Option<Segment>> {
        Ok(self.inner.lock().unwrap().segments.get(&id).cloned())
    }

    fn save_segment(&self, segment: &Segment) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.segments.insert(segment.id, segment.clone());
        Ok(())
    }

    fn segments(&self, campaign_id: Uuid) -> StoreResult<Vec<Segment>> {
        let inner = self.inner.lock().unwrap();
        let mut found: Vec<Segment> = inner
            .segments
            .values()
            .filter(|s| s.campaign_id == campaign_id)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.position);
        Ok(found)
    }

    fn delete_segments(&self, campaign_id: Uuid) -> StoreResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        let doomed: Vec<Uuid> = inner
            .segments
            .values()
            .filter(|s| s.campaign_id == campaign_id)
            .map(|s| s.id)
            .collect();
        for id in &doomed {
            inner.segments.remove(id);
        }
        Ok(doomed.len())
    }
}

impl SequenceStore for MemStore {
    fn insert_sequence(&self, sequence: &Sequence) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.sequences.insert(sequence.id, sequence.clone());
        Ok(())
    }

    fn sequence(&self, id: Uuid) -> StoreResult<Option<Sequence>> {
        Ok(self.inner.lock().unwrap().sequences.get(&id).cloned())
    }

    fn save_sequence(&self, sequence: &Sequence) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.sequences.insert(sequence.id, sequence.clone());
        Ok(())
    }

    fn list_sequences(&self) -> StoreResult<Vec<Sequence>> {
        let inner = self.inner.lock().unwrap();
        let mut all: Vec<Sequence> = inner.sequences.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        Ok(all)
    }

    fn insert_step(&self, step: &SequenceStep) -> StoreResult<()> {
        self.inner.lock().unwrap().steps.push(step.clone());
        Ok(())
    }

    fn steps(&self, sequence_id: Uuid) -> StoreResult<Vec<SequenceStep>> {
        let inner = self.inner.lock().unwrap();
        let mut found: Vec<SequenceStep> = inner
            .steps
            .iter()
            .filter(|s| s.sequence_id == sequence_id)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.position);
        Ok(found)
    }

    fn step_at(&self, sequence_id: Uuid, position: i32) -> StoreResult<Option<SequenceStep>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .steps
            .iter()
            .find(|s| s.sequence_id == sequence_id && s.position == position)
            .cloned())
    }

    fn insert_sequence_contact(&self, sc: &SequenceContact) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.sequence_contacts.insert(sc.id, sc.clone());
        Ok(())
    }

    fn sequence_contact(
        &self,
        sequence_id: Uuid,
        contact_id: Uuid,
    ) -> StoreResult<Option<SequenceContact>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sequence_contacts
            .values()
            .find(|sc| sc.sequence_id == sequence_id && sc.contact_id == contact_id)
            .cloned())
    }

    fn sequence_contact_by_id(&self, id: Uuid) -> StoreResult<Option<SequenceContact>> {
        Ok(self.inner.lock().unwrap().sequence_contacts.get(&id).cloned())
    }

    fn save_sequence_contact(&self, sc: &SequenceContact) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.sequence_contacts.insert(sc.id, sc.clone());
        Ok(())
    }

    fn due_sequence_contacts(&self, now: DateTime<Utc>) -> StoreResult<Vec<SequenceContact>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sequence_contacts
            .values()
            .filter(|sc| {
                sc.status == SequenceContactStatus::Active
                    && sc.next_send_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect())
    }

    fn insert_sequence_email(&self, email: &SequenceEmail) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.sequence_emails.insert(email.id, email.clone());
        Ok(())
    }

    fn sequence_email(&self, id: Uuid) -> StoreResult<Option<SequenceEmail>> {
        Ok(self.inner.lock().unwrap().sequence_emails.get(&id).cloned())
    }

    fn save_sequence_email(&self, email: &SequenceEmail) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.sequence_emails.insert(email.id, email.clone());
        Ok(())
    }

    fn sequence_email_for_step(
        &self,
        sequence_contact_id: Uuid,
        step_position: i32,
    ) -> StoreResult<Option<SequenceEmail>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sequence_emails
            .values()
            .find(|e| e.sequence_contact_id == sequence_contact_id && e.step_position == step_position)
            .cloned())
    }
}

impl ContactStore for MemStore {
    fn insert_contact(&self, contact: &Contact) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.contacts.insert(contact.id, contact.clone());
        Ok(())
    }

    fn contact(&self, id: Uuid) -> StoreResult<Option<Contact>> {
        Ok(self.inner.lock().unwrap().contacts.get(&id).cloned())
    }

    fn save_contact(&self, contact: &Contact) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.contacts.insert(contact.id, contact.clone());
        Ok(())
    }

    fn contact_ids_for_companies(&self, company_ids: &[Uuid]) -> StoreResult<Vec<Uuid>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .contacts
            .values()
            .filter(|c| c.company_id.is_some_and(|cid| company_ids.contains(&cid)))
            .map(|c| c.id)
            .collect())
    }

    fn has_closed_won_deal(&self, contact_id: Uuid) -> StoreResult<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .deals
            .iter()
            .any(|(cid, stage)| *cid == contact_id && stage == "closed_won"))
    }

    fn insert_deal(&self, contact_id: Uuid, stage: &str, _now: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.deals.push((contact_id, stage.to_string()));
        Ok(())
    }
}

impl EventStore for MemStore {
    fn insert_event(&self, event: &EmailEvent) -> StoreResult<()> {
        self.inner.lock().unwrap().events.push(event.clone());
        Ok(())
    }

    fn events_for_contact(&self, contact_id: Uuid) -> StoreResult<Vec<EmailEvent>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .events
            .iter()
            .filter(|e| e.contact_id == contact_id)
            .cloned()
            .collect())
    }
}
