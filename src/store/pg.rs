//! Postgres store adapter on diesel + r2d2.

use super::{
    CampaignStore, ContactStore, EventStore, RecipientStore, SegmentStore, SequenceStore,
    StatusTally, StoreError, StoreResult,
};
use crate::config::AppConfig;
use crate::shared::models::{
    AudienceKind, Campaign, CampaignRecipient, CampaignStatus, Contact, EmailEvent, ExitReason,
    RecipientStatus, Segment, SegmentStatus, Sequence, SequenceContact, SequenceContactStatus,
    SequenceEmail, SequenceEmailStatus, SequenceStatus, SequenceStep,
};
use crate::shared::schema::{
    campaign_recipients, campaign_segments, campaigns, contacts, deals, email_events,
    sequence_contacts, sequence_emails, sequence_steps, sequences,
};
use chrono::{DateTime, NaiveTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use std::collections::HashSet;
use uuid::Uuid;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_pool(config: &AppConfig) -> Result<DbPool, StoreError> {
    let manager = ConnectionManager::<PgConnection>::new(config.database_url());
    Pool::builder()
        .max_size(config.database.pool_size)
        .build(manager)
        .map_err(|e| StoreError::Pool(e.to_string()))
}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Database(e.to_string())
    }
}

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> StoreResult<PooledConnection<ConnectionManager<PgConnection>>> {
        self.pool.get().map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = campaigns, treat_none_as_null = true)]
struct CampaignRow {
    id: Uuid,
    name: String,
    status: String,
    audience: String,
    subject: String,
    body_html: String,
    scheduled_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Campaign> for CampaignRow {
    fn from(c: &Campaign) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            status: c.status.as_str().to_string(),
            audience: c.audience.as_str().to_string(),
            subject: c.subject.clone(),
            body_html: c.body_html.clone(),
            scheduled_at: c.scheduled_at,
            completed_at: c.completed_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

impl From<CampaignRow> for Campaign {
    fn from(row: CampaignRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            status: CampaignStatus::from_db(&row.status),
            audience: AudienceKind::from_db(&row.audience),
            subject: row.subject,
            body_html: row.body_html,
            scheduled_at: row.scheduled_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = campaign_recipients, treat_none_as_null = true)]
struct RecipientRow {
    id: Uuid,
    campaign_id: Uuid,
    contact_id: Uuid,
    segment_id: Option<Uuid>,
    status: String,
    message_id: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    processing_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    clicked_at: Option<DateTime<Utc>>,
    responded_at: Option<DateTime<Utc>>,
    bounced_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    unsubscribed_at: Option<DateTime<Utc>>,
    demo_scheduled_at: Option<DateTime<Utc>>,
}

impl From<&CampaignRecipient> for RecipientRow {
    fn from(r: &CampaignRecipient) -> Self {
        Self {
            id: r.id,
            campaign_id: r.campaign_id,
            contact_id: r.contact_id,
            segment_id: r.segment_id,
            status: r.status.as_str().to_string(),
            message_id: r.message_id.clone(),
            failure_reason: r.failure_reason.clone(),
            created_at: r.created_at,
            processing_at: r.processing_at,
            sent_at: r.sent_at,
            delivered_at: r.delivered_at,
            opened_at: r.opened_at,
            clicked_at: r.clicked_at,
            responded_at: r.responded_at,
            bounced_at: r.bounced_at,
            failed_at: r.failed_at,
            cancelled_at: r.cancelled_at,
            unsubscribed_at: r.unsubscribed_at,
            demo_scheduled_at: r.demo_scheduled_at,
        }
    }
}

impl From<RecipientRow> for CampaignRecipient {
    fn from(row: RecipientRow) -> Self {
        Self {
            id: row.id,
            campaign_id: row.campaign_id,
            contact_id: row.contact_id,
            segment_id: row.segment_id,
            status: RecipientStatus::from_db(&row.status),
            message_id: row.message_id,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            processing_at: row.processing_at,
            sent_at: row.sent_at,
            delivered_at: row.delivered_at,
            opened_at: row.opened_at,
            clicked_at: row.clicked_at,
            responded_at: row.responded_at,
            bounced_at: row.bounced_at,
            failed_at: row.failed_at,
            cancelled_at: row.cancelled_at,
            unsubscribed_at: row.unsubscribed_at,
            demo_scheduled_at: row.demo_scheduled_at,
        }
    }
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = campaign_segments, treat_none_as_null = true)]
struct SegmentRow {
    id: Uuid,
    campaign_id: Uuid,
    position: i32,
    status: String,
    subject_override: Option<String>,
    body_override: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<&Segment> for SegmentRow {
    fn from(s: &Segment) -> Self {
        Self {
            id: s.id,
            campaign_id: s.campaign_id,
            position: s.position,
            status: s.status.as_str().to_string(),
            subject_override: s.subject_override.clone(),
            body_override: s.body_override.clone(),
            sent_at: s.sent_at,
            completed_at: s.completed_at,
            created_at: s.created_at,
        }
    }
}

impl From<SegmentRow> for Segment {
    fn from(row: SegmentRow) -> Self {
        Self {
            id: row.id,
            campaign_id: row.campaign_id,
            position: row.position,
            status: SegmentStatus::from_db(&row.status),
            subject_override: row.subject_override,
            body_override: row.body_override,
            sent_at: row.sent_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = contacts, treat_none_as_null = true)]
struct ContactRow {
    id: Uuid,
    first_name: Option<String>,
    last_name: Option<String>,
    email: String,
    company: Option<String>,
    job_title: Option<String>,
    company_id: Option<Uuid>,
    pipeline_stage: String,
    unsubscribed: bool,
    created_at: DateTime<Utc>,
}

impl From<&Contact> for ContactRow {
    fn from(c: &Contact) -> Self {
        Self {
            id: c.id,
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
            email: c.email.clone(),
            company: c.company.clone(),
            job_title: c.job_title.clone(),
            company_id: c.company_id,
            pipeline_stage: c.pipeline_stage.clone(),
            unsubscribed: c.unsubscribed,
            created_at: c.created_at,
        }
    }
}

impl From<ContactRow> for Contact {
    fn from(row: ContactRow) -> Self {
        Self {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            company: row.company,
            job_title: row.job_title,
            company_id: row.company_id,
            pipeline_stage: row.pipeline_stage,
            unsubscribed: row.unsubscribed,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = sequences)]
struct SequenceRow {
    id: Uuid,
    name: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Sequence> for SequenceRow {
    fn from(s: &Sequence) -> Self {
        Self {
            id: s.id,
            name: s.name.clone(),
            status: s.status.as_str().to_string(),
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

impl From<SequenceRow> for Sequence {
    fn from(row: SequenceRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            status: SequenceStatus::from_db(&row.status),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = sequence_steps, treat_none_as_null = true)]
struct StepRow {
    id: Uuid,
    sequence_id: Uuid,
    position: i32,
    delay_days: i32,
    send_time: Option<NaiveTime>,
    subject: String,
    body_html: String,
    created_at: DateTime<Utc>,
}

impl From<&SequenceStep> for StepRow {
    fn from(s: &SequenceStep) -> Self {
        Self {
            id: s.id,
            sequence_id: s.sequence_id,
            position: s.position,
            delay_days: s.delay_days,
            send_time: s.send_time,
            subject: s.subject.clone(),
            body_html: s.body_html.clone(),
            created_at: s.created_at,
        }
    }
}

impl From<StepRow> for SequenceStep {
    fn from(row: StepRow) -> Self {
        Self {
            id: row.id,
            sequence_id: row.sequence_id,
            position: row.position,
            delay_days: row.delay_days,
            send_time: row.send_time,
            subject: row.subject,
            body_html: row.body_html,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = sequence_contacts, treat_none_as_null = true)]
struct SequenceContactRow {
    id: Uuid,
    sequence_id: Uuid,
    contact_id: Uuid,
    current_step: i32,
    status: String,
    next_send_at: Option<DateTime<Utc>>,
    exit_reason: Option<String>,
    enrolled_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl From<&SequenceContact> for SequenceContactRow {
    fn from(sc: &SequenceContact) -> Self {
        Self {
            id: sc.id,
            sequence_id: sc.sequence_id,
            contact_id: sc.contact_id,
            current_step: sc.current_step,
            status: sc.status.as_str().to_string(),
            next_send_at: sc.next_send_at,
            exit_reason: sc.exit_reason.map(|r| r.as_str().to_string()),
            enrolled_at: sc.enrolled_at,
            finished_at: sc.finished_at,
        }
    }
}

impl From<SequenceContactRow> for SequenceContact {
    fn from(row: SequenceContactRow) -> Self {
        Self {
            id: row.id,
            sequence_id: row.sequence_id,
            contact_id: row.contact_id,
            current_step: row.current_step,
            status: SequenceContactStatus::from_db(&row.status),
            next_send_at: row.next_send_at,
            exit_reason: row.exit_reason.as_deref().and_then(ExitReason::from_db),
            enrolled_at: row.enrolled_at,
            finished_at: row.finished_at,
        }
    }
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = sequence_emails, treat_none_as_null = true)]
struct SequenceEmailRow {
    id: Uuid,
    sequence_id: Uuid,
    sequence_contact_id: Uuid,
    contact_id: Uuid,
    step_position: i32,
    status: String,
    message_id: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
}

impl From<&SequenceEmail> for SequenceEmailRow {
    fn from(e: &SequenceEmail) -> Self {
        Self {
            id: e.id,
            sequence_id: e.sequence_id,
            sequence_contact_id: e.sequence_contact_id,
            contact_id: e.contact_id,
            step_position: e.step_position,
            status: e.status.as_str().to_string(),
            message_id: e.message_id.clone(),
            failure_reason: e.failure_reason.clone(),
            created_at: e.created_at,
            sent_at: e.sent_at,
        }
    }
}

impl From<SequenceEmailRow> for SequenceEmail {
    fn from(row: SequenceEmailRow) -> Self {
        Self {
            id: row.id,
            sequence_id: row.sequence_id,
            sequence_contact_id: row.sequence_contact_id,
            contact_id: row.contact_id,
            step_position: row.step_position,
            status: SequenceEmailStatus::from_db(&row.status),
            message_id: row.message_id,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            sent_at: row.sent_at,
        }
    }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = email_events)]
struct EventRow {
    id: Uuid,
    campaign_id: Option<Uuid>,
    sequence_email_id: Option<Uuid>,
    contact_id: Uuid,
    kind: String,
    ip: Option<String>,
    user_agent: Option<String>,
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
}

impl From<&EmailEvent> for EventRow {
    fn from(e: &EmailEvent) -> Self {
        Self {
            id: e.id,
            campaign_id: e.campaign_id,
            sequence_email_id: e.sequence_email_id,
            contact_id: e.contact_id,
            kind: e.kind.clone(),
            ip: e.ip.clone(),
            user_agent: e.user_agent.clone(),
            payload: e.payload.clone(),
            occurred_at: e.occurred_at,
        }
    }
}

impl From<EventRow> for EmailEvent {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            campaign_id: row.campaign_id,
            sequence_email_id: row.sequence_email_id,
            contact_id: row.contact_id,
            kind: row.kind,
            ip: row.ip,
            user_agent: row.user_agent,
            payload: row.payload,
            occurred_at: row.occurred_at,
        }
    }
}

impl CampaignStore for PgStore {
    fn insert_campaign(&self, campaign: &Campaign) -> StoreResult<()> {
        diesel::insert_into(campaigns::table)
            .values(CampaignRow::from(campaign))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn campaign(&self, id: Uuid) -> StoreResult<Option<Campaign>> {
        let row: Option<CampaignRow> = campaigns::table
            .filter(campaigns::id.eq(id))
            .first(&mut self.conn()?)
            .optional()?;
        Ok(row.map(Campaign::from))
    }

    fn save_campaign(&self, campaign: &Campaign) -> StoreResult<()> {
        diesel::update(campaigns::table.filter(campaigns::id.eq(campaign.id)))
            .set(CampaignRow::from(campaign))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn list_campaigns(&self) -> StoreResult<Vec<Campaign>> {
        let rows: Vec<CampaignRow> = campaigns::table
            .order(campaigns::created_at.asc())
            .load(&mut self.conn()?)?;
        Ok(rows.into_iter().map(Campaign::from).collect())
    }

    fn due_scheduled_campaigns(&self, now: DateTime<Utc>) -> StoreResult<Vec<Campaign>> {
        let rows: Vec<CampaignRow> = campaigns::table
            .filter(campaigns::status.eq(CampaignStatus::Scheduled.as_str()))
            .filter(campaigns::scheduled_at.le(now))
            .load(&mut self.conn()?)?;
        Ok(rows.into_iter().map(Campaign::from).collect())
    }
}

impl RecipientStore for PgStore {
    fn insert_recipient(&self, recipient: &CampaignRecipient) -> StoreResult<()> {
        diesel::insert_into(campaign_recipients::table)
            .values(RecipientRow::from(recipient))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn recipient(
        &self,
        campaign_id: Uuid,
        contact_id: Uuid,
    ) -> StoreResult<Option<CampaignRecipient>> {
        let row: Option<RecipientRow> = campaign_recipients::table
            .filter(campaign_recipients::campaign_id.eq(campaign_id))
            .filter(campaign_recipients::contact_id.eq(contact_id))
            .first(&mut self.conn()?)
            .optional()?;
        Ok(row.map(CampaignRecipient::from))
    }

    fn recipient_by_id(&self, id: Uuid) -> StoreResult<Option<CampaignRecipient>> {
        let row: Option<RecipientRow> = campaign_recipients::table
            .filter(campaign_recipients::id.eq(id))
            .first(&mut self.conn()?)
            .optional()?;
        Ok(row.map(CampaignRecipient::from))
    }

    fn save_recipient(&self, recipient: &CampaignRecipient) -> StoreResult<()> {
        diesel::update(
            campaign_recipients::table.filter(campaign_recipients::id.eq(recipient.id)),
        )
        .set(RecipientRow::from(recipient))
        .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn recipient_contact_ids(&self, campaign_id: Uuid) -> StoreResult<HashSet<Uuid>> {
        let ids: Vec<Uuid> = campaign_recipients::table
            .filter(campaign_recipients::campaign_id.eq(campaign_id))
            .select(campaign_recipients::contact_id)
            .load(&mut self.conn()?)?;
        Ok(ids.into_iter().collect())
    }

    fn campaign_recipients(&self, campaign_id: Uuid) -> StoreResult<Vec<CampaignRecipient>> {
        let rows: Vec<RecipientRow> = campaign_recipients::table
            .filter(campaign_recipients::campaign_id.eq(campaign_id))
            .order(campaign_recipients::id.asc())
            .load(&mut self.conn()?)?;
        Ok(rows.into_iter().map(CampaignRecipient::from).collect())
    }

    fn pending_page(
        &self,
        campaign_id: Uuid,
        segment_id: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<CampaignRecipient>> {
        let mut query = campaign_recipients::table
            .filter(campaign_recipients::campaign_id.eq(campaign_id))
            .filter(campaign_recipients::status.eq(RecipientStatus::Pending.as_str()))
            .into_boxed();
        if let Some(sid) = segment_id {
            query = query.filter(campaign_recipients::segment_id.eq(sid));
        }
        let rows: Vec<RecipientRow> = query
            .order(campaign_recipients::id.asc())
            .limit(limit as i64)
            .load(&mut self.conn()?)?;
        Ok(rows.into_iter().map(CampaignRecipient::from).collect())
    }

    fn claim_pending(&self, recipient_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        // Single conditional write; the affected-row count is the race arbiter.
        let claimed = diesel::update(
            campaign_recipients::table
                .filter(campaign_recipients::id.eq(recipient_id))
                .filter(campaign_recipients::status.eq(RecipientStatus::Pending.as_str())),
        )
        .set((
            campaign_recipients::status.eq(RecipientStatus::Processing.as_str()),
            campaign_recipients::processing_at.eq(Some(now)),
        ))
        .execute(&mut self.conn()?)?;
        Ok(claimed == 1)
    }

    fn remove_pending(&self, campaign_id: Uuid, contact_ids: &[Uuid]) -> StoreResult<usize> {
        let removed = diesel::delete(
            campaign_recipients::table
                .filter(campaign_recipients::campaign_id.eq(campaign_id))
                .filter(campaign_recipients::contact_id.eq_any(contact_ids))
                .filter(campaign_recipients::status.eq(RecipientStatus::Pending.as_str())),
        )
        .execute(&mut self.conn()?)?;
        Ok(removed)
    }

    fn cancel_pending(&self, campaign_id: Uuid, now: DateTime<Utc>) -> StoreResult<usize> {
        let cancelled = diesel::update(
            campaign_recipients::table
                .filter(campaign_recipients::campaign_id.eq(campaign_id))
                .filter(campaign_recipients::status.eq(RecipientStatus::Pending.as_str())),
        )
        .set((
            campaign_recipients::status.eq(RecipientStatus::Cancelled.as_str()),
            campaign_recipients::cancelled_at.eq(Some(now)),
        ))
        .execute(&mut self.conn()?)?;
        Ok(cancelled)
    }

    fn status_tally(&self, campaign_id: Uuid) -> StoreResult<StatusTally> {
        let rows: Vec<(String, i64)> = campaign_recipients::table
            .filter(campaign_recipients::campaign_id.eq(campaign_id))
            .group_by(campaign_recipients::status)
            .select((campaign_recipients::status, diesel::dsl::count_star()))
            .load(&mut self.conn()?)?;
        let mut tally = StatusTally::default();
        for (status, count) in rows {
            tally.add(RecipientStatus::from_db(&status), count as usize);
        }
        Ok(tally)
    }

    fn segment_tally(&self, segment_id: Uuid) -> StoreResult<StatusTally> {
        let rows: Vec<(String, i64)> = campaign_recipients::table
            .filter(campaign_recipients::segment_id.eq(segment_id))
            .group_by(campaign_recipients::status)
            .select((campaign_recipients::status, diesel::dsl::count_star()))
            .load(&mut self.conn()?)?;
        let mut tally = StatusTally::default();
        for (status, count) in rows {
            tally.add(RecipientStatus::from_db(&status), count as usize);
        }
        Ok(tally)
    }

    fn assign_segment(&self, recipient_id: Uuid, segment_id: Option<Uuid>) -> StoreResult<()> {
        diesel::update(campaign_recipients::table.filter(campaign_recipients::id.eq(recipient_id)))
            .set(campaign_recipients::segment_id.eq(segment_id))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn clear_segment_refs(&self, campaign_id: Uuid) -> StoreResult<usize> {
        let cleared = diesel::update(
            campaign_recipients::table
                .filter(campaign_recipients::campaign_id.eq(campaign_id))
                .filter(campaign_recipients::segment_id.is_not_null()),
        )
        .set(campaign_recipients::segment_id.eq(None::<Uuid>))
        .execute(&mut self.conn()?)?;
        Ok(cleared)
    }
}

impl SegmentStore for PgStore {
    fn insert_segment(&self, segment: &Segment) -> StoreResult<()> {
        diesel::insert_into(campaign_segments::table)
            .values(SegmentRow::from(segment))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn segment(&self, id: Uuid) -> StoreResult<Option<Segment>> {
        let row: Option<SegmentRow> = campaign_segments::table
            .filter(campaign_segments::id.eq(id))
            .first(&mut self.conn()?)
            .optional()?;
        Ok(row.map(Segment::from))
    }

    fn save_segment(&self, segment: &Segment) -> StoreResult<()> {
        diesel::update(campaign_segments::table.filter(campaign_segments::id.eq(segment.id)))
            .set(SegmentRow::from(segment))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn segments(&self, campaign_id: Uuid) -> StoreResult<Vec<Segment>> {
        let rows: Vec<SegmentRow> = campaign_segments::table
            .filter(campaign_segments::campaign_id.eq(campaign_id))
            .order(campaign_segments::position.asc())
            .load(&mut self.conn()?)?;
        Ok(rows.into_iter().map(Segment::from).collect())
    }

    fn delete_segments(&self, campaign_id: Uuid) -> StoreResult<usize> {
        let deleted = diesel::delete(
            campaign_segments::table.filter(campaign_segments::campaign_id.eq(campaign_id)),
        )
        .execute(&mut self.conn()?)?;
        Ok(deleted)
    }
}

impl SequenceStore for PgStore {
    fn insert_sequence(&self, sequence: &Sequence) -> StoreResult<()> {
        diesel::insert_into(sequences::table)
            .values(SequenceRow::from(sequence))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn sequence(&self, id: Uuid) -> StoreResult<Option<Sequence>> {
        let row: Option<SequenceRow> = sequences::table
            .filter(sequences::id.eq(id))
            .first(&mut self.conn()?)
            .optional()?;
        Ok(row.map(Sequence::from))
    }

    fn save_sequence(&self, sequence: &Sequence) -> StoreResult<()> {
        diesel::update(sequences::table.filter(sequences::id.eq(sequence.id)))
            .set(SequenceRow::from(sequence))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn list_sequences(&self) -> StoreResult<Vec<Sequence>> {
        let rows: Vec<SequenceRow> = sequences::table
            .order(sequences::created_at.asc())
            .load(&mut self.conn()?)?;
        Ok(rows.into_iter().map(Sequence::from).collect())
    }

    fn insert_step(&self, step: &SequenceStep) -> StoreResult<()> {
        diesel::insert_into(sequence_steps::table)
            .values(StepRow::from(step))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn steps(&self, sequence_id: Uuid) -> StoreResult<Vec<SequenceStep>> {
        let rows: Vec<StepRow> = sequence_steps::table
            .filter(sequence_steps::sequence_id.eq(sequence_id))
            .order(sequence_steps::position.asc())
            .load(&mut self.conn()?)?;
        Ok(rows.into_iter().map(SequenceStep::from).collect())
    }

    fn step_at(&self, sequence_id: Uuid, position: i32) -> StoreResult<Option<SequenceStep>> {
        let row: Option<StepRow> = sequence_steps::table
            .filter(sequence_steps::sequence_id.eq(sequence_id))
            .filter(sequence_steps::position.eq(position))
            .first(&mut self.conn()?)
            .optional()?;
        Ok(row.map(SequenceStep::from))
    }

    fn insert_sequence_contact(&self, sc: &SequenceContact) -> StoreResult<()> {
        diesel::insert_into(sequence_contacts::table)
            .values(SequenceContactRow::from(sc))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn sequence_contact(
        &self,
        sequence_id: Uuid,
        contact_id: Uuid,
    ) -> StoreResult<Option<SequenceContact>> {
        let row: Option<SequenceContactRow> = sequence_contacts::table
            .filter(sequence_contacts::sequence_id.eq(sequence_id))
            .filter(sequence_contacts::contact_id.eq(contact_id))
            .first(&mut self.conn()?)
            .optional()?;
        Ok(row.map(SequenceContact::from))
    }

    fn sequence_contact_by_id(&self, id: Uuid) -> StoreResult<Option<SequenceContact>> {
        let row: Option<SequenceContactRow> = sequence_contacts::table
            .filter(sequence_contacts::id.eq(id))
            .first(&mut self.conn()?)
            .optional()?;
        Ok(row.map(SequenceContact::from))
    }

    fn save_sequence_contact(&self, sc: &SequenceContact) -> StoreResult<()> {
        diesel::update(sequence_contacts::table.filter(sequence_contacts::id.eq(sc.id)))
            .set(SequenceContactRow::from(sc))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn due_sequence_contacts(&self, now: DateTime<Utc>) -> StoreResult<Vec<SequenceContact>> {
        let rows: Vec<SequenceContactRow> = sequence_contacts::table
            .filter(sequence_contacts::status.eq(SequenceContactStatus::Active.as_str()))
            .filter(sequence_contacts::next_send_at.le(now))
            .load(&mut self.conn()?)?;
        Ok(rows.into_iter().map(SequenceContact::from).collect())
    }

    fn insert_sequence_email(&self, email: &SequenceEmail) -> StoreResult<()> {
        diesel::insert_into(sequence_emails::table)
            .values(SequenceEmailRow::from(email))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn sequence_email(&self, id: Uuid) -> StoreResult<Option<SequenceEmail>> {
        let row: Option<SequenceEmailRow> = sequence_emails::table
            .filter(sequence_emails::id.eq(id))
            .first(&mut self.conn()?)
            .optional()?;
        Ok(row.map(SequenceEmail::from))
    }

    fn save_sequence_email(&self, email: &SequenceEmail) -> StoreResult<()> {
        diesel::update(sequence_emails::table.filter(sequence_emails::id.eq(email.id)))
            .set(SequenceEmailRow::from(email))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn sequence_email_for_step(
        &self,
        sequence_contact_id: Uuid,
        step_position: i32,
    ) -> StoreResult<Option<SequenceEmail>> {
        let row: Option<SequenceEmailRow> = sequence_emails::table
            .filter(sequence_emails::sequence_contact_id.eq(sequence_contact_id))
            .filter(sequence_emails::step_position.eq(step_position))
            .first(&mut self.conn()?)
            .optional()?;
        Ok(row.map(SequenceEmail::from))
    }
}

impl ContactStore for PgStore {
    fn insert_contact(&self, contact: &Contact) -> StoreResult<()> {
        diesel::insert_into(contacts::table)
            .values(ContactRow::from(contact))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn contact(&self, id: Uuid) -> StoreResult<Option<Contact>> {
        let row: Option<ContactRow> = contacts::table
            .filter(contacts::id.eq(id))
            .first(&mut self.conn()?)
            .optional()?;
        Ok(row.map(Contact::from))
    }

    fn save_contact(&self, contact: &Contact) -> StoreResult<()> {
        diesel::update(contacts::table.filter(contacts::id.eq(contact.id)))
            .set(ContactRow::from(contact))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn contact_ids_for_companies(&self, company_ids: &[Uuid]) -> StoreResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = contacts::table
            .filter(contacts::company_id.eq_any(company_ids.iter().copied().map(Some)))
            .select(contacts::id)
            .load(&mut self.conn()?)?;
        Ok(ids)
    }

    fn has_closed_won_deal(&self, contact_id: Uuid) -> StoreResult<bool> {
        let count: i64 = deals::table
            .filter(deals::contact_id.eq(contact_id))
            .filter(deals::stage.eq("closed_won"))
            .count()
            .get_result(&mut self.conn()?)?;
        Ok(count > 0)
    }

    fn insert_deal(&self, contact_id: Uuid, stage: &str, now: DateTime<Utc>) -> StoreResult<()> {
        diesel::insert_into(deals::table)
            .values((
                deals::id.eq(Uuid::new_v4()),
                deals::contact_id.eq(contact_id),
                deals::stage.eq(stage),
                deals::created_at.eq(now),
            ))
            .execute(&mut self.conn()?)?;
        Ok(())
    }
}

impl EventStore for PgStore {
    fn insert_event(&self, event: &EmailEvent) -> StoreResult<()> {
        diesel::insert_into(email_events::table)
            .values(EventRow::from(event))
            .execute(&mut self.conn()?)?;
        Ok(())
    }

    fn events_for_contact(&self, contact_id: Uuid) -> StoreResult<Vec<EmailEvent>> {
        let rows: Vec<EventRow> = email_events::table
            .filter(email_events::contact_id.eq(contact_id))
            .order(email_events::occurred_at.asc())
            .load(&mut self.conn()?)?;
        Ok(rows.into_iter().map(EmailEvent::from).collect())
    }
}
