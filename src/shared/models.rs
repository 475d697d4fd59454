use chrono::{DateTime, NaiveTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Raised when a stored status string is not one this version understands.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unrecognized {entity} status: {value}")]
pub struct UnknownStatus {
    pub entity: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Lenient read used at the store boundary: an unrecognized value is
    /// logged and degraded to `draft` instead of poisoning every query that
    /// touches the row. Callers that need to distinguish corrupt data use
    /// `from_str`.
    pub fn from_db(value: &str) -> Self {
        Self::from_str(value).unwrap_or_else(|e| {
            warn!("{e}; treating campaign as draft");
            Self::Draft
        })
    }
}

impl FromStr for CampaignStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(Self::Draft),
            "scheduled" => Ok(Self::Scheduled),
            "in_progress" => Ok(Self::InProgress),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus {
                entity: "campaign",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceKind {
    Contact,
    Company,
}

impl AudienceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Company => "company",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "company" => Self::Company,
            "contact" => Self::Contact,
            other => {
                warn!("unrecognized campaign audience: {other}; treating as contact");
                Self::Contact
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub audience: AudienceKind,
    pub subject: String,
    pub body_html: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(
        name: &str,
        audience: AudienceKind,
        subject: &str,
        body_html: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: CampaignStatus::Draft,
            audience,
            subject: subject.to_string(),
            body_html: body_html.to_string(),
            scheduled_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Processing,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Responded,
    Bounced,
    Failed,
    Cancelled,
    Unsubscribed,
    DemoScheduled,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Responded => "responded",
            Self::Bounced => "bounced",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Unsubscribed => "unsubscribed",
            Self::DemoScheduled => "demo_scheduled",
        }
    }

    pub fn from_db(value: &str) -> Self {
        Self::from_str(value).unwrap_or_else(|e| {
            warn!("{e}; treating recipient as pending");
            Self::Pending
        })
    }

    /// Position along the delivery/engagement lattice
    /// `pending → processing → sent → delivered → opened → clicked → responded`.
    /// `None` for statuses that diverted out of the lattice.
    pub fn engagement_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Processing => Some(1),
            Self::Sent => Some(2),
            Self::Delivered => Some(3),
            Self::Opened => Some(4),
            Self::Clicked => Some(5),
            Self::Responded => Some(6),
            _ => None,
        }
    }

    pub fn has_engaged(&self) -> bool {
        matches!(self.engagement_rank(), Some(rank) if rank >= 4)
    }

    /// Terminal statuses a recipient diverts into; never re-entered or
    /// overwritten by pending-side logic or late engagement events.
    pub fn is_divert_terminal(&self) -> bool {
        matches!(
            self,
            Self::Bounced | Self::Failed | Self::Cancelled | Self::Unsubscribed | Self::DemoScheduled
        )
    }
}

impl FromStr for RecipientStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "opened" => Ok(Self::Opened),
            "clicked" => Ok(Self::Clicked),
            "responded" => Ok(Self::Responded),
            "bounced" => Ok(Self::Bounced),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "unsubscribed" => Ok(Self::Unsubscribed),
            "demo_scheduled" => Ok(Self::DemoScheduled),
            other => Err(UnknownStatus {
                entity: "recipient",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecipient {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
    pub segment_id: Option<Uuid>,
    pub status: RecipientStatus,
    pub message_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub demo_scheduled_at: Option<DateTime<Utc>>,
}

impl CampaignRecipient {
    pub fn new(campaign_id: Uuid, contact_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            contact_id,
            segment_id: None,
            status: RecipientStatus::Pending,
            message_id: None,
            failure_reason: None,
            created_at: now,
            processing_at: None,
            sent_at: None,
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            responded_at: None,
            bounced_at: None,
            failed_at: None,
            cancelled_at: None,
            unsubscribed_at: None,
            demo_scheduled_at: None,
        }
    }

    /// Moves the record to `status` and stamps the matching timestamp.
    pub fn stamp(&mut self, status: RecipientStatus, now: DateTime<Utc>) {
        self.status = status;
        let slot = match status {
            RecipientStatus::Pending => return,
            RecipientStatus::Processing => &mut self.processing_at,
            RecipientStatus::Sent => &mut self.sent_at,
            RecipientStatus::Delivered => &mut self.delivered_at,
            RecipientStatus::Opened => &mut self.opened_at,
            RecipientStatus::Clicked => &mut self.clicked_at,
            RecipientStatus::Responded => &mut self.responded_at,
            RecipientStatus::Bounced => &mut self.bounced_at,
            RecipientStatus::Failed => &mut self.failed_at,
            RecipientStatus::Cancelled => &mut self.cancelled_at,
            RecipientStatus::Unsubscribed => &mut self.unsubscribed_at,
            RecipientStatus::DemoScheduled => &mut self.demo_scheduled_at,
        };
        *slot = Some(now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Draft,
    InProgress,
    Completed,
    Failed,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "draft" => Self::Draft,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => {
                warn!("unrecognized segment status: {other}; treating as draft");
                Self::Draft
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub position: i32,
    pub status: SegmentStatus,
    pub subject_override: Option<String>,
    pub body_override: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Segment {
    pub fn new(campaign_id: Uuid, position: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            position,
            status: SegmentStatus::Draft,
            subject_override: None,
            body_override: None,
            sent_at: None,
            completed_at: None,
            created_at: now,
        }
    }

    pub fn effective_subject<'a>(&'a self, campaign: &'a Campaign) -> &'a str {
        self.subject_override.as_deref().unwrap_or(&campaign.subject)
    }

    pub fn effective_body<'a>(&'a self, campaign: &'a Campaign) -> &'a str {
        self.body_override.as_deref().unwrap_or(&campaign.body_html)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub company_id: Option<Uuid>,
    pub pipeline_stage: String,
    pub unsubscribed: bool,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    pub fn display_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Draft,
    Active,
    Paused,
}

impl SequenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "draft" => Self::Draft,
            "active" => Self::Active,
            "paused" => Self::Paused,
            other => {
                warn!("unrecognized sequence status: {other}; treating as draft");
                Self::Draft
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: Uuid,
    pub name: String,
    pub status: SequenceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sequence {
    pub fn new(name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: SequenceStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub position: i32,
    pub delay_days: i32,
    pub send_time: Option<NaiveTime>,
    pub subject: String,
    pub body_html: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceContactStatus {
    Active,
    Completed,
    Exited,
}

impl SequenceContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Exited => "exited",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "completed" => Self::Completed,
            "exited" => Self::Exited,
            other => {
                warn!("unrecognized sequence contact status: {other}; treating as exited");
                Self::Exited
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Converted,
    Unsubscribed,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Converted => "converted",
            Self::Unsubscribed => "unsubscribed",
            Self::Manual => "manual",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "converted" => Some(Self::Converted),
            "unsubscribed" => Some(Self::Unsubscribed),
            "manual" => Some(Self::Manual),
            other => {
                warn!("unrecognized exit reason: {other}");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceContact {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub contact_id: Uuid,
    pub current_step: i32,
    pub status: SequenceContactStatus,
    pub next_send_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub enrolled_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SequenceContact {
    pub fn new(sequence_id: Uuid, contact_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence_id,
            contact_id,
            current_step: 0,
            status: SequenceContactStatus::Active,
            next_send_at: None,
            exit_reason: None,
            enrolled_at: now,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceEmailStatus {
    Pending,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Failed,
}

impl SequenceEmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Bounced => "bounced",
            Self::Failed => "failed",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "sent" => Self::Sent,
            "delivered" => Self::Delivered,
            "opened" => Self::Opened,
            "clicked" => Self::Clicked,
            "bounced" => Self::Bounced,
            "failed" => Self::Failed,
            other => {
                warn!("unrecognized sequence email status: {other}; treating as pending");
                Self::Pending
            }
        }
    }

    pub fn engagement_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Opened => Some(3),
            Self::Clicked => Some(4),
            Self::Bounced | Self::Failed => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceEmail {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub sequence_contact_id: Uuid,
    pub contact_id: Uuid,
    pub step_position: i32,
    pub status: SequenceEmailStatus,
    pub message_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl SequenceEmail {
    pub fn new(sc: &SequenceContact, step_position: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence_id: sc.sequence_id,
            sequence_contact_id: sc.id,
            contact_id: sc.contact_id,
            step_position,
            status: SequenceEmailStatus::Pending,
            message_id: None,
            failure_reason: None,
            created_at: now,
            sent_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailEvent {
    pub id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub sequence_email_id: Option<Uuid>,
    pub contact_id: Uuid,
    pub kind: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}
