//! Per-recipient delivery: claim, resolve, inject tracking, send, settle.
//! Each step is its own failure boundary; nothing but a rate limit is
//! allowed to escape this module.

use crate::delivery::template::{render, TemplateVars};
use crate::delivery::{DeliveryError, OutboundEmail, Transport};
use crate::shared::clock::Clock;
use crate::shared::models::{CampaignRecipient, RecipientStatus};
use crate::store::Store;
use crate::tracking::tokens::TokenSigner;
use crate::tracking::{inject_pixel, rewrite_links};
use log::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed,
    /// The record was not pending; another worker owns (or owned) it.
    Skipped,
    /// No record to update; nothing to do.
    MissingRecord,
}

pub struct DeliveryPipeline<'a> {
    store: &'a dyn Store,
    transport: &'a dyn Transport,
    clock: &'a dyn Clock,
    signer: &'a TokenSigner,
    public_url: &'a str,
}

impl<'a> DeliveryPipeline<'a> {
    pub fn new(
        store: &'a dyn Store,
        transport: &'a dyn Transport,
        clock: &'a dyn Clock,
        signer: &'a TokenSigner,
        public_url: &'a str,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            signer,
            public_url,
        }
    }

    /// Runs the full pipeline for one (campaign, contact) pair.
    ///
    /// The only error that propagates is `RateLimited`, re-raised so the
    /// queue's backoff policy decides the next attempt; the claim is
    /// released first so that attempt can pass the pending guard.
    pub fn deliver(
        &self,
        campaign_id: Uuid,
        contact_id: Uuid,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let Some(mut recipient) = self.store.recipient(campaign_id, contact_id)? else {
            warn!("no recipient record for campaign {campaign_id}, contact {contact_id}");
            return Ok(DeliveryOutcome::MissingRecord);
        };

        if recipient.status != RecipientStatus::Pending {
            debug!(
                "recipient {} is {}, not pending; skipping",
                recipient.id, recipient.status
            );
            return Ok(DeliveryOutcome::Skipped);
        }

        // The claim: one conditional write, row count decides the race.
        if !self.store.claim_pending(recipient.id, self.clock.now())? {
            debug!("lost claim race for recipient {}; skipping", recipient.id);
            return Ok(DeliveryOutcome::Skipped);
        }
        recipient.stamp(RecipientStatus::Processing, self.clock.now());

        match self.attempt(&recipient) {
            Ok(message_id) => {
                recipient.message_id = Some(message_id);
                recipient.stamp(RecipientStatus::Sent, self.clock.now());
                if let Err(e) = self.store.save_recipient(&recipient) {
                    error!("failed to record sent status for {}: {e}", recipient.id);
                }
                Ok(DeliveryOutcome::Sent)
            }
            Err(e) if e.is_rate_limited() => {
                // Release the claim so the retried job can take it again.
                recipient.status = RecipientStatus::Pending;
                if let Err(save_err) = self.store.save_recipient(&recipient) {
                    error!(
                        "failed to release claim on {} after rate limit: {save_err}",
                        recipient.id
                    );
                }
                warn!("delivery rate limited for recipient {}", recipient.id);
                Err(e)
            }
            Err(e) => {
                recipient.failure_reason = Some(e.to_string());
                recipient.stamp(RecipientStatus::Failed, self.clock.now());
                if let Err(save_err) = self.store.save_recipient(&recipient) {
                    error!(
                        "failed to record failure for {}: {save_err}",
                        recipient.id
                    );
                }
                Ok(DeliveryOutcome::Failed)
            }
        }
    }

    /// Steps 2–4: resolve content, inject tracking, hand to the transport.
    fn attempt(&self, recipient: &CampaignRecipient) -> Result<String, DeliveryError> {
        let campaign = self
            .store
            .campaign(recipient.campaign_id)?
            .ok_or_else(|| {
                DeliveryError::Content(format!("campaign {} is gone", recipient.campaign_id))
            })?;
        let contact = self.store.contact(recipient.contact_id)?.ok_or_else(|| {
            DeliveryError::Content(format!("contact {} is gone", recipient.contact_id))
        })?;

        let segment = match recipient.segment_id {
            Some(segment_id) => self.store.segment(segment_id)?,
            None => None,
        };
        let (subject_template, body_template) = match &segment {
            Some(segment) => (
                segment.effective_subject(&campaign),
                segment.effective_body(&campaign),
            ),
            None => (campaign.subject.as_str(), campaign.body_html.as_str()),
        };

        let vars = TemplateVars::from_contact(&contact);
        let subject = render(subject_template, &vars);
        let body = render(body_template, &vars);
        let body = rewrite_links(&body, campaign.id, contact.id, self.signer, self.public_url);
        let body = inject_pixel(&body, campaign.id, contact.id, self.signer, self.public_url);

        self.transport.send(&OutboundEmail {
            to_email: contact.email.clone(),
            to_name: contact.display_name(),
            subject,
            body_html: body,
        })
    }
}
