use super::{DeliveryError, OutboundEmail, Transport};
use crate::config::SmtpConfig;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport as _};
use uuid::Uuid;

/// SMTP relay transport. Message ids are generated locally and stamped on
/// the outgoing message so delivery notifications can be correlated later.
pub struct SmtpMailer {
    mailer: SmtpTransport,
    from: Mailbox,
    message_id_domain: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let credentials = Credentials::new(config.username.clone(), config.password.clone());
        let mailer = SmtpTransport::relay(&config.server)
            .map_err(|e| DeliveryError::Transport(format!("smtp relay setup failed: {e}")))?
            .port(config.port)
            .credentials(credentials)
            .build();

        let from_addr = if config.from_name.is_empty() {
            config.from_email.clone()
        } else {
            format!("{} <{}>", config.from_name, config.from_email)
        };
        let from = from_addr
            .parse()
            .map_err(|e| DeliveryError::Transport(format!("invalid from address: {e}")))?;

        let message_id_domain = config
            .from_email
            .split_once('@')
            .map(|(_, domain)| domain.to_string())
            .unwrap_or_else(|| "localhost".to_string());

        Ok(Self {
            mailer,
            from,
            message_id_domain,
        })
    }
}

impl Transport for SmtpMailer {
    fn send(&self, email: &OutboundEmail) -> Result<String, DeliveryError> {
        let to_addr = match &email.to_name {
            Some(name) => format!("{} <{}>", name, email.to_email),
            None => email.to_email.clone(),
        };
        let to: Mailbox = to_addr
            .parse()
            .map_err(|e| DeliveryError::Transport(format!("invalid recipient address: {e}")))?;

        let message_id = format!("<{}@{}>", Uuid::new_v4(), self.message_id_domain);

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .message_id(Some(message_id.clone()))
            .header(ContentType::TEXT_HTML)
            .body(email.body_html.clone())
            .map_err(|e| DeliveryError::Transport(format!("failed to build message: {e}")))?;

        match self.mailer.send(&message) {
            Ok(_) => Ok(message_id),
            // 4xx responses are throttling/greylisting; surface them as the
            // typed rate-limit variant so the queue's backoff owns the retry.
            Err(e) if e.is_transient() => Err(DeliveryError::RateLimited(e.to_string())),
            Err(e) => Err(DeliveryError::Transport(e.to_string())),
        }
    }
}
