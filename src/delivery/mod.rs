pub mod smtp;
pub mod template;

use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Transient throttling; the caller's backoff policy owns the retry.
    #[error("rate limited by transport: {0}")]
    RateLimited(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("content resolution failed: {0}")]
    Content(String),
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

impl DeliveryError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to_email: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub body_html: String,
}

/// Anything that can attempt one send and report a message id or failure.
pub trait Transport: Send + Sync {
    fn send(&self, email: &OutboundEmail) -> Result<String, DeliveryError>;
}

/// In-memory transport for tests and local runs: records every accepted
/// email and can be scripted with failures for the leading attempts.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundEmail>>,
    responses: Mutex<VecDeque<Result<String, DeliveryError>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses for the next sends; once exhausted, sends succeed.
    pub fn with_responses(responses: Vec<Result<String, DeliveryError>>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into()),
        }
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last_sent(&self) -> Option<OutboundEmail> {
        self.sent.lock().unwrap().last().cloned()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, email: &OutboundEmail) -> Result<String, DeliveryError> {
        if let Some(scripted) = self.responses.lock().unwrap().pop_front() {
            return scripted.map(|id| {
                self.sent.lock().unwrap().push(email.clone());
                id
            });
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(format!("<{}@recording.local>", Uuid::new_v4()))
    }
}
