use async_trait::async_trait;

use crate::error::FailureClass;
use crate::render::RenderedContent;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No conversation is known for the responsible party.
    #[error("no session for {0}")]
    NoSession(String),

    /// The channel answered with a non-success status.
    #[error("message rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// Network failure, timeout or credential fetch failure.
    #[error("transport unavailable: {0}")]
    Http(String),
}

impl TransportError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Http(_) => FailureClass::Transient,
            Self::Rejected { status, .. } if *status >= 500 || *status == 429 => {
                FailureClass::Transient
            }
            Self::Rejected { .. } | Self::NoSession(_) => FailureClass::MalformedInput,
        }
    }
}

/// Conversational channel that can reach an individual responsible party,
/// provided a session for them was captured earlier.
#[async_trait]
pub trait StatefulTransport: Send + Sync {
    fn has_session(&self, responsible: &str) -> bool;

    async fn send(&self, responsible: &str, content: &RenderedContent) -> Result<(), TransportError>;
}

/// Broadcast channel with no per-recipient addressing.
#[async_trait]
pub trait StatelessTransport: Send + Sync {
    async fn send(&self, content: &RenderedContent) -> Result<(), TransportError>;
}
