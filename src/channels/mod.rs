//! Outbound transports and the inbound gateway.
//!
//! Transports are pluggable behind [`traits::StatefulTransport`] and
//! [`traits::StatelessTransport`]; the orchestrator owns routing between them
//! and every call goes through its dependency guards.

pub mod bot;
pub mod gateway;
pub mod sessions;
pub mod traits;
pub mod webhook;

pub use bot::BotTransport;
pub use gateway::{router, run_gateway};
pub use sessions::{ConversationReference, SessionRegistry};
pub use traits::{StatefulTransport, StatelessTransport, TransportError};
pub use webhook::WebhookTransport;
