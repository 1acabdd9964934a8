//! Taleem Transport - best-effort push delivery for the messaging core
//!
//! One `PushChannel` owns one bidirectional push connection: a long-lived
//! notification channel per user session, plus a conversation channel opened
//! on demand per open thread. Channels degrade gracefully: a failed open or
//! a dropped link is never surfaced as an error, because the durable REST
//! path remains available independently.

mod channel;
mod connector;
mod dispatcher;
mod error;
mod frames;

pub use channel::{ChannelScope, ConnectionState, PushChannel};
pub use connector::{ChannelLink, Connector, WsConnector};
pub use dispatcher::Dispatcher;
pub use error::TransportError;
pub use frames::{ChatMessageFrame, InboundFrame, NotificationEventFrame, OutboundFrame};
