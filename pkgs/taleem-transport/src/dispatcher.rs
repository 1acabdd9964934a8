//! Typed routing of inbound frames to registered consumers
//!
//! One faulty consumer must never break delivery to the rest or take the
//! channel's receive loop down with it, so every handler failure is caught
//! and logged at this boundary.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{error, warn};

use crate::frames::{ChatMessageFrame, InboundFrame, NotificationEventFrame};

type ChatHandler = dyn Fn(&ChatMessageFrame) -> Result<()> + Send + Sync;
type NotificationHandler = dyn Fn(&NotificationEventFrame) -> Result<()> + Send + Sync;

/// Routes frames to per-category consumer lists, in registration order
#[derive(Default)]
pub struct Dispatcher {
    chat_handlers: Mutex<Vec<Arc<ChatHandler>>>,
    notification_handlers: Mutex<Vec<Arc<NotificationHandler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_chat_message(
        &self,
        handler: impl Fn(&ChatMessageFrame) -> Result<()> + Send + Sync + 'static,
    ) {
        self.chat_handlers.lock().push(Arc::new(handler));
    }

    pub fn on_notification(
        &self,
        handler: impl Fn(&NotificationEventFrame) -> Result<()> + Send + Sync + 'static,
    ) {
        self.notification_handlers.lock().push(Arc::new(handler));
    }

    /// Parse a raw frame and route it. Frames with an unknown `type`
    /// discriminator are dropped with a warning, never fatal.
    pub fn dispatch_raw(&self, raw: &str) {
        match serde_json::from_str::<InboundFrame>(raw) {
            Ok(frame) => self.dispatch(&frame),
            Err(e) => warn!("Dropping unroutable push frame: {}", e),
        }
    }

    /// Route a frame to every consumer of its category. A failing consumer is
    /// logged and the remaining consumers still run.
    pub fn dispatch(&self, frame: &InboundFrame) {
        match frame {
            InboundFrame::ChatMessage(msg) => {
                let handlers: Vec<_> = self.chat_handlers.lock().iter().cloned().collect();
                for handler in handlers {
                    if let Err(e) = handler(msg) {
                        error!("Chat consumer failed: {:#}", e);
                    }
                }
            }
            InboundFrame::NotificationEvent(event) => {
                let handlers: Vec<_> = self.notification_handlers.lock().iter().cloned().collect();
                for handler in handlers {
                    if let Err(e) = handler(event) {
                        error!("Notification consumer failed: {:#}", e);
                    }
                }
            }
        }
    }
}
