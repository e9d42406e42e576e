//! Best-effort delivery of human-readable lifecycle messages.
//!
//! A failed send is reported as `false` and never turned into an error: the
//! ledger mutation a message describes is already committed by the time the
//! message is sent.

use async_trait::async_trait;
use tracing::warn;

pub mod messages;
pub mod telegram;

pub use telegram::TelegramNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text`, retrying internally a bounded number of times.
    async fn send(&self, text: &str) -> bool;

    fn name(&self) -> &str;
}

/// Fallback sink used when no delivery channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> bool {
        warn!("No notification channel configured. Message not sent: {}", text);
        false
    }

    fn name(&self) -> &str {
        "log"
    }
}
