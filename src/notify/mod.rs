//! Outbound visitor notifications

pub mod dispatcher;
pub mod message;
pub mod webhook;

pub use dispatcher::{DispatcherOptions, NotificationDispatcher, StatsSnapshot};
pub use message::format_message;
pub use webhook::{Notifier, WebhookNotifier};
