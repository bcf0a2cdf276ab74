//! Notification Dispatcher (§4.8): channels, templates, cooldown and
//! retried delivery for ServerSentry events.

pub mod channel;
pub mod dispatcher;
mod smtp;
pub mod template;

pub use channel::{ChannelConfig, ChannelKind, SmtpConfig};
pub use dispatcher::{DispatchOutcome, NotificationDispatcher};
