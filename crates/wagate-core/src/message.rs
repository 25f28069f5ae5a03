use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authentication state of a per-number client, tracked from the wrapped
/// library's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Client exists but holds no valid session yet — QR scan pending.
    WaitingForQr,
    /// Session is valid and the transport is up.
    Connected,
    /// Transport dropped; a rebuild may be in flight.
    Disconnected,
    /// Session was invalidated from the phone side.
    LoggedOut,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForQr => "waiting_for_qr",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::LoggedOut => "logged_out",
        }
    }
}

/// An inbound message received on a linked number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: Uuid,
    /// Sender phone number.
    pub sender: String,
    /// Sender push name, when the platform provides one.
    pub sender_name: Option<String>,
    /// Chat JID, usable as a `to` target for replies.
    pub chat: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Body POSTed to a number's registered webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// The gateway number the event belongs to.
    pub number: String,
    #[serde(flatten)]
    pub event: WebhookEvent,
}

/// Events forwarded to webhooks: inbound messages and link-state transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WebhookEvent {
    Message(InboundMessage),
    Connected,
    Disconnected,
    LoggedOut,
}
