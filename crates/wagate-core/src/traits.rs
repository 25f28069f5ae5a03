use crate::error::GatewayError;
use crate::message::LinkState;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Outcome of starting (or joining) a pairing flow for one number.
pub struct PairingTicket {
    /// Set when the number already holds a connected client.
    pub already_linked: bool,
    /// QR data strings, re-emitted as the platform rotates codes.
    /// Absent when already linked. The last generated QR is replayed
    /// immediately so a poll that raced the event stream still sees it.
    pub qr_rx: Option<mpsc::Receiver<String>>,
}

/// Seam between the HTTP surface and the client lifecycle manager.
///
/// The manager owns one client per phone number; every operation here is
/// keyed by that number.
#[async_trait]
pub trait SessionPort: Send + Sync {
    /// Get or create the client for `number` and expose its pairing QR stream.
    async fn begin_auth(&self, number: &str) -> Result<PairingTicket, GatewayError>;

    /// Report the link state for `number`, or `None` for an unknown number.
    /// Never creates a client.
    async fn link_status(&self, number: &str) -> Option<LinkState>;

    /// Send a text message from `from` to `to`, creating the `from` client
    /// on demand.
    async fn send_text(&self, from: &str, to: &str, text: &str) -> Result<(), GatewayError>;

    /// Register the webhook URL that receives inbound events for `number`.
    async fn set_webhook(&self, number: &str, url: &str) -> Result<(), GatewayError>;

    /// Drop the client for `number` and purge its persisted session. Idempotent.
    async fn logout(&self, number: &str) -> Result<(), GatewayError>;

    /// Snapshot of all known numbers and their link states.
    async fn snapshot(&self) -> Vec<(String, LinkState)>;
}
