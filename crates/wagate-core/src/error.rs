use thiserror::Error;

/// Top-level error type for the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Error from the wrapped WhatsApp client or its lifecycle.
    #[error("session error: {0}")]
    Session(String),

    /// Session persistence error.
    #[error("store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Webhook registration or delivery error.
    #[error("webhook error: {0}")]
    Webhook(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
