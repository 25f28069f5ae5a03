//! Outbound send utilities — JID resolution, chunking, and retry logic.

use tracing::{error, warn};
use wacore_binary::jid::Jid;
use wagate_core::error::GatewayError;
use whatsapp_rust::client::Client;

/// WhatsApp text message character limit per send.
pub(crate) const MAX_TEXT_LEN: usize = 4096;

/// Retry delays for send attempts: 500ms, 1s, 2s.
pub(crate) const RETRY_DELAYS_MS: [u64; 3] = [500, 1000, 2000];

/// Resolve a bare phone number or a full JID string to a `Jid`.
///
/// Bare numbers get the personal-chat server suffix, matching what callers
/// of `/sendMessage` pass.
pub(crate) fn resolve_jid(target: &str) -> Result<Jid, GatewayError> {
    let jid_str = if target.contains('@') {
        target.to_string()
    } else {
        format!("{target}@s.whatsapp.net")
    };
    jid_str
        .parse()
        .map_err(|e| GatewayError::Session(format!("invalid JID '{jid_str}': {e}")))
}

/// Send one message with up to three attempts and fixed delays between them.
pub(crate) async fn retry_send(
    client: &Client,
    jid: &Jid,
    msg: waproto::whatsapp::Message,
) -> Result<String, GatewayError> {
    let mut last_err = None;

    for (attempt, delay_ms) in RETRY_DELAYS_MS.iter().enumerate() {
        match client.send_message(jid.clone(), msg.clone()).await {
            Ok(msg_id) => return Ok(msg_id),
            Err(e) => {
                let attempt_num = attempt + 1;
                if attempt_num < RETRY_DELAYS_MS.len() {
                    warn!(
                        "send attempt {attempt_num}/{} failed: {e}, retrying in {delay_ms}ms",
                        RETRY_DELAYS_MS.len()
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
                } else {
                    error!(
                        "send attempt {attempt_num}/{} failed: {e}, giving up",
                        RETRY_DELAYS_MS.len()
                    );
                }
                last_err = Some(e);
            }
        }
    }

    Err(GatewayError::Session(format!(
        "send failed after {} attempts: {}",
        RETRY_DELAYS_MS.len(),
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Split a long message into chunks under `max_len` bytes.
///
/// Boundaries stay on UTF-8 char boundaries, preferring a newline split when
/// one exists inside the window.
pub(crate) fn split_message(text: &str, max_len: usize) -> Vec<&str> {
    if text.len() <= max_len {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let break_at = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .map(|i| start + i + 1)
                .unwrap_or(end)
        } else {
            end
        };
        chunks.push(&text[start..break_at]);
        start = break_at;
    }

    chunks
}
