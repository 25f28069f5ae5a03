//! Inbound message handling — filtering, unwrapping, and webhook fan-out.

use crate::webhook::WebhookDispatcher;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;
use wagate_core::message::{InboundMessage, WebhookEvent};

/// Decide whether an inbound message should be forwarded at all.
///
/// Drops group traffic, our own echoes (consuming the sent-id), and senders
/// outside the allow list. An empty allow list admits everyone.
pub(crate) async fn accept_inbound(
    number: &str,
    is_group: bool,
    is_from_me: bool,
    msg_id: &str,
    sender: &str,
    allowed: &[String],
    sent_ids: &Arc<Mutex<HashSet<String>>>,
) -> bool {
    if is_group {
        debug!("ignoring group message on {number}");
        return false;
    }

    if is_from_me && sent_ids.lock().await.remove(msg_id) {
        debug!("skipping own echo: {msg_id}");
        return false;
    }

    if !allowed.is_empty() && !allowed.iter().any(|a| a == sender) {
        warn!("ignoring message from unauthorized {sender} on {number}");
        return false;
    }

    true
}

/// Unwrap nested wrappers (device_sent, ephemeral, view_once) down to the
/// payload-carrying message.
pub(crate) fn unwrap_payload(msg: &waproto::whatsapp::Message) -> &waproto::whatsapp::Message {
    msg.device_sent_message
        .as_ref()
        .and_then(|d| d.message.as_deref())
        .or_else(|| {
            msg.ephemeral_message
                .as_ref()
                .and_then(|e| e.message.as_deref())
        })
        .or_else(|| {
            msg.view_once_message
                .as_ref()
                .and_then(|v| v.message.as_deref())
        })
        .unwrap_or(msg)
}

/// Pull the text body out of a message. Media and other non-text payloads
/// yield `None` and are not forwarded.
pub(crate) fn extract_text(msg: &waproto::whatsapp::Message) -> Option<String> {
    let inner = unwrap_payload(msg);
    let text = inner.conversation.as_deref().or_else(|| {
        inner
            .extended_text_message
            .as_ref()
            .and_then(|e| e.text.as_deref())
    })?;
    if text.is_empty() {
        return None;
    }
    Some(text.to_string())
}

/// Process one inbound WhatsApp message event for a number and forward the
/// text to the number's webhook.
pub(crate) async fn handle_inbound(
    msg: waproto::whatsapp::Message,
    info: wacore::types::message::MessageInfo,
    number: &str,
    allowed: &[String],
    sent_ids: &Arc<Mutex<HashSet<String>>>,
    dispatcher: &WebhookDispatcher,
) {
    let sender = info.source.sender.user.clone();

    if !accept_inbound(
        number,
        info.source.is_group,
        info.source.is_from_me,
        &info.id,
        &sender,
        allowed,
        sent_ids,
    )
    .await
    {
        return;
    }

    let Some(text) = extract_text(&msg) else {
        debug!("skipping non-text inbound from {sender} on {number}");
        return;
    };

    let sender_name = if info.push_name.is_empty() {
        None
    } else {
        Some(info.push_name.clone())
    };

    let inbound = InboundMessage {
        id: Uuid::new_v4(),
        sender,
        sender_name,
        chat: info.source.chat.to_string(),
        text,
        timestamp: chrono::Utc::now(),
    };

    dispatcher.dispatch(number, WebhookEvent::Message(inbound));
}
