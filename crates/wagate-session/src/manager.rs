//! Session registry — one running WhatsApp bot per linked phone number.

use crate::handle::{Registry, SessionHandle};
use crate::webhook::WebhookDispatcher;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use wagate_core::config::Config;
use wagate_core::error::GatewayError;
use wagate_core::message::LinkState;
use wagate_core::traits::{PairingTicket, SessionPort};

/// Owns all per-number sessions and the shared webhook dispatcher.
///
/// Sessions are created lazily: the first `/auth` or `/sendMessage` for a
/// number builds its bot. Status queries never create sessions.
pub struct SessionManager {
    config: Config,
    sessions: Arc<Registry>,
    dispatcher: WebhookDispatcher,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        let dispatcher = WebhookDispatcher::new(config.webhook.timeout_secs);
        Self {
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            dispatcher,
        }
    }

    /// Get the running session for `number`, building one if needed.
    ///
    /// The registry lock is held across bot startup so two concurrent
    /// requests for the same number cannot race two bots into existence.
    async fn session(&self, number: &str) -> Result<Arc<SessionHandle>, GatewayError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(number) {
            return Ok(handle.clone());
        }

        info!("starting session for {number}");
        let handle = Arc::new(SessionHandle::new(
            number.to_string(),
            self.config.gateway.data_dir.clone(),
            self.config.whatsapp.device_name.clone(),
            self.config.whatsapp.allowed_numbers.clone(),
            self.dispatcher.clone(),
            Arc::downgrade(&self.sessions),
        ));
        handle.clone().run().await?;
        sessions.insert(number.to_string(), handle.clone());
        Ok(handle)
    }

    async fn lookup(&self, number: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().await.get(number).cloned()
    }
}

#[async_trait]
impl SessionPort for SessionManager {
    async fn begin_auth(&self, number: &str) -> Result<PairingTicket, GatewayError> {
        let handle = self.session(number).await?;
        if handle.is_connected().await {
            return Ok(PairingTicket {
                already_linked: true,
                qr_rx: None,
            });
        }
        handle.mark_pairing().await;
        let rx = handle.qr_channel().await;
        Ok(PairingTicket {
            already_linked: false,
            qr_rx: Some(rx),
        })
    }

    async fn link_status(&self, number: &str) -> Option<LinkState> {
        match self.lookup(number).await {
            Some(handle) => Some(handle.state().await),
            None => None,
        }
    }

    async fn send_text(&self, from: &str, to: &str, text: &str) -> Result<(), GatewayError> {
        let handle = self.session(from).await?;
        handle.send_text(to, text).await
    }

    async fn set_webhook(&self, number: &str, url: &str) -> Result<(), GatewayError> {
        self.dispatcher.register(number, url).await
    }

    async fn logout(&self, number: &str) -> Result<(), GatewayError> {
        let handle = self.sessions.lock().await.remove(number);
        if let Some(handle) = handle {
            info!("logging out {number}");
            handle.shutdown().await;
        }
        // Idempotent: purging an absent session is a no-op.
        crate::store::purge_session_dir(&self.config.gateway.data_dir, number)?;
        self.dispatcher.remove(number).await;
        Ok(())
    }

    async fn snapshot(&self) -> Vec<(String, LinkState)> {
        let sessions = self.sessions.lock().await;
        let mut out = Vec::with_capacity(sessions.len());
        for (number, handle) in sessions.iter() {
            out.push((number.clone(), handle.state().await));
        }
        out
    }
}
