//! Per-number session lifecycle — building, running, and rebuilding one bot.

use crate::events::handle_inbound;
use crate::send::{resolve_jid, retry_send, split_message, MAX_TEXT_LEN};
use crate::store::{purge_session_dir, session_db_path, SqliteSessionStore};
use crate::webhook::WebhookDispatcher;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use wacore::types::events::Event;
use wagate_core::error::GatewayError;
use wagate_core::message::{LinkState, WebhookEvent};
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

pub(crate) type Registry = Mutex<HashMap<String, Arc<SessionHandle>>>;

/// One linked (or linking) WhatsApp account, keyed by phone number.
///
/// Owns the bot for that number and rebuilds it when the connection drops.
/// The handle outlives individual bot instances: the event handler updates
/// the same `Arc`-wrapped fields regardless of which bot is running.
pub(crate) struct SessionHandle {
    pub(crate) number: String,
    data_dir: String,
    device_name: String,
    allowed_numbers: Vec<String>,
    client: Arc<Mutex<Option<Arc<Client>>>>,
    state: Arc<Mutex<LinkState>>,
    /// Latest QR code, buffered so a late `/auth` poll can replay it.
    last_qr: Arc<Mutex<Option<String>>>,
    qr_tx: Arc<Mutex<Option<mpsc::Sender<String>>>>,
    /// Message IDs we sent, used to suppress our own echoes.
    sent_ids: Arc<Mutex<HashSet<String>>>,
    dispatcher: WebhookDispatcher,
    registry: Weak<Registry>,
    /// Background task driving the current bot; aborted on shutdown.
    pub(crate) run_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Set on shutdown/logout; stops the disconnect handler from rebuilding.
    stopped: AtomicBool,
}

impl SessionHandle {
    pub(crate) fn new(
        number: String,
        data_dir: String,
        device_name: String,
        allowed_numbers: Vec<String>,
        dispatcher: WebhookDispatcher,
        registry: Weak<Registry>,
    ) -> Self {
        Self {
            number,
            data_dir,
            device_name,
            allowed_numbers,
            client: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(LinkState::Disconnected)),
            last_qr: Arc::new(Mutex::new(None)),
            qr_tx: Arc::new(Mutex::new(None)),
            sent_ids: Arc::new(Mutex::new(HashSet::new())),
            dispatcher,
            registry,
            run_task: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub(crate) async fn state(&self) -> LinkState {
        *self.state.lock().await
    }

    pub(crate) async fn is_connected(&self) -> bool {
        self.state().await.is_connected()
    }

    /// Install a QR listener, replaying the buffered code if one exists.
    pub(crate) async fn qr_channel(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(8);
        if let Some(code) = self.last_qr.lock().await.clone() {
            let _ = tx.send(code).await;
        }
        *self.qr_tx.lock().await = Some(tx);
        rx
    }

    /// Stop the handle: no more rebuilds, bot task aborted, client dropped.
    pub(crate) async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.run_task.lock().await.take() {
            task.abort();
        }
        *self.client.lock().await = None;
        *self.qr_tx.lock().await = None;
        *self.last_qr.lock().await = None;
        *self.state.lock().await = LinkState::LoggedOut;
    }

    /// Send a text message, chunking long bodies and retrying transient failures.
    pub(crate) async fn send_text(&self, to: &str, text: &str) -> Result<(), GatewayError> {
        let client = self
            .client
            .lock()
            .await
            .clone()
            .ok_or_else(|| GatewayError::Session(format!("{} is not connected", self.number)))?;

        let jid = resolve_jid(to)?;

        for chunk in split_message(text, MAX_TEXT_LEN) {
            let msg = waproto::whatsapp::Message {
                conversation: Some(chunk.to_string()),
                ..Default::default()
            };
            let msg_id = retry_send(&client, &jid, msg).await?;
            self.sent_ids.lock().await.insert(msg_id);
        }
        Ok(())
    }

    /// Build a bot for this number's session and run it in the background.
    ///
    /// The event handler holds only a `Weak` back-reference, so a logged-out
    /// handle that was dropped from the registry can actually be freed.
    pub(crate) async fn run(self: Arc<Self>) -> Result<(), GatewayError> {
        let db_path = session_db_path(&self.data_dir, &self.number)?;
        info!(
            "building WhatsApp bot for {} (session: {})",
            self.number,
            db_path.display()
        );

        let backend = Arc::new(
            SqliteSessionStore::new(&db_path)
                .await
                .map_err(|e| GatewayError::Store(format!("session store init failed: {e}")))?,
        );

        let weak = Arc::downgrade(&self);
        let mut bot = Bot::builder()
            .with_backend(backend)
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .with_os_info(Some(self.device_name.clone()), None)
            .on_event(move |event, client| {
                let weak = weak.clone();
                async move {
                    let Some(handle) = weak.upgrade() else {
                        return;
                    };
                    handle.on_event(event, client).await;
                }
            })
            .build()
            .await
            .map_err(|e| GatewayError::Session(format!("bot build failed: {e}")))?;

        // Store the client immediately so sends work on an already-linked
        // session before the Connected event arrives.
        *self.client.lock().await = Some(bot.client());

        let run_handle = bot
            .run()
            .await
            .map_err(|e| GatewayError::Session(format!("bot run failed: {e}")))?;

        // Replace (and kill) any task left over from a previous bot.
        if let Some(old) = self.run_task.lock().await.replace(run_handle) {
            old.abort();
        }

        info!("WhatsApp bot started for {}", self.number);
        Ok(())
    }

    /// Type-erased rebuild entry point. The event handler's reconnect spawn
    /// must go through this: calling `run` directly there would make `run`'s
    /// future contain its own opaque type and rustc rejects the cycle.
    pub(crate) fn run_boxed(
        self: Arc<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send>> {
        Box::pin(self.run())
    }

    async fn on_event(self: Arc<Self>, event: Event, client: Arc<Client>) {
        match event {
            Event::PairingQrCode { code, .. } => {
                info!("QR code generated for {} (scan to pair)", self.number);
                debug!("QR data: {code}");
                *self.last_qr.lock().await = Some(code.clone());
                if let Some(sender) = self.qr_tx.lock().await.as_ref() {
                    let _ = sender.send(code).await;
                }
            }
            Event::PairSuccess(_) => {
                info!("pairing successful for {}", self.number);
            }
            Event::Connected(_) => {
                info!("{} connected", self.number);
                *self.client.lock().await = Some(client);
                *self.state.lock().await = LinkState::Connected;
                // Session is valid; buffered QR is stale.
                *self.last_qr.lock().await = None;
                *self.qr_tx.lock().await = None;
                self.dispatcher.dispatch(&self.number, WebhookEvent::Connected);
            }
            Event::Disconnected(_) => {
                warn!("{} disconnected", self.number);
                *self.client.lock().await = None;
                {
                    let mut state = self.state.lock().await;
                    if *state == LinkState::LoggedOut {
                        return;
                    }
                    *state = LinkState::Disconnected;
                }
                self.dispatcher
                    .dispatch(&self.number, WebhookEvent::Disconnected);
                if !self.stopped.load(Ordering::SeqCst) {
                    let handle = self.clone();
                    tokio::spawn(async move {
                        let number = handle.number.clone();
                        info!("reconnecting {number}");
                        if let Err(e) = handle.run_boxed().await {
                            warn!("reconnect failed for {number}: {e}");
                        }
                    });
                }
            }
            Event::LoggedOut(_) => {
                warn!("{} logged out — session invalidated", self.number);
                self.shutdown().await;
                if let Some(registry) = self.registry.upgrade() {
                    registry.lock().await.remove(&self.number);
                }
                if let Err(e) = purge_session_dir(&self.data_dir, &self.number) {
                    warn!("failed to purge session for {}: {e}", self.number);
                }
                self.dispatcher
                    .dispatch(&self.number, WebhookEvent::LoggedOut);
            }
            Event::Message(msg, info) => {
                handle_inbound(
                    *msg,
                    info,
                    &self.number,
                    &self.allowed_numbers,
                    &self.sent_ids,
                    &self.dispatcher,
                )
                .await;
            }
            _ => {}
        }
    }

    /// Mark the handle as waiting for a QR scan. Called by `begin_auth`
    /// before the first QR event lands so status polls report correctly.
    pub(crate) async fn mark_pairing(&self) {
        let mut state = self.state.lock().await;
        if !state.is_connected() {
            *state = LinkState::WaitingForQr;
        }
    }
}
