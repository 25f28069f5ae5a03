//! HTTP API — the gateway's public surface.
//!
//! Four core endpoints (`/auth`, `/checkAuth`, `/sendMessage`, `/setWebhook`)
//! plus `/logout` and `/health`. Handlers talk to the session layer only
//! through the `SessionPort` trait so tests can swap in a mock.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use wagate_core::error::GatewayError;
use wagate_core::traits::SessionPort;
use wagate_session::qr::{generate_qr_image, generate_qr_terminal};

/// How long `/auth` waits for the first QR code before giving up.
const QR_WAIT_SECS: u64 = 30;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    port: Arc<dyn SessionPort>,
    api_key: Option<String>,
    uptime: Instant,
}

#[derive(Debug, Deserialize)]
struct NumberRequest {
    number: String,
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    from: String,
    to: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WebhookRequest {
    number: String,
    url: String,
}

/// Constant-time string comparison to prevent timing attacks on API token validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check bearer token auth. Returns `None` if authorized, `Some(response)` if rejected.
fn check_auth(headers: &HeaderMap, api_key: &Option<String>) -> Option<(StatusCode, Json<Value>)> {
    let key = match api_key {
        Some(k) => k,
        None => return None, // No auth configured — allow all.
    };

    let header = match headers.get("authorization") {
        Some(h) => h,
        None => {
            return Some((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "missing Authorization header"})),
            ));
        }
    };

    let value = match header.to_str() {
        Ok(v) => v,
        Err(_) => {
            return Some((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid Authorization header"})),
            ));
        }
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if constant_time_eq(token, key) => None, // Authorized.
        _ => Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid token"})),
        )),
    }
}

/// A gateway number is a bare phone number. Rejecting anything else here
/// keeps separators and `..` out of the per-number session paths.
fn require_number(number: &str) -> Result<(), (StatusCode, Json<Value>)> {
    if number.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "number is required"})),
        ));
    }
    if !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "number must contain only digits"})),
        ));
    }
    Ok(())
}

/// `POST /auth` — Start (or join) pairing for a number, return QR as base64 PNG.
async fn auth(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Json(req): Json<NumberRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    require_number(&req.number)?;

    let ticket = state.port.begin_auth(&req.number).await.map_err(|e| {
        error!("auth failed for {}: {e}", req.number);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("auth failed: {e}")})),
        )
    })?;

    if ticket.already_linked {
        return Ok(Json(json!({
            "status": "already_linked",
            "number": req.number,
        })));
    }

    let mut qr_rx = ticket.qr_rx.ok_or((
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "QR channel unavailable"})),
    ))?;

    // Wait up to 30s for the first QR code.
    let qr_data = tokio::time::timeout(std::time::Duration::from_secs(QR_WAIT_SECS), qr_rx.recv())
        .await
        .map_err(|_| {
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({"error": "timed out waiting for QR code"})),
            )
        })?
        .ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "QR channel closed unexpectedly"})),
        ))?;

    // Also render to the server log so a terminal-only operator can scan.
    match generate_qr_terminal(&qr_data) {
        Ok(term) => info!("QR for {} (scan from linked devices):\n{term}", req.number),
        Err(e) => warn!("terminal QR rendering failed: {e}"),
    }

    let png_bytes = generate_qr_image(&qr_data).map_err(|e| {
        error!("QR image generation failed: {e}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("QR generation failed: {e}")})),
        )
    })?;

    Ok(Json(json!({
        "status": "qr_ready",
        "number": req.number,
        "qr": qr_data,
        "qr_png_base64": BASE64.encode(&png_bytes),
    })))
}

/// `POST /checkAuth` — Report a number's link state without creating a client.
async fn check_auth_endpoint(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Json(req): Json<NumberRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    require_number(&req.number)?;

    let response = match state.port.link_status(&req.number).await {
        Some(link) => json!({
            "connected": link.is_connected(),
            "state": link.as_str(),
            "number": req.number,
        }),
        None => json!({
            "connected": false,
            "state": "unlinked",
            "number": req.number,
        }),
    };

    Ok(Json(response))
}

/// `POST /sendMessage` — Send a text message from one linked number to a target.
async fn send_message(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    require_number(&req.from)?;
    if req.to.trim().is_empty() || req.message.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "to and message are required"})),
        ));
    }

    state
        .port
        .send_text(&req.from, &req.to, &req.message)
        .await
        .map_err(|e| {
            error!("send from {} to {} failed: {e}", req.from, req.to);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": format!("delivery failed: {e}")})),
            )
        })?;

    Ok(Json(json!({"status": "sent"})))
}

/// `POST /setWebhook` — Register the webhook URL that receives a number's events.
async fn set_webhook(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Json(req): Json<WebhookRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    require_number(&req.number)?;

    state
        .port
        .set_webhook(&req.number, &req.url)
        .await
        .map_err(|e| match e {
            GatewayError::Webhook(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({"error": msg})))
            }
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": other.to_string()})),
            ),
        })?;

    info!("webhook registered for {}", req.number);
    Ok(Json(json!({"status": "webhook_set"})))
}

/// `POST /logout` — Drop a number's client and purge its session. Idempotent.
async fn logout(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Json(req): Json<NumberRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    require_number(&req.number)?;

    state.port.logout(&req.number).await.map_err(|e| {
        error!("logout failed for {}: {e}", req.number);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("logout failed: {e}")})),
        )
    })?;

    Ok(Json(json!({"status": "logged_out"})))
}

/// `GET /health` — Uptime and a per-number link state summary.
async fn health(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let mut sessions = serde_json::Map::new();
    for (number, link) in state.port.snapshot().await {
        sessions.insert(number, Value::String(link.as_str().to_string()));
    }

    Ok(Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime.elapsed().as_secs(),
        "sessions": sessions,
    })))
}

/// Build the axum router with shared state.
fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/auth", post(auth))
        .route("/checkAuth", post(check_auth_endpoint))
        .route("/sendMessage", post(send_message))
        .route("/setWebhook", post(set_webhook))
        .route("/logout", post(logout))
        .route("/health", get(health))
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state)
}

/// Start the API server. Called from `main` after the session manager is up.
pub async fn serve(
    host: &str,
    port: u16,
    api_key: &str,
    session_port: Arc<dyn SessionPort>,
) -> anyhow::Result<()> {
    let api_key = if api_key.is_empty() {
        None
    } else {
        Some(api_key.to_string())
    };

    let state = ApiState {
        port: session_port,
        api_key,
        uptime: Instant::now(),
    };

    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use wagate_core::message::LinkState;
    use wagate_core::traits::PairingTicket;

    // -----------------------------------------------------------------------
    // Mock session port
    // -----------------------------------------------------------------------

    /// Records calls and returns canned answers for each operation.
    struct MockPort {
        linked: Vec<(String, LinkState)>,
        qr: Option<String>,
        /// When true, `send_text` returns an error (simulates delivery failure).
        fail_send: bool,
        sent: Mutex<Vec<(String, String, String)>>,
        webhooks: Mutex<Vec<(String, String)>>,
        logouts: Mutex<Vec<String>>,
    }

    impl MockPort {
        fn new() -> Self {
            Self {
                linked: Vec::new(),
                qr: None,
                fail_send: false,
                sent: Mutex::new(Vec::new()),
                webhooks: Mutex::new(Vec::new()),
                logouts: Mutex::new(Vec::new()),
            }
        }

        fn with_linked(mut self, number: &str, state: LinkState) -> Self {
            self.linked.push((number.to_string(), state));
            self
        }

        fn with_qr(mut self, qr: &str) -> Self {
            self.qr = Some(qr.to_string());
            self
        }

        fn failing_send(mut self) -> Self {
            self.fail_send = true;
            self
        }
    }

    #[async_trait]
    impl SessionPort for MockPort {
        async fn begin_auth(&self, number: &str) -> Result<PairingTicket, GatewayError> {
            if self
                .linked
                .iter()
                .any(|(n, s)| n == number && s.is_connected())
            {
                return Ok(PairingTicket {
                    already_linked: true,
                    qr_rx: None,
                });
            }
            let (tx, rx) = mpsc::channel(1);
            if let Some(qr) = &self.qr {
                let _ = tx.send(qr.clone()).await;
            }
            // Sender dropped here; an empty mock QR stream closes immediately.
            Ok(PairingTicket {
                already_linked: false,
                qr_rx: Some(rx),
            })
        }

        async fn link_status(&self, number: &str) -> Option<LinkState> {
            self.linked
                .iter()
                .find(|(n, _)| n == number)
                .map(|(_, s)| *s)
        }

        async fn send_text(&self, from: &str, to: &str, text: &str) -> Result<(), GatewayError> {
            if self.fail_send {
                return Err(GatewayError::Session("connection reset".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((from.to_string(), to.to_string(), text.to_string()));
            Ok(())
        }

        async fn set_webhook(&self, number: &str, url: &str) -> Result<(), GatewayError> {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(GatewayError::Webhook(format!(
                    "unsupported URL scheme in '{url}'"
                )));
            }
            self.webhooks
                .lock()
                .unwrap()
                .push((number.to_string(), url.to_string()));
            Ok(())
        }

        async fn logout(&self, number: &str) -> Result<(), GatewayError> {
            self.logouts.lock().unwrap().push(number.to_string());
            Ok(())
        }

        async fn snapshot(&self) -> Vec<(String, LinkState)> {
            self.linked.clone()
        }
    }

    // -----------------------------------------------------------------------
    // Test helpers
    // -----------------------------------------------------------------------

    fn test_router_with(port: MockPort, api_key: Option<String>) -> Router {
        let state = ApiState {
            port: Arc::new(port),
            api_key,
            uptime: Instant::now(),
        };
        build_router(state)
    }

    fn post_json(path: &str, body: &str) -> Request<Body> {
        Request::post(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Parse response body as JSON.
    async fn body_json(resp: axum::http::Response<Body>) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_health_no_auth() {
        let port = MockPort::new().with_linked("5511999887766", LinkState::Connected);
        let app = test_router_with(port, None);
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["sessions"]["5511999887766"], "connected");
    }

    #[tokio::test]
    async fn test_health_valid_auth() {
        let app = test_router_with(MockPort::new(), Some("secret".to_string()));
        let req = Request::get("/health")
            .header("Authorization", "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_bad_auth() {
        let app = test_router_with(MockPort::new(), Some("secret".to_string()));
        let req = Request::get("/health")
            .header("Authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_already_linked() {
        let port = MockPort::new().with_linked("5511999887766", LinkState::Connected);
        let app = test_router_with(port, None);
        let resp = app
            .oneshot(post_json("/auth", r#"{"number":"5511999887766"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "already_linked");
    }

    #[tokio::test]
    async fn test_auth_returns_qr() {
        let port = MockPort::new().with_qr("2@abc,def,ghi");
        let app = test_router_with(port, None);
        let resp = app
            .oneshot(post_json("/auth", r#"{"number":"5511999887766"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "qr_ready");
        assert_eq!(json["qr"], "2@abc,def,ghi");
        // PNG magic bytes survive the base64 round trip.
        let png = BASE64
            .decode(json["qr_png_base64"].as_str().unwrap())
            .unwrap();
        assert_eq!(&png[..4], &[0x89, 0x50, 0x4E, 0x47]);
    }

    #[tokio::test]
    async fn test_auth_empty_number() {
        let app = test_router_with(MockPort::new(), None);
        let resp = app
            .oneshot(post_json("/auth", r#"{"number":""}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_check_auth_unknown_number() {
        let app = test_router_with(MockPort::new(), None);
        let resp = app
            .oneshot(post_json("/checkAuth", r#"{"number":"000"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["connected"], false);
        assert_eq!(json["state"], "unlinked");
    }

    #[tokio::test]
    async fn test_check_auth_connected() {
        let port = MockPort::new().with_linked("5511999887766", LinkState::Connected);
        let app = test_router_with(port, None);
        let resp = app
            .oneshot(post_json("/checkAuth", r#"{"number":"5511999887766"}"#))
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["connected"], true);
        assert_eq!(json["state"], "connected");
    }

    #[tokio::test]
    async fn test_send_message_ok() {
        let app = test_router_with(MockPort::new(), None);
        let resp = app
            .oneshot(post_json(
                "/sendMessage",
                r#"{"from":"5511999887766","to":"5521888776655","message":"hello"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "sent");
    }

    #[tokio::test]
    async fn test_send_message_delivery_failure() {
        let app = test_router_with(MockPort::new().failing_send(), None);
        let resp = app
            .oneshot(post_json(
                "/sendMessage",
                r#"{"from":"5511999887766","to":"5521888776655","message":"hello"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("delivery failed"));
    }

    #[tokio::test]
    async fn test_send_message_missing_fields() {
        let app = test_router_with(MockPort::new(), None);
        let resp = app
            .oneshot(post_json(
                "/sendMessage",
                r#"{"from":"5511999887766","to":"","message":"hello"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_set_webhook_ok() {
        let app = test_router_with(MockPort::new(), None);
        let resp = app
            .oneshot(post_json(
                "/setWebhook",
                r#"{"number":"5511999887766","url":"https://example.com/hook"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "webhook_set");
    }

    #[tokio::test]
    async fn test_set_webhook_rejects_bad_scheme() {
        let app = test_router_with(MockPort::new(), None);
        let resp = app
            .oneshot(post_json(
                "/setWebhook",
                r#"{"number":"5511999887766","url":"ftp://example.com/hook"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_number_with_path_components_rejected() {
        // A number is a bare phone number; separators must never reach the
        // session paths (logout would otherwise purge outside the data dir).
        let app = test_router_with(MockPort::new(), None);
        for body in [
            r#"{"number":"../.."}"#,
            r#"{"number":"5511/9998"}"#,
            r#"{"number":"5511999887766@s.whatsapp.net"}"#,
        ] {
            let resp = app.clone().oneshot(post_json("/logout", body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }

        // Same guard on the client-creating endpoints.
        let resp = app
            .clone()
            .oneshot(post_json("/auth", r#"{"number":"../.."}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = app
            .oneshot(post_json(
                "/sendMessage",
                r#"{"from":"../..","to":"5521888776655","message":"hi"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_logout_idempotent() {
        let app = test_router_with(MockPort::new(), None);
        let resp = app
            .clone()
            .oneshot(post_json("/logout", r#"{"number":"5511999887766"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "logged_out");

        // Logging out again succeeds too.
        let resp = app
            .oneshot(post_json("/logout", r#"{"number":"5511999887766"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
