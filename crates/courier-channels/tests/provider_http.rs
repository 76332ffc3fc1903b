#![allow(missing_docs)]

//! Provider HTTP behaviour against a local mock API

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Form, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use courier_channels::{
    DeliverySettings, EmailAdapter, EmailConfig, InstagramAdapter, InstagramConfig, SmsAdapter,
    SmsConfig, WhatsAppAdapter, WhatsAppConfig,
};
use courier_core::utils::RetryConfig;
use courier_core::{ChannelAdapter, ErrorCode, MediaFile, OutgoingMessage, TemplateRef};
use serde_json::{json, Value};
use tokio::sync::Mutex;

#[derive(Clone)]
struct MockState {
    base: String,
    sends: Arc<Mutex<Vec<Value>>>,
    rate_limited_sends: Arc<Mutex<u32>>,
    template_fetches: Arc<Mutex<u32>>,
    profile_lookups: Arc<Mutex<u32>>,
    sms: Arc<Mutex<Vec<HashMap<String, String>>>>,
    mail: Arc<Mutex<Vec<Value>>>,
}

impl MockState {
    async fn send_count(&self) -> usize {
        self.sends.lock().await.len()
    }
}

async fn wa_send(State(state): State<MockState>, Json(payload): Json<Value>) -> Response {
    state.sends.lock().await.push(payload);
    let mut remaining = state.rate_limited_sends.lock().await;
    if *remaining > 0 {
        *remaining -= 1;
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "0")],
            Json(json!({"error": {"message": "rate limited", "code": 130429}})),
        )
            .into_response();
    }
    let n = state.sends.lock().await.len();
    (
        StatusCode::OK,
        Json(json!({"messaging_product": "whatsapp", "messages": [{"id": format!("wamid.{n}")}]})),
    )
        .into_response()
}

async fn wa_templates(State(state): State<MockState>) -> Json<Value> {
    *state.template_fetches.lock().await += 1;
    Json(json!({
        "data": [
            {"name": "order_update", "language": "en_US", "status": "APPROVED"},
            {"name": "promo", "language": "en_US", "status": "REJECTED"}
        ]
    }))
}

async fn wa_media_info(State(state): State<MockState>, Path(media_id): Path<String>) -> Response {
    if media_id != "MEDIA1" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"message": "unknown media"}})),
        )
            .into_response();
    }
    Json(json!({
        "url": format!("{}/files/{media_id}", state.base),
        "mime_type": "image/jpeg",
        "id": media_id
    }))
    .into_response()
}

async fn wa_media_file(headers: HeaderMap) -> Response {
    if headers.get(header::AUTHORIZATION).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ([(header::CONTENT_TYPE, "image/jpeg")], vec![0xff_u8, 0xd8, 0xff, 0xe0]).into_response()
}

async fn wa_media_upload(body: Bytes) -> Response {
    let text = String::from_utf8_lossy(&body);
    if !text.contains("messaging_product") || !text.contains("whatsapp") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    Json(json!({"id": "UPLOADED1"})).into_response()
}

async fn ig_profile(State(state): State<MockState>, Path(igsid): Path<String>) -> Response {
    *state.profile_lookups.lock().await += 1;
    if igsid != "777" {
        return (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response();
    }
    Json(json!({"username": "ana.store", "id": igsid})).into_response()
}

async fn sms_send(
    State(state): State<MockState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if headers.get(header::AUTHORIZATION).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let failing = form.get("To").map(String::as_str) == Some("+15550000500");
    state.sms.lock().await.push(form);
    if failing {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream down").into_response();
    }
    (StatusCode::CREATED, Json(json!({"sid": "SM123", "status": "queued"}))).into_response()
}

async fn mail_send(State(state): State<MockState>, Json(payload): Json<Value>) -> Response {
    state.mail.lock().await.push(payload);
    (StatusCode::ACCEPTED, [("x-message-id", "mail-1")]).into_response()
}

async fn spawn_mock_api(rate_limited_sends: u32) -> Result<Option<MockState>> {
    let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            eprintln!("skipping provider tests: local socket bind is not permitted");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    let addr = listener.local_addr()?;

    let state = MockState {
        base: format!("http://{addr}"),
        sends: Arc::new(Mutex::new(Vec::new())),
        rate_limited_sends: Arc::new(Mutex::new(rate_limited_sends)),
        template_fetches: Arc::new(Mutex::new(0)),
        profile_lookups: Arc::new(Mutex::new(0)),
        sms: Arc::new(Mutex::new(Vec::new())),
        mail: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/PN1/messages", post(wa_send))
        .route("/PN1/media", post(wa_media_upload))
        .route("/WABA1/message_templates", get(wa_templates))
        .route("/files/:media_id", get(wa_media_file))
        .route("/media/:media_id", get(wa_media_info))
        .route("/ig/:igsid", get(ig_profile))
        .route("/Accounts/AC1/Messages.json", post(sms_send))
        .route("/mail/send", post(mail_send))
        .with_state(state.clone());

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(Some(state))
}

fn fast_delivery() -> DeliverySettings {
    DeliverySettings::default()
        .with_request_timeout(Duration::from_secs(2))
        .with_retry(
            RetryConfig::default()
                .with_initial_delay(Duration::from_millis(5))
                .with_max_delay(Duration::from_millis(20))
                .with_jitter(false),
        )
}

fn whatsapp(state: &MockState) -> WhatsAppAdapter {
    let config = WhatsAppConfig::new("token", "PN1", "WABA1")
        .with_api_base(&state.base)
        .with_delivery(fast_delivery());
    WhatsAppAdapter::new(config).expect("adapter")
}

// Media ids resolve under /media/<id> on the mock
fn whatsapp_media(state: &MockState) -> WhatsAppAdapter {
    let config = WhatsAppConfig::new("token", "PN1", "WABA1")
        .with_api_base(format!("{}/media", state.base))
        .with_delivery(fast_delivery());
    WhatsAppAdapter::new(config).expect("adapter")
}

#[tokio::test]
async fn username_lookup_is_not_retried() -> Result<()> {
    let Some(state) = spawn_mock_api(0).await? else {
        return Ok(());
    };
    let config = InstagramConfig::new("token", "1784")
        .with_api_base(format!("{}/ig", state.base))
        .with_delivery(fast_delivery());
    let adapter = InstagramAdapter::new(config)?;

    assert_eq!(adapter.resolve_username("555").await, None);
    assert_eq!(*state.profile_lookups.lock().await, 1);

    assert_eq!(adapter.resolve_username("777").await.as_deref(), Some("ana.store"));
    assert_eq!(adapter.resolve_username("777").await.as_deref(), Some("ana.store"));
    assert_eq!(*state.profile_lookups.lock().await, 2);
    Ok(())
}

#[tokio::test]
async fn rate_limited_send_is_retried_until_success() -> Result<()> {
    let Some(state) = spawn_mock_api(1).await? else {
        return Ok(());
    };
    let adapter = whatsapp(&state);

    let result = adapter
        .send_message("conv-1", OutgoingMessage::text("15551234567", "Hello"))
        .await;

    assert!(result.is_sent(), "unexpected failure: {:?}", result.error);
    assert_eq!(result.channel_message_id.as_deref(), Some("wamid.2"));
    assert_eq!(state.send_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn exhausted_rate_limit_is_a_failed_result() -> Result<()> {
    let Some(state) = spawn_mock_api(10).await? else {
        return Ok(());
    };
    let adapter = whatsapp(&state);

    let result = adapter
        .send_message("conv-1", OutgoingMessage::text("15551234567", "Hello"))
        .await;

    assert!(!result.is_sent());
    assert_eq!(result.error_code, Some(ErrorCode::RateLimited));
    assert_eq!(state.send_count().await, 3);
    Ok(())
}

#[tokio::test]
async fn idempotent_resend_calls_provider_once() -> Result<()> {
    let Some(state) = spawn_mock_api(0).await? else {
        return Ok(());
    };
    let adapter = whatsapp(&state);
    let message = OutgoingMessage::text("15551234567", "Order shipped").with_idempotency_key("evt-1");

    let first = adapter.send_message("conv-1", message.clone()).await;
    let second = adapter.send_message("conv-1", message).await;

    assert!(first.is_sent());
    assert_eq!(first, second);
    assert_eq!(state.send_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn template_approval_and_fallback() -> Result<()> {
    let Some(state) = spawn_mock_api(0).await? else {
        return Ok(());
    };
    let adapter = whatsapp(&state);

    let approved = adapter
        .send_message(
            "conv-1",
            OutgoingMessage::template(
                "15551234567",
                TemplateRef::new("order_update", "en_US").with_params(vec!["#42".into()]),
            ),
        )
        .await;
    assert!(approved.is_sent());
    assert_eq!(*state.template_fetches.lock().await, 1);

    let degraded = adapter
        .send_message(
            "conv-1",
            OutgoingMessage::template(
                "15551234567",
                TemplateRef::new("promo", "en_US").with_fallback("Our sale starts today"),
            ),
        )
        .await;
    assert!(degraded.is_sent());
    // Served from the cached template list
    assert_eq!(*state.template_fetches.lock().await, 1);

    let sends = state.sends.lock().await.clone();
    assert_eq!(sends[0]["type"], "template");
    assert_eq!(sends[0]["template"]["name"], "order_update");
    assert_eq!(sends[1]["type"], "text");
    assert_eq!(sends[1]["text"]["body"], "Our sale starts today");

    let rejected = adapter
        .send_message(
            "conv-1",
            OutgoingMessage::template("15551234567", TemplateRef::new("promo", "en_US")),
        )
        .await;
    assert!(!rejected.is_sent());
    assert_eq!(rejected.error_code, Some(ErrorCode::TemplateNotApproved));

    // Unknown template forces one refresh, then fails closed
    let unknown = adapter
        .send_message(
            "conv-1",
            OutgoingMessage::template("15551234567", TemplateRef::new("missing", "en_US")),
        )
        .await;
    assert_eq!(unknown.error_code, Some(ErrorCode::TemplateNotApproved));
    assert_eq!(*state.template_fetches.lock().await, 2);
    assert_eq!(state.send_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn media_download_and_upload() -> Result<()> {
    let Some(state) = spawn_mock_api(0).await? else {
        return Ok(());
    };

    let downloaded = whatsapp_media(&state).download_media("MEDIA1").await?;
    assert_eq!(downloaded.mime_type, "image/jpeg");
    assert_eq!(downloaded.data, vec![0xff, 0xd8, 0xff, 0xe0]);

    let uploaded = whatsapp(&state)
        .upload_media(MediaFile::new(vec![1, 2, 3], "image/png").with_file_name("a.png"))
        .await?;
    assert_eq!(uploaded, "UPLOADED1");

    let missing = whatsapp(&state).download_media("nope").await;
    assert!(matches!(missing, Err(courier_core::Error::Media(_))));
    Ok(())
}

#[tokio::test]
async fn sms_send_is_form_encoded_and_not_retried() -> Result<()> {
    let Some(state) = spawn_mock_api(0).await? else {
        return Ok(());
    };
    let adapter = SmsAdapter::new(
        SmsConfig::new("AC1", "secret", "+15550000000").with_api_base(&state.base),
    )?;

    let sent = adapter
        .send_message("conv-1", OutgoingMessage::text("+15551234567", "Your code is ready"))
        .await;
    assert!(sent.is_sent());
    assert_eq!(sent.channel_message_id.as_deref(), Some("SM123"));

    let failed = adapter
        .send_message("conv-1", OutgoingMessage::text("+15550000500", "hello"))
        .await;
    assert!(!failed.is_sent());
    assert_eq!(failed.error_code, Some(ErrorCode::DeliveryFailed));

    let forms = state.sms.lock().await.clone();
    assert_eq!(forms.len(), 2);
    assert_eq!(forms[0].get("From").map(String::as_str), Some("+15550000000"));
    assert_eq!(forms[0].get("Body").map(String::as_str), Some("Your code is ready"));
    Ok(())
}

#[tokio::test]
async fn email_send_returns_provider_message_id() -> Result<()> {
    let Some(state) = spawn_mock_api(0).await? else {
        return Ok(());
    };
    let adapter = EmailAdapter::new(
        EmailConfig::new("key", "support@shop.com")
            .with_api_base(&state.base)
            .with_delivery(fast_delivery()),
    )?;

    let result = adapter
        .send_message(
            "conv-1",
            OutgoingMessage::text("ana@example.com", "Thanks for reaching out").reply_to("<in-1@example.com>"),
        )
        .await;

    assert!(result.is_sent(), "unexpected failure: {:?}", result.error);
    assert_eq!(result.channel_message_id.as_deref(), Some("mail-1"));
    let mail = state.mail.lock().await.clone();
    assert_eq!(mail[0]["headers"]["In-Reply-To"], "<in-1@example.com>");
    Ok(())
}
