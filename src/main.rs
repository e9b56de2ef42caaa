//! Closing Alarms - reads opening hours from photos of business listings and
//! schedules delivery alarms before each closing.

mod alarm_book;
mod alarms;
mod config;
mod error;
mod notify;
mod ocr;
mod schedule;
mod schema;
mod watcher;

use alarm_book::AlarmBook;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use chrono::Local;
use config::{AppConfig, AppConfigPatch, ConfigStore, ServerSettings};
use error::AppError;
use notify::{Notification, Notifier};
use ocr::{tesseract::TesseractProvider, OcrInput, OcrProvider};
use schema::{Alarm, Business, ScanRecord};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    book: AlarmBook,
    configs: Arc<ConfigStore>,
    ocr: Arc<dyn OcrProvider>,
    notifier: Arc<dyn Notifier>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "closing_alarms=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = ServerSettings::from_env();
    let configs = Arc::new(ConfigStore::load(&settings.config_path));

    let http = reqwest::Client::new();
    let ocr: Arc<dyn OcrProvider> = Arc::new(TesseractProvider::new(
        settings.ocr_url.clone(),
        settings.ocr_lang.clone(),
        http.clone(),
    ));
    info!("OCR provider: {} at {}", ocr.name(), settings.ocr_url);
    let notifier: Arc<dyn Notifier> =
        Arc::from(notify::from_settings(settings.notify_webhook_url.as_deref(), http));

    let state = AppState {
        book: AlarmBook::new(),
        configs,
        ocr,
        notifier,
    };

    tokio::spawn(watcher::run_watcher(
        state.book.clone(),
        state.configs.clone(),
        state.notifier.clone(),
        settings.poll_interval,
    ));

    let app = router(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(get_config).put(update_config))
        .route("/scan", post(scan_image))
        .route("/extract", post(extract_text))
        .route("/session", get(get_session))
        .route("/businesses", get(list_businesses))
        .route("/alarms", get(list_alarms))
        .route("/alarms/test", post(test_alarm))
        .route("/alarms/:id/toggle", post(toggle_alarm))
        .route("/alarms/:id", delete(delete_alarm))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

async fn get_config(State(state): State<AppState>) -> Json<AppConfig> {
    Json(state.configs.get())
}

/// Merge a partial config, persist it and reschedule the current alarms.
async fn update_config(
    State(state): State<AppState>,
    Json(patch): Json<AppConfigPatch>,
) -> Result<Json<AppConfig>, AppError> {
    let (config, alarms) = state
        .book
        .reconfigure(&state.configs, patch, Local::now().naive_local())?;
    info!("Config updated, {} alarms rescheduled", alarms.len());
    Ok(Json(config))
}

/// Upload a photo, recognize it and schedule alarms from its text.
async fn scan_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ScanRecord>, AppError> {
    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("image").to_string();
            file_data = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("Failed to read file: {}", e)))?
                .to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err(AppError::Validation("No file uploaded".to_string()));
    }

    info!("Received image: {} ({} bytes)", filename, file_data.len());

    let input = OcrInput::from_upload(filename, file_data)
        .ok_or_else(|| AppError::Validation("Upload is not a supported image".to_string()))?;

    let ocr = state
        .ocr
        .recognize(&input)
        .await
        .map_err(|e| AppError::Ocr(format!("{:#}", e)))?;
    info!(
        "OCR by {}: {} chars (confidence {:?})",
        ocr.provider_name,
        ocr.text.len(),
        ocr.confidence
    );

    Ok(Json(install_scan(&state, &input.filename, &ocr.text)))
}

/// Schedule alarms from already recognized text.
async fn extract_text(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<ScanRecord>, AppError> {
    if body.trim().is_empty() {
        return Err(AppError::Validation("Empty text".to_string()));
    }
    Ok(Json(install_scan(&state, "text", &body)))
}

fn install_scan(state: &AppState, source: &str, text: &str) -> ScanRecord {
    state
        .book
        .install_text(source, text, &state.configs, Local::now().naive_local())
}

async fn get_session(State(state): State<AppState>) -> Result<Json<ScanRecord>, AppError> {
    state
        .book
        .scan()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No scan yet".to_string()))
}

async fn list_businesses(State(state): State<AppState>) -> Json<Vec<Business>> {
    Json(state.book.businesses())
}

async fn list_alarms(State(state): State<AppState>) -> Json<Vec<Alarm>> {
    Json(state.book.alarms())
}

/// Pause or resume one alarm.
async fn toggle_alarm(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Alarm>, AppError> {
    state
        .book
        .toggle(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Alarm {}", id)))
}

async fn delete_alarm(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.book.remove(&id) {
        Ok(Json(serde_json::json!({ "deleted": id })))
    } else {
        Err(AppError::NotFound(format!("Alarm {}", id)))
    }
}

/// Send a test notification with the current sound settings.
async fn test_alarm(State(state): State<AppState>) -> Result<Json<Notification>, AppError> {
    let notification = Notification::test(&state.configs.get());
    state.notifier.notify(&notification).await?;
    Ok(Json(notification))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use notify::tests::RecordingNotifier;
    use ocr::OcrResult;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    // 25:30 rolls into tomorrow, so the alarm is ahead of any wall clock today
    const LATE_LINE: &str = "Tienda Nocturna, Calle Luna 9  20:00-25:30";
    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const BOUNDARY: &str = "alarm-boundary";

    struct FixedOcr;

    #[async_trait::async_trait]
    impl OcrProvider for FixedOcr {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn recognize(&self, _input: &OcrInput) -> anyhow::Result<OcrResult> {
            Ok(OcrResult {
                text: LATE_LINE.to_string(),
                confidence: Some(0.9),
                provider_name: "fixed".to_string(),
            })
        }
    }

    struct TestApp {
        router: Router,
        notifier: Arc<RecordingNotifier>,
        _dir: tempfile::TempDir,
    }

    impl TestApp {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let notifier = Arc::new(RecordingNotifier::default());
            let state = AppState {
                book: AlarmBook::new(),
                configs: Arc::new(ConfigStore::load(&dir.path().join("alarm_config.json"))),
                ocr: Arc::new(FixedOcr),
                notifier: notifier.clone(),
            };
            Self {
                router: router(state),
                notifier,
                _dir: dir,
            }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
        }

        async fn extract(&self, text: &str) -> (StatusCode, Value) {
            self.send(
                Request::builder()
                    .method("POST")
                    .uri("/extract")
                    .body(Body::from(text.to_string()))
                    .unwrap(),
            )
            .await
        }
    }

    fn upload(filename: &str, data: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/scan")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_extract_then_config_reschedules() {
        let app = TestApp::new();

        let (status, record) = app.extract(LATE_LINE).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["businesses"][0]["name"], "Tienda Nocturna");
        assert!(record["alarms"][0]["alarmTime"]
            .as_str()
            .unwrap()
            .ends_with("T01:10:00"));

        let (status, config) = app
            .send(
                Request::builder()
                    .method("PUT")
                    .uri("/config")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({ "finalMinutes": 90 }).to_string()))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(config["finalMinutes"], 90);
        assert_eq!(config["middayMinutes"], 20);

        let (_, alarms) = app
            .send(Request::builder().uri("/alarms").body(Body::empty()).unwrap())
            .await;
        assert_eq!(alarms.as_array().unwrap().len(), 1);
        assert!(alarms[0]["alarmTime"].as_str().unwrap().ends_with("T00:00:00"));

        let (_, stored) = app
            .send(Request::builder().uri("/config").body(Body::empty()).unwrap())
            .await;
        assert_eq!(stored, config);
    }

    #[tokio::test]
    async fn test_empty_extract_is_rejected() {
        let app = TestApp::new();
        let (status, body) = app.extract("  \n ").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Empty text");

        let (status, _) = app
            .send(Request::builder().uri("/session").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_alarm_ids_are_not_found() {
        let app = TestApp::new();
        app.extract(LATE_LINE).await;

        let (status, body) = app
            .send(
                Request::builder()
                    .method("POST")
                    .uri("/alarms/missing/toggle")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Alarm missing");

        let (status, _) = app
            .send(
                Request::builder()
                    .method("DELETE")
                    .uri("/alarms/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_toggle_and_delete_known_alarm() {
        let app = TestApp::new();
        let (_, record) = app.extract(LATE_LINE).await;
        let id = record["alarms"][0]["id"].as_str().unwrap().to_string();

        let (status, alarm) = app
            .send(
                Request::builder()
                    .method("POST")
                    .uri(format!("/alarms/{}/toggle", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(alarm["active"], false);

        let (status, body) = app
            .send(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/alarms/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], id);

        let (_, alarms) = app
            .send(Request::builder().uri("/alarms").body(Body::empty()).unwrap())
            .await;
        assert!(alarms.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_rejects_non_images() {
        let app = TestApp::new();
        let (status, body) = app.send(upload("notes.txt", b"09:00-14:00")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Upload is not a supported image");

        let (status, _) = app
            .send(Request::builder().uri("/session").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_scan_recognizes_image() {
        let app = TestApp::new();
        let (status, record) = app.send(upload("listing.png", PNG_HEADER)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["source"], "listing.png");
        assert_eq!(record["businesses"].as_array().unwrap().len(), 1);

        let (_, businesses) = app
            .send(Request::builder().uri("/businesses").body(Body::empty()).unwrap())
            .await;
        assert_eq!(businesses, record["businesses"]);
    }

    #[tokio::test]
    async fn test_alarm_test_notifies() {
        let app = TestApp::new();
        let (status, notification) = app
            .send(
                Request::builder()
                    .method("POST")
                    .uri("/alarms/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(notification["body"], "Prueba de sonido");
        assert_eq!(app.notifier.sent.lock().unwrap().len(), 1);
    }
}
