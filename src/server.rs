//! HTTP entry points
//!
//! `GET /scrape` runs the static path and classifies the markup;
//! `GET /scrape-dynamic` renders the page in a headless browser. Both admit
//! the URL first and answer with JSON.

use crate::{
    AdmissionGuard, Config, ContentClassifier, DynamicRenderer, ErrorKind, ErrorSeverity,
    FetchMode, Metrics, PatternClassifier, PrometheusExporter, ScrapeError, StaticFetcher,
    RENDER_METHOD,
};
use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn, Instrument};

/// Advisory attached to static results that look script-rendered.
pub const JS_RENDERED_WARNING: &str = "This page appears to use JavaScript rendering. The content may be incomplete. Try using dynamic scraping for better results.";

#[derive(Clone)]
pub struct AppState {
    guard: AdmissionGuard,
    fetcher: Arc<StaticFetcher>,
    renderer: Arc<DynamicRenderer>,
    classifier: Arc<dyn ContentClassifier>,
    metrics: Metrics,
    exporter: Option<Arc<PrometheusExporter>>,
}

impl AppState {
    pub fn new(config: &Config, renderer: DynamicRenderer) -> Result<Self, ScrapeError> {
        let guard = AdmissionGuard::new(&config.admission)?;
        let fetcher = StaticFetcher::new(config, &guard)?;

        Ok(Self {
            guard,
            fetcher: Arc::new(fetcher),
            renderer: Arc::new(renderer),
            classifier: Arc::new(PatternClassifier::new()),
            metrics: Metrics::new(),
            exporter: None,
        })
    }

    pub fn with_exporter(mut self, exporter: PrometheusExporter) -> Self {
        self.exporter = Some(Arc::new(exporter));
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct ScrapeQuery {
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticScrapeResponse {
    pub html: String,
    pub url: String,
    pub size: usize,
    pub timestamp: String,
    pub is_js_rendered: bool,
    pub warning: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicScrapeResponse {
    pub html: String,
    pub title: String,
    pub screenshot: String,
    pub url: String,
    pub size: usize,
    pub timestamp: String,
    /// Milliseconds from launch to extraction
    pub render_time: u64,
    pub is_dynamic: bool,
    pub method: &'static str,
}

/// A failed request, shaped per endpoint.
#[derive(Debug)]
pub struct ApiError {
    mode: FetchMode,
    error: ScrapeError,
}

impl ApiError {
    fn new(mode: FetchMode, error: ScrapeError) -> Self {
        Self { mode, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.error.kind();
        let status =
            StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = match (self.mode, kind) {
            (FetchMode::Static, ErrorKind::Internal | ErrorKind::RenderEngineUnavailable) => json!({
                "error": "Failed to scrape URL",
                "details": self.error.to_string(),
            }),
            (FetchMode::Dynamic, ErrorKind::Internal | ErrorKind::RenderEngineUnavailable) => {
                json!({
                    "error": "Failed to scrape URL with dynamic rendering",
                    "details": self.error.to_string(),
                })
            }
            (FetchMode::Dynamic, ErrorKind::UpstreamUnreachable) => json!({
                "error": "Failed to load page",
                "details": self.error.to_string(),
            }),
            _ => json!({ "error": self.error.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

fn log_failure(mode: FetchMode, error: &ScrapeError) {
    match error.severity() {
        ErrorSeverity::Low => info!("{} scrape rejected: {}", mode.as_str(), error),
        ErrorSeverity::Medium => warn!("{} scrape failed: {}", mode.as_str(), error),
        ErrorSeverity::High | ErrorSeverity::Critical => {
            error!("{} scrape failed: {}", mode.as_str(), error)
        }
    }
}

fn required_url(query: ScrapeQuery) -> Result<String, ScrapeError> {
    query
        .url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or(ScrapeError::MissingUrl)
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn scrape_static(
    State(state): State<AppState>,
    Query(query): Query<ScrapeQuery>,
) -> Result<Json<StaticScrapeResponse>, ApiError> {
    let span = info_span!(
        "scrape",
        request_id = %uuid::Uuid::new_v4(),
        mode = "static",
        host = tracing::field::Empty
    );
    let start_time = Instant::now();

    let result = async {
        let raw_url = required_url(query)?;
        let url = state.guard.admit(&raw_url).await.into_result()?;
        tracing::Span::current().record("host", url.hostname());
        let document = state.fetcher.fetch(&url).await?;
        let classification = state.classifier.classify(&document.html);

        Ok::<_, ScrapeError>(StaticScrapeResponse {
            size: document.byte_length,
            html: document.html,
            url: raw_url,
            timestamp: timestamp(),
            is_js_rendered: classification.is_js_rendered,
            warning: classification
                .is_js_rendered
                .then(|| JS_RENDERED_WARNING.to_string()),
        })
    }
    .instrument(span)
    .await;

    match result {
        Ok(response) => {
            state
                .metrics
                .record_success(FetchMode::Static, start_time.elapsed(), response.size);
            if response.is_js_rendered {
                state.metrics.record_js_rendered();
            }
            Ok(Json(response))
        }
        Err(e) => {
            log_failure(FetchMode::Static, &e);
            state
                .metrics
                .record_failure(FetchMode::Static, start_time.elapsed(), e.kind());
            Err(ApiError::new(FetchMode::Static, e))
        }
    }
}

async fn scrape_dynamic(
    State(state): State<AppState>,
    Query(query): Query<ScrapeQuery>,
) -> Result<Json<DynamicScrapeResponse>, ApiError> {
    let span = info_span!(
        "scrape",
        request_id = %uuid::Uuid::new_v4(),
        mode = "dynamic",
        host = tracing::field::Empty
    );
    let start_time = Instant::now();

    let result = async {
        let raw_url = required_url(query)?;
        let url = state.guard.admit(&raw_url).await.into_result()?;
        tracing::Span::current().record("host", url.hostname());

        // Detached so a disconnecting client cannot cut teardown short.
        let renderer = state.renderer.clone();
        let document = tokio::spawn(async move { renderer.render(&url).await }.in_current_span())
            .await
            .map_err(|e| ScrapeError::PageError(format!("render task failed: {e}")))??;

        Ok::<_, ScrapeError>(DynamicScrapeResponse {
            size: document.byte_length,
            html: document.html,
            title: document.title,
            screenshot: document.screenshot_data_uri,
            url: raw_url,
            timestamp: document
                .rendered_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            render_time: document.render_time.as_millis() as u64,
            is_dynamic: true,
            method: RENDER_METHOD,
        })
    }
    .instrument(span)
    .await;

    match result {
        Ok(response) => {
            state
                .metrics
                .record_success(FetchMode::Dynamic, start_time.elapsed(), response.size);
            Ok(Json(response))
        }
        Err(e) => {
            log_failure(FetchMode::Dynamic, &e);
            state
                .metrics
                .record_failure(FetchMode::Dynamic, start_time.elapsed(), e.kind());
            Err(ApiError::new(FetchMode::Dynamic, e))
        }
    }
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
        .into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.exporter {
        Some(exporter) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            exporter.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn cors(methods: Vec<Method>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(methods)
        .allow_headers(Any)
}

pub fn router(state: AppState) -> Router {
    let static_routes = Router::new()
        .route(
            "/scrape",
            get(scrape_static)
                .head(method_not_allowed)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .layer(cors(vec![Method::GET, Method::OPTIONS]));

    let dynamic_routes = Router::new()
        .route(
            "/scrape-dynamic",
            get(scrape_dynamic)
                .head(method_not_allowed)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .layer(cors(vec![Method::GET, Method::POST, Method::OPTIONS]));

    let mut app = Router::new().merge(static_routes).merge(dynamic_routes);
    if state.exporter.is_some() {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serve until `shutdown` resolves, then stop accepting and wait for open
/// requests (and the renders they own) to finish.
pub async fn serve<F>(state: AppState, bind: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = bind.parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Scrape server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Scrape server stopped");
    Ok(())
}
