//! Dynamic rendering through a headless browser
//!
//! Each render owns one browser process and one page for its whole life:
//! `Launching → NavigatingPage → Settling → Extracting → TornDown`, or
//! `Failed` from any earlier phase. Page-then-browser teardown runs on every
//! exit path, and a failed page close never stops the browser close.
//!
//! The browser sits behind the [`RenderEngine`] / [`BrowserSession`] /
//! [`PageSession`] traits; [`ChromeEngine`] drives Chromium over CDP.

use crate::{
    create_browser_config, png_data_uri, ClipRegion, Config, NetworkIdleSettings, ScrapeError,
    ValidatedUrl, Viewport,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport as ClipViewport};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Value reported in the `method` field of dynamic responses.
pub const RENDER_METHOD: &str = "puppeteer";

/// Prefix Chromium puts on network-level navigation failures.
pub const NETWORK_ERROR_PREFIX: &str = "net::ERR_";

const BROWSER_EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Launching,
    NavigatingPage,
    Settling,
    Extracting,
    TornDown,
    Failed,
}

impl RenderPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RenderPhase::TornDown | RenderPhase::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub html: String,
    pub title: String,
    pub screenshot: Vec<u8>,
    /// `data:image/png;base64,...`
    pub screenshot_data_uri: String,
    pub byte_length: usize,
    pub final_url: Option<String>,
    pub rendered_at: DateTime<Utc>,
    pub render_time: Duration,
}

/// Launches one isolated browser per call.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Fails with [`ScrapeError::RenderEngineUnavailable`] when no browser
    /// can be started. Never retried.
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ScrapeError>;
}

#[async_trait]
pub trait BrowserSession: Send {
    async fn new_page(&mut self) -> Result<Box<dyn PageSession>, ScrapeError>;

    /// Close the browser process. Must be safe to call after a failed
    /// page close.
    async fn close(&mut self) -> Result<(), ScrapeError>;
}

#[async_trait]
pub trait PageSession: Send {
    async fn configure(&mut self, viewport: &Viewport, user_agent: &str)
        -> Result<(), ScrapeError>;

    /// Navigate and wait for network quiescence. Network-level failures map
    /// to [`ScrapeError::UpstreamUnreachable`].
    async fn navigate(&mut self, url: &str, idle: &NetworkIdleSettings)
        -> Result<(), ScrapeError>;

    async fn content(&mut self) -> Result<String, ScrapeError>;

    async fn title(&mut self) -> Result<Option<String>, ScrapeError>;

    async fn current_url(&mut self) -> Result<Option<String>, ScrapeError>;

    /// PNG of the top-left `clip` region of the viewport.
    async fn screenshot(&mut self, clip: ClipRegion) -> Result<Vec<u8>, ScrapeError>;

    async fn close(&mut self) -> Result<(), ScrapeError>;
}

/// What happened during teardown. Failures here are logged, never returned
/// in place of the render's own result.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub page_closed: bool,
    pub browser_closed: bool,
    pub page_error: Option<ScrapeError>,
    pub browser_error: Option<ScrapeError>,
}

/// Exclusive owner of one browser and its page for a single render.
pub struct RenderSession {
    id: String,
    browser: Option<Box<dyn BrowserSession>>,
    page: Option<Box<dyn PageSession>>,
    phase: RenderPhase,
}

impl RenderSession {
    /// Launch a browser and open its page. If the page cannot be opened the
    /// browser is closed before returning.
    pub async fn open(engine: &dyn RenderEngine) -> Result<Self, ScrapeError> {
        let id = uuid::Uuid::new_v4().to_string();
        debug!("Render session {} launching", id);

        let browser = engine.launch().await?;
        let mut session = Self {
            id,
            browser: Some(browser),
            page: None,
            phase: RenderPhase::Launching,
        };

        let page = match session.browser.as_deref_mut() {
            Some(browser) => browser.new_page().await,
            None => Err(ScrapeError::RenderEngineUnavailable(
                "browser closed before page creation".to_string(),
            )),
        };

        match page {
            Ok(page) => {
                session.page = Some(page);
                Ok(session)
            }
            Err(e) => {
                session.fail();
                session.release().await;
                Err(e)
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    fn enter(&mut self, phase: RenderPhase) {
        debug!("Render session {}: {:?} -> {:?}", self.id, self.phase, phase);
        self.phase = phase;
    }

    fn fail(&mut self) {
        if !self.phase.is_terminal() {
            self.enter(RenderPhase::Failed);
        }
    }

    fn page(&mut self) -> Result<&mut dyn PageSession, ScrapeError> {
        match self.page.as_deref_mut() {
            Some(page) => Ok(page),
            None => Err(ScrapeError::PageError("page already closed".to_string())),
        }
    }

    /// Close the page, then the browser, attempting both regardless of
    /// errors. Idempotent.
    pub async fn release(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        if let Some(mut page) = self.page.take() {
            match page.close().await {
                Ok(()) => report.page_closed = true,
                Err(e) => {
                    warn!("Render session {}: page close failed: {}", self.id, e);
                    report.page_error = Some(e);
                }
            }
        }

        if let Some(mut browser) = self.browser.take() {
            match browser.close().await {
                Ok(()) => report.browser_closed = true,
                Err(e) => {
                    warn!("Render session {}: browser close failed: {}", self.id, e);
                    report.browser_error = Some(e);
                }
            }
        }

        if self.phase != RenderPhase::Failed {
            self.enter(RenderPhase::TornDown);
        }
        report
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        if self.page.is_none() && self.browser.is_none() {
            return;
        }

        // The owning future was abandoned before release ran.
        let page = self.page.take();
        let browser = self.browser.take();
        let id = self.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Render session {} dropped before teardown, closing in background", id);
                handle.spawn(async move {
                    if let Some(mut page) = page {
                        let _ = page.close().await;
                    }
                    if let Some(mut browser) = browser {
                        let _ = browser.close().await;
                    }
                });
            }
            Err(_) => warn!("Render session {} dropped outside a runtime", id),
        }
    }
}

/// Renders pages in a fresh browser per call.
pub struct DynamicRenderer {
    engine: Arc<dyn RenderEngine>,
    config: Config,
}

impl DynamicRenderer {
    pub fn new(engine: Arc<dyn RenderEngine>, config: Config) -> Self {
        Self { engine, config }
    }

    /// Renderer backed by a locally launched Chromium.
    pub fn chrome(config: Config) -> Self {
        Self::new(Arc::new(ChromeEngine::new(config.clone())), config)
    }

    pub async fn render(&self, url: &ValidatedUrl) -> Result<RenderedDocument, ScrapeError> {
        self.render_until(url, std::future::pending()).await
    }

    /// Like [`render`](Self::render), but stops early once `cancel`
    /// completes. Teardown still runs before returning.
    pub async fn render_until<F>(
        &self,
        url: &ValidatedUrl,
        cancel: F,
    ) -> Result<RenderedDocument, ScrapeError>
    where
        F: Future<Output = ()> + Send,
    {
        let start_time = Instant::now();
        let mut session = RenderSession::open(self.engine.as_ref()).await?;

        let outcome = tokio::select! {
            outcome = self.drive(&mut session, url, start_time) => outcome,
            _ = cancel => Err(ScrapeError::PageError("render cancelled".to_string())),
        };
        if let Err(e) = &outcome {
            warn!(
                "Render session {} for {} failed during {:?}: {}",
                session.id(),
                url,
                session.phase(),
                e
            );
            session.fail();
        }

        let report = session.release().await;
        debug!(
            "Render session {} torn down (page closed: {}, browser closed: {})",
            session.id(),
            report.page_closed,
            report.browser_closed
        );

        if let Ok(document) = &outcome {
            info!(
                "Rendered {} ({} bytes) in {:?}",
                url, document.byte_length, document.render_time
            );
        }
        outcome
    }

    async fn drive(
        &self,
        session: &mut RenderSession,
        url: &ValidatedUrl,
        start_time: Instant,
    ) -> Result<RenderedDocument, ScrapeError> {
        session.enter(RenderPhase::NavigatingPage);
        session
            .page()?
            .configure(&self.config.viewport, &self.config.user_agent)
            .await?;

        let navigation = session
            .page()?
            .navigate(url.normalized_href(), &self.config.network_idle);
        match timeout(self.config.navigation_timeout, navigation).await {
            Ok(result) => result?,
            Err(_) => return Err(ScrapeError::Timeout(self.config.navigation_timeout)),
        }

        session.enter(RenderPhase::Settling);
        sleep(self.config.settle_delay).await;

        session.enter(RenderPhase::Extracting);
        let page = session.page()?;
        let html = page.content().await?;
        let byte_length = html.len();
        if byte_length > self.config.max_response_size {
            return Err(ScrapeError::TooLarge(self.config.max_response_size));
        }

        let title = page.title().await?.unwrap_or_default();
        let final_url = page.current_url().await.unwrap_or(None);
        let screenshot = page.screenshot(self.config.effective_clip()).await?;
        let screenshot_data_uri = png_data_uri(&screenshot);

        Ok(RenderedDocument {
            html,
            title,
            screenshot,
            screenshot_data_uri,
            byte_length,
            final_url,
            rendered_at: Utc::now(),
            render_time: start_time.elapsed(),
        })
    }
}

/// Launches Chromium through chromiumoxide with a throwaway profile.
pub struct ChromeEngine {
    config: Config,
}

impl ChromeEngine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RenderEngine for ChromeEngine {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ScrapeError> {
        let profile_dir =
            std::env::temp_dir().join(format!("markup-scraper-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&profile_dir).await.map_err(|e| {
            ScrapeError::RenderEngineUnavailable(format!("Failed to create profile dir: {e}"))
        })?;

        let launched = match create_browser_config(&self.config, &profile_dir) {
            Ok(browser_config) => Browser::launch(browser_config)
                .await
                .map_err(|e| ScrapeError::RenderEngineUnavailable(e.to_string())),
            Err(e) => Err(e),
        };

        let (browser, mut handler) = match launched {
            Ok(pair) => pair,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&profile_dir).await;
                return Err(e);
            }
        };

        // The handler is a Stream that must be polled for CDP traffic to flow.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
            debug!("CDP handler stream ended");
        });

        Ok(Box::new(ChromeBrowser {
            browser,
            handler: handler_task,
            profile_dir,
        }))
    }
}

struct ChromeBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
}

#[async_trait]
impl BrowserSession for ChromeBrowser {
    async fn new_page(&mut self) -> Result<Box<dyn PageSession>, ScrapeError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScrapeError::PageError(e.to_string()))?;
        Ok(Box::new(ChromePage { page: Some(page) }))
    }

    async fn close(&mut self) -> Result<(), ScrapeError> {
        let result = self
            .browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| ScrapeError::PageError(format!("browser close: {e}")));

        if result.is_err() {
            let _ = self.browser.kill().await;
        }
        let _ = timeout(BROWSER_EXIT_GRACE, self.browser.wait()).await;

        self.handler.abort();
        let _ = tokio::fs::remove_dir_all(&self.profile_dir).await;
        result
    }
}

impl Drop for ChromeBrowser {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

struct ChromePage {
    page: Option<Page>,
}

impl ChromePage {
    fn page(&self) -> Result<&Page, ScrapeError> {
        self.page
            .as_ref()
            .ok_or_else(|| ScrapeError::PageError("page already closed".to_string()))
    }
}

fn page_error(err: CdpError) -> ScrapeError {
    ScrapeError::PageError(err.to_string())
}

fn navigation_error(err: CdpError) -> ScrapeError {
    classify_navigation_failure(err.to_string())
}

/// `net::ERR_*` failures mean the target could not be reached; anything
/// else is a page-level failure.
fn classify_navigation_failure(message: String) -> ScrapeError {
    if message.contains(NETWORK_ERROR_PREFIX) {
        ScrapeError::UpstreamUnreachable(message)
    } else {
        ScrapeError::PageError(message)
    }
}

/// In-flight request bookkeeping for the network-idle wait.
///
/// Events for one request can be observed out of order when they arrive on
/// separate streams, so ids that already completed are remembered and a late
/// `on_sent` for them is ignored. Redirects reuse the request id and keep a
/// single in-flight entry.
#[derive(Debug, Default)]
pub struct NetworkIdleTracker {
    inflight: HashSet<String>,
    completed: HashSet<String>,
}

impl NetworkIdleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_sent(&mut self, request_id: &str) {
        if !self.completed.contains(request_id) {
            self.inflight.insert(request_id.to_string());
        }
    }

    pub fn on_finished(&mut self, request_id: &str) {
        self.inflight.remove(request_id);
        self.completed.insert(request_id.to_string());
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_idle(&self, idle: &NetworkIdleSettings) -> bool {
        self.inflight.len() <= idle.max_inflight
    }
}

#[async_trait]
impl PageSession for ChromePage {
    async fn configure(
        &mut self,
        viewport: &Viewport,
        user_agent: &str,
    ) -> Result<(), ScrapeError> {
        let page = self.page()?;

        let emulation_params = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width)
            .height(viewport.height)
            .device_scale_factor(viewport.device_scale_factor)
            .mobile(viewport.mobile)
            .build()
            .map_err(ScrapeError::PageError)?;
        page.execute(emulation_params).await.map_err(page_error)?;

        page.execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(page_error)?;
        Ok(())
    }

    async fn navigate(
        &mut self,
        url: &str,
        idle: &NetworkIdleSettings,
    ) -> Result<(), ScrapeError> {
        let page = self.page()?;

        // Subscribe before navigating so no request is missed.
        let mut sent = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(page_error)?;
        let mut finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(page_error)?;
        let mut failed = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(page_error)?;

        page.goto(url.to_string()).await.map_err(navigation_error)?;

        let mut tracker = NetworkIdleTracker::new();
        loop {
            // Drain `sent` first: the handler queues it ahead of completion.
            tokio::select! {
                biased;
                Some(event) = sent.next() => tracker.on_sent(event.request_id.inner()),
                Some(event) = finished.next() => tracker.on_finished(event.request_id.inner()),
                Some(event) = failed.next() => tracker.on_finished(event.request_id.inner()),
                _ = sleep(idle.quiet_period), if tracker.is_idle(idle) => break,
                else => break,
            }
        }

        debug!("Network idle for {} ({} requests still open)", url, tracker.inflight());
        Ok(())
    }

    async fn content(&mut self) -> Result<String, ScrapeError> {
        self.page()?.content().await.map_err(page_error)
    }

    async fn title(&mut self) -> Result<Option<String>, ScrapeError> {
        self.page()?.get_title().await.map_err(page_error)
    }

    async fn current_url(&mut self) -> Result<Option<String>, ScrapeError> {
        self.page()?.url().await.map_err(page_error)
    }

    async fn screenshot(&mut self, clip: ClipRegion) -> Result<Vec<u8>, ScrapeError> {
        let screenshot_params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .clip(ClipViewport {
                x: 0.0,
                y: 0.0,
                width: f64::from(clip.width),
                height: f64::from(clip.height),
                scale: 1.0,
            })
            .build();

        self.page()?
            .screenshot(screenshot_params)
            .await
            .map_err(|e| ScrapeError::CaptureFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ScrapeError> {
        match self.page.take() {
            Some(page) => page.close().await.map_err(page_error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AdmissionConfig, AdmissionGuard};
    use crate::testing::{FakeEngine, Recorder, Script};
    use std::sync::atomic::Ordering;

    fn renderer(script: Script) -> (DynamicRenderer, Arc<Recorder>) {
        let (engine, recorder) = FakeEngine::new(script);
        (DynamicRenderer::new(Arc::new(engine), Config::default()), recorder)
    }

    fn target() -> ValidatedUrl {
        AdmissionGuard::new(&AdmissionConfig::default())
            .unwrap()
            .validate("https://example.com/app")
            .into_result()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_render_tears_down() {
        let (renderer, recorder) = renderer(Script::default());
        let document = renderer.render(&target()).await.unwrap();

        assert_eq!(document.title, "T");
        assert!(document.html.contains("<body>ok</body>"));
        assert_eq!(document.byte_length, document.html.len());
        assert!(document.screenshot_data_uri.starts_with("data:image/png;base64,"));
        // Settle delay is always paid.
        assert!(document.render_time >= Duration::from_millis(2000));
        assert!(recorder.page_closed.load(Ordering::SeqCst));
        assert!(recorder.browser_closed.load(Ordering::SeqCst));
        assert_eq!(recorder.events(), vec!["page.close", "browser.close"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_timeout_closes_page_and_browser() {
        let (renderer, recorder) = renderer(Script {
            hang_navigation: true,
            ..Default::default()
        });

        let err = renderer.render(&target()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Timeout(d) if d == Duration::from_millis(10_000)));
        assert!(recorder.page_closed.load(Ordering::SeqCst));
        assert!(recorder.browser_closed.load(Ordering::SeqCst));
        assert_eq!(recorder.events(), vec!["page.close", "browser.close"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_close_failure_still_closes_browser() {
        let (renderer, recorder) = renderer(Script {
            hang_navigation: true,
            fail_page_close: true,
            ..Default::default()
        });

        let err = renderer.render(&target()).await.unwrap_err();
        // The primary error is reported, not the teardown failure.
        assert!(matches!(err, ScrapeError::Timeout(_)));
        assert!(!recorder.page_closed.load(Ordering::SeqCst));
        assert!(recorder.browser_close_attempted.load(Ordering::SeqCst));
        assert!(recorder.browser_closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_close_failure_does_not_mask_success() {
        let (renderer, recorder) = renderer(Script {
            fail_page_close: true,
            ..Default::default()
        });
        assert!(renderer.render(&target()).await.is_ok());
        assert!(recorder.browser_closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_target_reported() {
        let (renderer, recorder) = renderer(Script {
            unreachable: true,
            ..Default::default()
        });
        let err = renderer.render(&target()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::UpstreamUnreachable(ref m) if m.starts_with(NETWORK_ERROR_PREFIX)));
        assert!(recorder.browser_closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_markup_rejected_after_render() {
        let (renderer, recorder) = renderer(Script {
            html: Some("a".repeat(1_048_577)),
            ..Default::default()
        });
        let err = renderer.render(&target()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::TooLarge(1_048_576)));
        assert!(recorder.page_closed.load(Ordering::SeqCst));
        assert!(recorder.browser_closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_launch_failure_is_not_retried() {
        let (renderer, recorder) = renderer(Script {
            fail_launch: true,
            ..Default::default()
        });
        let err = renderer.render(&target()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::RenderEngineUnavailable(_)));
        assert_eq!(recorder.launches.load(Ordering::SeqCst), 1);
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_page_creation_failure_closes_browser() {
        let (engine, recorder) = FakeEngine::new(Script {
            fail_new_page: true,
            ..Default::default()
        });
        let result = RenderSession::open(&engine).await;
        assert!(matches!(result, Err(ScrapeError::PageError(_))));
        assert_eq!(recorder.events(), vec!["browser.close"]);
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_terminal() {
        let (engine, recorder) = FakeEngine::new(Script::default());
        let mut session = RenderSession::open(&engine).await.unwrap();
        assert_eq!(session.phase(), RenderPhase::Launching);

        let report = session.release().await;
        assert!(report.page_closed && report.browser_closed);
        assert_eq!(session.phase(), RenderPhase::TornDown);

        let second = session.release().await;
        assert!(!second.page_closed && !second.browser_closed);
        assert_eq!(recorder.events(), vec!["page.close", "browser.close"]);
    }

    #[tokio::test]
    async fn test_abandoned_session_closes_in_background() {
        let (engine, recorder) = FakeEngine::new(Script::default());
        let session = RenderSession::open(&engine).await.unwrap();
        drop(session);

        for _ in 0..10 {
            if recorder.browser_closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(recorder.events(), vec!["page.close", "browser.close"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_render_still_tears_down() {
        let (renderer, recorder) = renderer(Script {
            hang_navigation: true,
            ..Default::default()
        });
        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();

        let target = target();
        let render = renderer.render_until(&target, async move {
            let _ = cancel_rx.await;
        });
        let cancel = async move {
            sleep(Duration::from_secs(1)).await;
            let _ = cancel_tx.send(());
        };
        let (result, ()) = tokio::join!(render, cancel);

        assert!(matches!(result, Err(ScrapeError::PageError(ref m)) if m.contains("cancelled")));
        assert_eq!(recorder.events(), vec!["page.close", "browser.close"]);
    }

    fn idle() -> NetworkIdleSettings {
        NetworkIdleSettings::default()
    }

    #[test]
    fn test_idle_tracker_in_order_events() {
        let mut tracker = NetworkIdleTracker::new();
        for id in ["1", "2", "3", "4"] {
            tracker.on_sent(id);
        }
        assert_eq!(tracker.inflight(), 4);
        assert!(!tracker.is_idle(&idle()));

        tracker.on_finished("1");
        tracker.on_finished("2");
        assert!(tracker.is_idle(&idle()));
    }

    #[test]
    fn test_idle_tracker_completion_seen_before_send() {
        let mut tracker = NetworkIdleTracker::new();
        // Every request completes before its send event is drained.
        for id in 0..20 {
            tracker.on_finished(&id.to_string());
        }
        for id in 0..20 {
            tracker.on_sent(&id.to_string());
        }
        assert_eq!(tracker.inflight(), 0);
        assert!(tracker.is_idle(&idle()));
    }

    #[test]
    fn test_idle_tracker_redirect_reuses_request_id() {
        let mut tracker = NetworkIdleTracker::new();
        tracker.on_sent("doc");
        tracker.on_sent("doc");
        tracker.on_sent("doc");
        assert_eq!(tracker.inflight(), 1);

        tracker.on_finished("doc");
        assert_eq!(tracker.inflight(), 0);
    }

    #[test]
    fn test_idle_tracker_max_inflight_boundary() {
        let settings = NetworkIdleSettings {
            max_inflight: 2,
            ..Default::default()
        };
        let mut tracker = NetworkIdleTracker::new();
        tracker.on_sent("a");
        tracker.on_sent("b");
        assert!(tracker.is_idle(&settings));

        tracker.on_sent("c");
        assert!(!tracker.is_idle(&settings));

        tracker.on_finished("b");
        assert!(tracker.is_idle(&settings));
    }

    #[test]
    fn test_navigation_failure_classification() {
        let err = classify_navigation_failure("net::ERR_NAME_NOT_RESOLVED at https://nope.invalid".into());
        assert!(matches!(err, ScrapeError::UpstreamUnreachable(ref m) if m.contains("ERR_NAME_NOT_RESOLVED")));

        let err = classify_navigation_failure("Target closed".into());
        assert!(matches!(err, ScrapeError::PageError(ref m) if m == "Target closed"));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(RenderPhase::TornDown.is_terminal());
        assert!(RenderPhase::Failed.is_terminal());
        assert!(!RenderPhase::Settling.is_terminal());
    }
}
