//! In-process render engine doubles for tests.

use crate::{
    BrowserSession, ClipRegion, NetworkIdleSettings, PageSession, RenderEngine, ScrapeError,
    Viewport,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

pub const FAKE_PNG: &[u8] = &[0x89, b'P', b'N', b'G'];

/// Observes what a fake session did.
#[derive(Default)]
pub struct Recorder {
    pub page_closed: AtomicBool,
    pub browser_closed: AtomicBool,
    pub browser_close_attempted: AtomicBool,
    pub launches: AtomicUsize,
    events: Mutex<Vec<&'static str>>,
}

impl Recorder {
    fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

/// How the fake browser misbehaves.
#[derive(Clone, Default)]
pub struct Script {
    pub fail_launch: bool,
    pub fail_new_page: bool,
    pub hang_navigation: bool,
    pub unreachable: bool,
    pub fail_page_close: bool,
    pub html: Option<String>,
    pub title: Option<String>,
}

pub struct FakeEngine {
    pub recorder: Arc<Recorder>,
    pub script: Script,
}

impl FakeEngine {
    pub fn new(script: Script) -> (Self, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (
            Self {
                recorder: recorder.clone(),
                script,
            },
            recorder,
        )
    }
}

struct FakeBrowser {
    recorder: Arc<Recorder>,
    script: Script,
}

struct FakePage {
    recorder: Arc<Recorder>,
    script: Script,
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ScrapeError> {
        self.recorder.launches.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_launch {
            return Err(ScrapeError::RenderEngineUnavailable("no chromium".into()));
        }
        Ok(Box::new(FakeBrowser {
            recorder: self.recorder.clone(),
            script: self.script.clone(),
        }))
    }
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn new_page(&mut self) -> Result<Box<dyn PageSession>, ScrapeError> {
        if self.script.fail_new_page {
            return Err(ScrapeError::PageError("target crashed".into()));
        }
        Ok(Box::new(FakePage {
            recorder: self.recorder.clone(),
            script: self.script.clone(),
        }))
    }

    async fn close(&mut self) -> Result<(), ScrapeError> {
        self.recorder.browser_close_attempted.store(true, Ordering::SeqCst);
        self.recorder.record("browser.close");
        self.recorder.browser_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PageSession for FakePage {
    async fn configure(&mut self, _: &Viewport, _: &str) -> Result<(), ScrapeError> {
        Ok(())
    }

    async fn navigate(&mut self, _: &str, _: &NetworkIdleSettings) -> Result<(), ScrapeError> {
        if self.script.hang_navigation {
            sleep(Duration::from_secs(3600)).await;
        }
        if self.script.unreachable {
            return Err(ScrapeError::UpstreamUnreachable(
                "net::ERR_NAME_NOT_RESOLVED".into(),
            ));
        }
        Ok(())
    }

    async fn content(&mut self) -> Result<String, ScrapeError> {
        Ok(self.script.html.clone().unwrap_or_else(|| {
            "<html><head><title>T</title></head><body>ok</body></html>".into()
        }))
    }

    async fn title(&mut self) -> Result<Option<String>, ScrapeError> {
        Ok(Some(self.script.title.clone().unwrap_or_else(|| "T".into())))
    }

    async fn current_url(&mut self) -> Result<Option<String>, ScrapeError> {
        Ok(None)
    }

    async fn screenshot(&mut self, clip: ClipRegion) -> Result<Vec<u8>, ScrapeError> {
        assert!(clip.width <= 1200 && clip.height <= 800);
        Ok(FAKE_PNG.to_vec())
    }

    async fn close(&mut self) -> Result<(), ScrapeError> {
        self.recorder.record("page.close");
        if self.script.fail_page_close {
            return Err(ScrapeError::PageError("page close exploded".into()));
        }
        self.recorder.page_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
