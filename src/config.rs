//! Configuration management with serde serialization/deserialization
//!
//! Every threshold the retrieval core depends on (size ceiling, timeouts,
//! viewport, deny-list) lives in one immutable [`Config`] value that is handed
//! to each component at construction. Tests build their own `Config` instead of
//! touching globals.

use crate::ScrapeError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Desktop Chrome User-Agent sent by both retrieval paths.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Main configuration structure for the scraper
///
/// # Examples
///
/// ```rust
/// use markup_scraper::Config;
/// use std::time::Duration;
///
/// // Reference behaviour
/// let config = Config::default();
/// assert_eq!(config.max_response_size, 1024 * 1024);
///
/// // Tighter limits for a constrained deployment
/// let config = Config {
///     max_response_size: 256 * 1024,
///     fetch_timeout: Duration::from_secs(2),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Hard ceiling on retrieved document size in bytes (default: 1 MiB)
    ///
    /// Applies to the streamed body on the static path and to the rendered
    /// markup on the dynamic path. Oversized documents are discarded.
    pub max_response_size: usize,

    /// Wall-clock budget for a static fetch, body included (default: 5 seconds)
    pub fetch_timeout: Duration,

    /// Budget for page navigation plus network quiescence (default: 10 seconds)
    pub navigation_timeout: Duration,

    /// Fixed wait after navigation before extraction (default: 2 seconds)
    pub settle_delay: Duration,

    /// When the page counts as network-idle
    pub network_idle: NetworkIdleSettings,

    /// Browser viewport used for dynamic rendering
    pub viewport: Viewport,

    /// Screenshot clip region, anchored at the top-left of the viewport
    pub screenshot_clip: ClipRegion,

    /// User-Agent string for both the HTTP client and the browser page
    pub user_agent: String,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// URL admission rules
    pub admission: AdmissionConfig,

    /// HTTP server settings
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_response_size: 1024 * 1024, // 1MB
            fetch_timeout: Duration::from_millis(5000),
            navigation_timeout: Duration::from_millis(10_000),
            settle_delay: Duration::from_millis(2000),
            network_idle: NetworkIdleSettings::default(),
            viewport: Viewport::default(),
            screenshot_clip: ClipRegion::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            chrome_path: None,
            admission: AdmissionConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file; missing fields take defaults.
    pub async fn from_file(path: &Path) -> Result<Self, ScrapeError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.max_response_size == 0 {
            return Err(ScrapeError::ConfigurationError(
                "Max response size must be greater than 0".to_string(),
            ));
        }

        if self.fetch_timeout.is_zero() || self.navigation_timeout.is_zero() {
            return Err(ScrapeError::ConfigurationError(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(ScrapeError::ConfigurationError(
                "Viewport dimensions must be greater than 0".to_string(),
            ));
        }

        if self.screenshot_clip.width == 0 || self.screenshot_clip.height == 0 {
            return Err(ScrapeError::ConfigurationError(
                "Screenshot clip dimensions must be greater than 0".to_string(),
            ));
        }

        if self.user_agent.trim().is_empty() {
            return Err(ScrapeError::ConfigurationError(
                "User agent must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// The clip actually applied, never larger than the viewport.
    pub fn effective_clip(&self) -> ClipRegion {
        ClipRegion {
            width: self.screenshot_clip.width.min(self.viewport.width),
            height: self.screenshot_clip.height.min(self.viewport.height),
        }
    }
}

/// Browser viewport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Viewport {
    /// Viewport width in pixels (default: 1920)
    pub width: u32,

    /// Viewport height in pixels (default: 1080)
    pub height: u32,

    /// Device pixel ratio (default: 1.0)
    pub device_scale_factor: f64,

    /// Whether to emulate mobile device (default: false)
    pub mobile: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            device_scale_factor: 1.0,
            mobile: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClipRegion {
    pub width: u32,
    pub height: u32,
}

impl Default for ClipRegion {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
        }
    }
}

/// Network quiescence thresholds for dynamic navigation
///
/// Navigation is complete once no more than `max_inflight` requests have been
/// outstanding for `quiet_period`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkIdleSettings {
    pub max_inflight: usize,
    pub quiet_period: Duration,
}

impl Default for NetworkIdleSettings {
    fn default() -> Self {
        Self {
            max_inflight: 2,
            quiet_period: Duration::from_millis(500),
        }
    }
}

/// URL admission rules
///
/// Patterns are regular expressions matched against the lower-cased
/// hostname (IPv6 literals without brackets). Matching is lexical only.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Private, loopback and link-local address patterns
    pub blocked_patterns: Vec<String>,

    /// Exact hostnames rejected even when no pattern catches them
    pub blocked_hosts: Vec<String>,

    /// Resolve hostnames and reject private resolved addresses (default: false)
    pub resolve_hosts: bool,

    /// Re-admit every redirect hop on the static path (default: false)
    pub revalidate_redirects: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            blocked_patterns: vec![
                r"^localhost$".to_string(),
                r"^127\.".to_string(),
                r"^10\.".to_string(),
                r"^172\.(1[6-9]|2[0-9]|3[0-1])\.".to_string(),
                r"^192\.168\.".to_string(),
                r"^169\.254\.".to_string(),
                r"^::1$".to_string(),
                r"^fe80:".to_string(),
                r"^f[cd][0-9a-f]{2}:".to_string(),
            ],
            blocked_hosts: vec![
                "localhost".to_string(),
                "0.0.0.0".to_string(),
                "127.0.0.1".to_string(),
            ],
            resolve_hosts: false,
            revalidate_redirects: false,
        }
    }
}

impl AdmissionConfig {
    /// Rules that admit every http(s) host, for local fixtures.
    pub fn allow_all() -> Self {
        Self {
            blocked_patterns: Vec::new(),
            blocked_hosts: Vec::new(),
            resolve_hosts: false,
            revalidate_redirects: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to (default: 0.0.0.0:3000)
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Generate Chrome command-line arguments for a single isolated render
///
/// Suited to a restricted serverless sandbox: no GPU, no shared memory, no
/// background networking, extensions or sync.
///
/// # Examples
///
/// ```rust
/// use markup_scraper::{Config, get_chrome_args};
///
/// let args = get_chrome_args(&Config::default());
/// assert!(args.contains(&"--headless".to_string()));
/// ```
pub fn get_chrome_args(config: &Config) -> Vec<String> {
    vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--no-zygote".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--disable-plugins".to_string(),
        "--no-first-run".to_string(),
        "--mute-audio".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
        format!("--user-agent={}", config.user_agent),
    ]
}

/// Build the chromiumoxide launch configuration for one render session
///
/// `profile_dir` is a throwaway user-data directory owned by the session.
pub fn create_browser_config(
    config: &Config,
    profile_dir: &Path,
) -> Result<chromiumoxide::browser::BrowserConfig, ScrapeError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.viewport.width, config.viewport.height)
        .user_data_dir(profile_dir)
        .args(get_chrome_args(config));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder
        .build()
        .map_err(ScrapeError::RenderEngineUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_values() {
        let config = Config::default();
        assert_eq!(config.max_response_size, 1_048_576);
        assert_eq!(config.fetch_timeout, Duration::from_millis(5000));
        assert_eq!(config.navigation_timeout, Duration::from_millis(10_000));
        assert_eq!(config.settle_delay, Duration::from_millis(2000));
        assert_eq!(config.screenshot_clip, ClipRegion { width: 1200, height: 800 });
        assert!(!config.admission.resolve_hosts);
        assert!(!config.admission.revalidate_redirects);
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let config = Config {
            max_response_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ScrapeError::ConfigurationError(_))
        ));
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_effective_clip_is_bounded_by_viewport() {
        let config = Config {
            viewport: Viewport {
                width: 800,
                height: 600,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.effective_clip(), ClipRegion { width: 800, height: 600 });
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"max_response_size": 2048}"#).unwrap();
        assert_eq!(config.max_response_size, 2048);
        assert_eq!(config.viewport.width, 1920);
        assert_eq!(config.admission.blocked_hosts.len(), 3);
    }
}
