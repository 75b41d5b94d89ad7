use crate::{
    format_bytes, format_duration, Admission, AdmissionGuard, AppState, Config,
    ContentClassifier, DynamicRenderer, PatternClassifier, PrometheusExporter, StaticFetcher,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "markup-scraper")]
#[command(about = "SSRF-guarded static and headless-browser page retrieval")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Static fetch timeout in milliseconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Maximum document size in bytes")]
    pub max_size: Option<usize>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        #[arg(long, help = "Bind address (default from config)")]
        bind: Option<String>,

        #[arg(long, help = "Expose Prometheus metrics at /metrics")]
        metrics: bool,
    },

    /// Fetch a page over plain HTTP and classify it
    Fetch {
        #[arg(short, long, help = "URL to fetch")]
        url: String,

        #[arg(short, long, help = "Write the HTML here instead of stdout")]
        output: Option<PathBuf>,
    },

    /// Render a page in headless Chrome
    Render {
        #[arg(short, long, help = "URL to render")]
        url: String,

        #[arg(short, long, help = "Write the rendered HTML here instead of stdout")]
        output: Option<PathBuf>,

        #[arg(long, help = "Write the PNG screenshot to this path")]
        screenshot: Option<PathBuf>,
    },

    /// Report whether a URL would be admitted
    Check {
        #[arg(short, long, help = "URL to check")]
        url: String,
    },

    /// Validate configuration
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

pub struct CliRunner {
    pub config: Config,
    guard: AdmissionGuard,
}

impl CliRunner {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let guard = AdmissionGuard::new(&config.admission)?;
        Ok(Self { config, guard })
    }

    /// Run `command` until it finishes or `shutdown` fires. A server drains
    /// open requests and a render closes its browser before this returns.
    pub async fn run(
        &self,
        command: Commands,
        shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        match command {
            Commands::Serve { bind, metrics } => {
                self.run_server(bind, metrics, shutdown_signal(shutdown))
                    .await
            }
            Commands::Fetch { url, output } => {
                tokio::select! {
                    result = self.run_fetch(&url, output.as_deref()) => result,
                    _ = shutdown_signal(shutdown) => {
                        info!("Fetch interrupted by shutdown");
                        Ok(())
                    }
                }
            }
            Commands::Render {
                url,
                output,
                screenshot,
            } => {
                self.run_render(
                    &url,
                    output.as_deref(),
                    screenshot.as_deref(),
                    shutdown_signal(shutdown),
                )
                .await
            }
            Commands::Check { url } => self.run_check(&url).await,
            Commands::Validate { config } => validate_config_file(&config).await,
        }
    }

    pub async fn run_server<F>(
        &self,
        bind: Option<String>,
        metrics: bool,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let bind = bind.unwrap_or_else(|| self.config.server.bind.clone());

        let renderer = DynamicRenderer::chrome(self.config.clone());
        let mut state = AppState::new(&self.config, renderer)?;
        if metrics {
            state = state.with_exporter(PrometheusExporter::install()?);
        }

        crate::serve(state, &bind, shutdown).await
    }

    pub async fn run_fetch(&self, raw_url: &str, output: Option<&Path>) -> anyhow::Result<()> {
        let url = self.guard.admit(raw_url).await.into_result()?;
        let fetcher = StaticFetcher::new(&self.config, &self.guard)?;

        info!("Fetching {}", url);
        let document = fetcher.fetch(&url).await?;
        let classification = PatternClassifier::new().classify(&document.html);

        if classification.is_js_rendered {
            warn!(
                "{} looks JavaScript-rendered (sparse body: {}, marker: {:?})",
                url, classification.sparse_body, classification.framework_marker
            );
        }

        write_or_print(output, &document.html).await?;

        eprintln!("Fetched {}", url);
        eprintln!("  Status: {}", document.status);
        eprintln!("  Size: {}", format_bytes(document.byte_length));
        eprintln!("  Duration: {}", format_duration(document.duration));
        eprintln!("  JS rendered: {}", classification.is_js_rendered);

        Ok(())
    }

    pub async fn run_render<F>(
        &self,
        raw_url: &str,
        output: Option<&Path>,
        screenshot: Option<&Path>,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let url = self.guard.admit(raw_url).await.into_result()?;
        let renderer = DynamicRenderer::chrome(self.config.clone());

        info!("Rendering {}", url);
        let document = renderer.render_until(&url, shutdown).await?;

        if let Some(path) = screenshot {
            fs::write(path, &document.screenshot)
                .await
                .with_context(|| format!("writing screenshot to {}", path.display()))?;
        }
        write_or_print(output, &document.html).await?;

        eprintln!("Rendered {}", url);
        eprintln!("  Title: {}", document.title);
        eprintln!("  Size: {}", format_bytes(document.byte_length));
        eprintln!("  Render time: {}", format_duration(document.render_time));
        if let Some(final_url) = &document.final_url {
            eprintln!("  Final URL: {final_url}");
        }

        Ok(())
    }

    pub async fn run_check(&self, raw_url: &str) -> anyhow::Result<()> {
        match self.guard.admit(raw_url).await {
            Admission::Allowed(url) => {
                println!("allowed: {} (host {})", url.normalized_href(), url.hostname());
                Ok(())
            }
            Admission::Rejected(reason) => {
                println!("rejected: {reason}");
                Err(anyhow::anyhow!("URL rejected: {reason}"))
            }
        }
    }
}

/// Resolves once a shutdown is broadcast. A closed channel means no signal
/// handler is installed, so it never resolves.
async fn shutdown_signal(mut shutdown: broadcast::Receiver<()>) {
    match shutdown.recv().await {
        Ok(()) | Err(RecvError::Lagged(_)) => {}
        Err(RecvError::Closed) => std::future::pending().await,
    }
}

async fn write_or_print(output: Option<&Path>, html: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(path, html)
                .await
                .with_context(|| format!("writing HTML to {}", path.display()))?;
            info!("HTML saved to: {}", path.display());
        }
        None => println!("{html}"),
    }
    Ok(())
}

pub async fn validate_config_file(path: &Path) -> anyhow::Result<()> {
    println!("Validating configuration: {}", path.display());

    let config = Config::from_file(path).await?;
    config.validate()?;
    AdmissionGuard::new(&config.admission)?;

    println!("Configuration is valid:");
    println!("  Max response size: {}", format_bytes(config.max_response_size));
    println!("  Fetch timeout: {:?}", config.fetch_timeout);
    println!("  Navigation timeout: {:?}", config.navigation_timeout);
    println!(
        "  Viewport: {}x{}",
        config.viewport.width, config.viewport.height
    );
    let clip = config.effective_clip();
    println!("  Screenshot clip: {}x{}", clip.width, clip.height);
    println!(
        "  Blocked patterns: {}, blocked hosts: {}",
        config.admission.blocked_patterns.len(),
        config.admission.blocked_hosts.len()
    );

    Ok(())
}

/// Apply command-line overrides on top of a loaded configuration.
pub fn apply_overrides(config: &mut Config, args: &Cli) {
    if let Some(timeout) = args.timeout {
        config.fetch_timeout = Duration::from_millis(timeout);
    }
    if let Some(max_size) = args.max_size {
        config.max_response_size = max_size;
    }
    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = Some(chrome_path.clone());
    }
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
