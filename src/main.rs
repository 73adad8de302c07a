//! Remote-controlled LED strip.
//!
//! Plays seasonal animations on a WS2812 strip and switches between them
//! when the value of an Adafruit IO feed changes (a pattern name, its index,
//! or `off`).
//!
//! ## Architecture
//! - **Pattern thread** (std::thread): owns the strip, polls the feed, steps patterns
//! - **Status server** (tokio/axum, optional): read-only view of the loop
//!
//! Ctrl-C or any line on stdin stops the loop; the strip keeps its last frame.
//!
//! ## Usage
//! ```sh
//! AIO_USERNAME=me AIO_KEY=... ./target/release/led-strip-rs --status-port 8080
//! ./target/release/led-strip-rs --dry-run --initial xmas
//! ```

use clap::Parser;
use led_strip_rs::clock::SystemClock;
use led_strip_rs::control::{ControlLoop, LoopConfig, LoopStatus};
use led_strip_rs::pattern::Timing;
use led_strip_rs::registry::{PatternRegistry, Resolution, Selection};
use led_strip_rs::remote::{
    AdafruitIo, DEFAULT_BASE_URL, DEFAULT_FEED, FeedConfig, RemoteSelector, StaticSelector,
};
use led_strip_rs::server::{self, AppState};
use led_strip_rs::strip::{LedStrip, LogDriver, PixelBuffer, StripDriver};
use led_strip_rs::{Shutdown, StripConfig, setup_signal_handler};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Remote-selectable pattern player for a WS2812 LED strip
#[derive(Parser, Debug)]
#[command(name = "led-strip-rs")]
#[command(version)]
struct Args {
    /// Number of pixels on the strip
    #[arg(long, env = "LED_COUNT", default_value_t = 90)]
    len: usize,

    /// Output brightness in percent
    #[arg(long, env = "LED_BRIGHTNESS", default_value_t = 30,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    brightness: u8,

    /// Selectable patterns; position in this list is the numeric token
    #[arg(
        long,
        env = "PATTERNS",
        value_delimiter = ',',
        default_value = "fall,july,xmas,normal,alert,blue,pink"
    )]
    patterns: Vec<String>,

    /// Pattern (name, index or "off") to run before the feed says otherwise
    #[arg(long, env = "INITIAL_PATTERN", default_value = "0")]
    initial: String,

    /// Milliseconds between feed polls
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 500)]
    poll_interval_ms: u64,

    /// Milliseconds to hold the blank strip when switching patterns
    #[arg(long, env = "SETTLE_MS", default_value_t = 200)]
    settle_ms: u64,

    /// Milliseconds to back off after a failed pattern step
    #[arg(long, env = "FAULT_BACKOFF_MS", default_value_t = 100)]
    fault_backoff_ms: u64,

    /// Minimum milliseconds between frames of fast patterns
    #[arg(long, env = "FAST_INTERVAL_MS", default_value_t = 50)]
    fast_interval_ms: u64,

    /// Minimum milliseconds between frames of slow patterns
    #[arg(long, env = "SLOW_INTERVAL_MS", default_value_t = 100)]
    slow_interval_ms: u64,

    /// Scale effect waits in percent (50 plays effects twice as fast)
    #[arg(long, env = "EFFECT_WAIT_PERCENT", default_value_t = 100)]
    wait_percent: u32,

    /// Adafruit IO username
    #[arg(long, env = "AIO_USERNAME")]
    aio_username: Option<String>,

    /// Adafruit IO key
    #[arg(long, env = "AIO_KEY", hide_env_values = true)]
    aio_key: Option<String>,

    /// Feed holding the selection
    #[arg(long, env = "AIO_FEED", default_value = DEFAULT_FEED)]
    aio_feed: String,

    /// Adafruit IO base URL
    #[arg(long, env = "AIO_BASE_URL", default_value = DEFAULT_BASE_URL)]
    aio_base_url: String,

    /// Timeout for each feed request, in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 5)]
    http_timeout_secs: u64,

    /// SPI device the strip's data line is wired to
    #[arg(long, env = "SPI_DEVICE", default_value = "/dev/spidev0.0")]
    spi_device: PathBuf,

    /// Serve the status API on this port
    #[arg(long, env = "STATUS_PORT")]
    status_port: Option<u16>,

    /// Log frames instead of driving hardware
    #[arg(long)]
    dry_run: bool,

    /// Print the feed's latest value and exit
    #[arg(long)]
    check_feed: bool,
}

impl Args {
    fn feed_config(&self) -> Option<FeedConfig> {
        match (&self.aio_username, &self.aio_key) {
            (Some(user), Some(key)) => {
                let mut feed = FeedConfig::new(user.as_str(), key.as_str());
                feed.base_url = self.aio_base_url.clone();
                feed.feed = self.aio_feed.clone();
                feed.timeout = Duration::from_secs(self.http_timeout_secs);
                Some(feed)
            }
            (None, None) => None,
            _ => {
                tracing::warn!("Both AIO_USERNAME and AIO_KEY are needed, ignoring the feed");
                None
            }
        }
    }

    fn timing(&self) -> Timing {
        Timing {
            fast_interval: Duration::from_millis(self.fast_interval_ms),
            slow_interval: Duration::from_millis(self.slow_interval_ms),
        }
    }

    fn loop_config(&self, initial: Selection) -> LoopConfig {
        LoopConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            settle_delay: Duration::from_millis(self.settle_ms),
            fault_backoff: Duration::from_millis(self.fault_backoff_ms),
            wait_percent: self.wait_percent,
            initial,
            ..LoopConfig::default()
        }
    }
}

/// Everything the pattern thread needs, moved in at spawn.
struct LoopSettings {
    strip: StripConfig,
    timing: Timing,
    config: LoopConfig,
    feed: Option<FeedConfig>,
    spi_device: PathBuf,
    dry_run: bool,
}

fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false) // journald
        .compact()
        .init();

    if args.check_feed {
        return check_feed(&args);
    }

    let registry = PatternRegistry::from_names(&args.patterns)?;
    let initial = match registry.resolve(&args.initial) {
        Resolution::Off => Selection::Off,
        Resolution::Pattern(i) => Selection::Pattern(i),
        Resolution::Unchanged => {
            return Err(format!("initial pattern {:?} is not registered", args.initial).into());
        }
    };

    let settings = LoopSettings {
        strip: StripConfig::new(args.len, args.brightness),
        timing: args.timing(),
        config: args.loop_config(initial),
        feed: args.feed_config(),
        spi_device: args.spi_device.clone(),
        dry_run: args.dry_run,
    };

    tracing::info!("LED strip v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Strip: {} pixels at {}% brightness",
        settings.strip.len,
        settings.strip.brightness
    );
    tracing::info!(
        "Patterns: {}",
        registry.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
    );
    match &settings.feed {
        Some(feed) => tracing::info!("Feed: {}/{}", feed.username, feed.feed),
        None => tracing::info!("Feed: none, running offline"),
    }

    let shutdown = setup_signal_handler()?;
    shutdown.watch_stdin();

    let status = Arc::new(Mutex::new(LoopStatus::new()));
    let app_state = AppState::new(status.clone(), &registry, &settings.timing);

    let loop_shutdown = shutdown.clone();
    let pattern_thread = thread::Builder::new()
        .name("pattern-loop".to_string())
        .spawn(move || {
            let result = run_pattern_loop(settings, registry, status, loop_shutdown.clone());
            if let Err(e) = &result {
                tracing::error!("Pattern loop failed: {}", e);
            }
            // take the status server down with us
            loop_shutdown.trigger();
            result
        })?;

    if let Some(port) = args.status_port {
        if let Err(e) = serve_status(port, app_state, shutdown.clone()) {
            tracing::error!("Status server failed: {}", e);
        }
    }

    pattern_thread
        .join()
        .map_err(|_| "pattern loop thread panicked")??;
    Ok(())
}

/// One-shot connectivity check against the configured feed.
fn check_feed(args: &Args) -> Result<(), BoxError> {
    let feed = args
        .feed_config()
        .ok_or("--check-feed needs AIO_USERNAME and AIO_KEY")?;
    tracing::info!("Reading {}/{} from {}", feed.username, feed.feed, feed.base_url);

    let name = feed.feed.clone();
    let io = AdafruitIo::new(feed)?;
    match io.latest()? {
        Some(datum) => println!(
            "{}: {:?} (created {})",
            name,
            datum.value.unwrap_or_default(),
            datum.created_at.as_deref().unwrap_or("unknown")
        ),
        None => println!("{name}: no data yet"),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn serve_status(port: u16, state: AppState, shutdown: Shutdown) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Status API on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/docs", port);
    server::serve(listener, state, shutdown).await
}

// ── Pattern thread ───────────────────────────────────────────────────

fn run_pattern_loop(
    settings: LoopSettings,
    registry: PatternRegistry,
    status: Arc<Mutex<LoopStatus>>,
    shutdown: Shutdown,
) -> Result<(), BoxError> {
    #[cfg(feature = "hardware")]
    if !settings.dry_run {
        let driver = led_strip_rs::strip::open_spi_driver(&settings.spi_device)?;
        tracing::info!("Driving WS2812 strip on {}", settings.spi_device.display());
        return with_driver(driver, settings, registry, status, shutdown);
    }

    #[cfg(not(feature = "hardware"))]
    if !settings.dry_run {
        tracing::warn!(
            "Built without the hardware feature, not opening {}",
            settings.spi_device.display()
        );
    }

    tracing::info!("Dry run: frames are logged at trace level");
    with_driver(LogDriver::new(), settings, registry, status, shutdown)
}

fn with_driver<D: StripDriver>(
    driver: D,
    settings: LoopSettings,
    registry: PatternRegistry,
    status: Arc<Mutex<LoopStatus>>,
    shutdown: Shutdown,
) -> Result<(), BoxError> {
    let strip = PixelBuffer::new(settings.strip.len, settings.strip.brightness, driver);
    let initial_name = registry.display_name(settings.config.initial);

    match settings.feed.clone() {
        Some(feed) => {
            let mut io = AdafruitIo::new(feed)?;
            io.initialize(initial_name);
            drive(strip, io, settings, registry, status, shutdown);
        }
        None => {
            let selector = StaticSelector::new(initial_name);
            drive(strip, selector, settings, registry, status, shutdown);
        }
    }
    Ok(())
}

fn drive<S: LedStrip, R: RemoteSelector>(
    strip: S,
    remote: R,
    settings: LoopSettings,
    registry: PatternRegistry,
    status: Arc<Mutex<LoopStatus>>,
    shutdown: Shutdown,
) {
    ControlLoop::new(
        registry,
        strip,
        remote,
        SystemClock::new(),
        shutdown,
        settings.timing,
        settings.config,
    )
    .with_status(status)
    .run();
}
