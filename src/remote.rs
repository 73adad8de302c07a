//! Remote pattern selection through an Adafruit IO feed.
//!
//! The feed holds a single text value: a pattern name, a pattern index or
//! `off`. The control loop polls it with `RemoteSelector::get` and writes the
//! active pattern back with `publish`. Neither call ever fails from the
//! loop's point of view: transport problems are logged and the last known
//! value is returned instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://io.adafruit.com";
pub const DEFAULT_FEED: &str = "neopixel-pattern";

/// Source of selection tokens.
pub trait RemoteSelector {
    /// Latest selection token, or the last known one if the feed is unreachable.
    fn get(&mut self) -> String;

    /// Best-effort report of the active selection.
    fn publish(&mut self, name: &str);
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection, TLS or timeout failure.
    Transport(String),
    /// The service answered with an unexpected HTTP status.
    Status(u16),
    /// The response body was not the JSON we expected.
    Decode(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Status(code) => write!(f, "unexpected HTTP status {code}"),
            Self::Decode(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for RemoteError {}

// ── Offline selector ─────────────────────────────────────────────────

/// Always answers with the same token; used when no feed is configured.
#[derive(Debug, Clone)]
pub struct StaticSelector {
    token: String,
}

impl StaticSelector {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl RemoteSelector for StaticSelector {
    fn get(&mut self) -> String {
        self.token.clone()
    }

    fn publish(&mut self, name: &str) {
        tracing::debug!("Offline, not publishing {}", name);
    }
}

// ── Adafruit IO ──────────────────────────────────────────────────────

/// Connection settings for one Adafruit IO feed.
#[derive(Clone)]
pub struct FeedConfig {
    pub base_url: String,
    pub username: String,
    pub key: String,
    pub feed: String,
    pub timeout: Duration,
}

impl FeedConfig {
    pub fn new(username: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            username: username.into(),
            key: key.into(),
            feed: DEFAULT_FEED.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    fn feed_url(&self) -> String {
        format!(
            "{}/api/v2/{}/feeds/{}/data",
            self.base_url.trim_end_matches('/'),
            self.username,
            self.feed
        )
    }
}

impl fmt::Debug for FeedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("key", &"<redacted>")
            .field("feed", &self.feed)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One data point of a feed, as returned by `GET .../data/last`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedDatum {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Serialize)]
struct NewDatum<'a> {
    value: &'a str,
}

/// Blocking Adafruit IO REST client.
///
/// Blocking on purpose: it is only used from the control loop thread, which
/// is single-threaded and cooperative anyway.
pub struct AdafruitIo {
    client: reqwest::blocking::Client,
    config: FeedConfig,
    last_known: String,
}

impl AdafruitIo {
    pub fn new(config: FeedConfig) -> Result<Self, RemoteError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            config,
            last_known: String::new(),
        })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Most recent value of the feed; `None` if the feed has no data yet.
    pub fn latest(&self) -> Result<Option<FeedDatum>, RemoteError> {
        let url = format!("{}/last", self.config.feed_url());
        let response = self
            .client
            .get(&url)
            .header("X-AIO-Key", &self.config.key)
            .send()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        response
            .json::<Option<FeedDatum>>()
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// Append a value to the feed.
    pub fn send(&self, value: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.config.feed_url())
            .header("X-AIO-Key", &self.config.key)
            .json(&NewDatum { value })
            .send()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            200 | 201 => Ok(()),
            code => Err(RemoteError::Status(code)),
        }
    }

    /// Seed the feed with `default_name` when it is empty or unreadable, so
    /// the dashboard starts out showing what the strip is doing.
    pub fn initialize(&mut self, default_name: &str) {
        match self.latest() {
            Ok(Some(datum)) if datum.value.as_deref().is_some_and(|v| !v.trim().is_empty()) => {
                tracing::debug!("Feed already holds {:?}", datum.value);
            }
            Ok(_) | Err(RemoteError::Status(_)) => {
                self.publish(default_name);
                tracing::info!("Initialized feed with default pattern: {}", default_name);
            }
            Err(e) => tracing::warn!("Could not initialize feed: {}", e),
        }
    }
}

impl RemoteSelector for AdafruitIo {
    fn get(&mut self) -> String {
        match self.latest() {
            Ok(Some(FeedDatum {
                value: Some(value), ..
            })) => {
                tracing::trace!("Feed value: {:?}", value);
                self.last_known = value;
            }
            Ok(_) => tracing::trace!("Feed is empty"),
            Err(e) => tracing::warn!("Error polling feed {}: {}", self.config.feed, e),
        }
        self.last_known.clone()
    }

    fn publish(&mut self, name: &str) {
        match self.send(name) {
            Ok(()) => tracing::info!("Status sent to feed: {}", name),
            Err(e) => tracing::warn!("Failed to send status {}: {}", name, e),
        }
    }
}
