// ABOUTME: Listening client configuration
// ABOUTME: Server endpoint, media base URL, transition and resync behaviour

use crate::server::TransitionStyle;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Crossfade window used when a fade is requested but none is configured
pub const DEFAULT_CROSSFADE_WINDOW: Duration = Duration::from_secs(1);

/// How the client re-aligns when a `sync-time` correction arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResyncPolicy {
    /// Restart playback at the corrected offset immediately
    #[default]
    HardCut,
    /// Fade from the drifted position to the corrected one
    Crossfade,
}

impl fmt::Display for ResyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResyncPolicy::HardCut => write!(f, "hard-cut"),
            ResyncPolicy::Crossfade => write!(f, "crossfade"),
        }
    }
}

impl FromStr for ResyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hard-cut" | "hardcut" | "cut" => Ok(ResyncPolicy::HardCut),
            "crossfade" | "fade" => Ok(ResyncPolicy::Crossfade),
            other => Err(format!("unknown resync policy: {}", other)),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the event channel
    pub server_url: String,
    /// Base URL relative source refs are fetched from; derived from `server_url` when unset
    pub media_base_url: Option<String>,
    /// How `track-change` events are applied
    pub transition: TransitionStyle,
    /// How `sync-time` corrections are applied
    pub resync: ResyncPolicy,
    /// Ask the server for its position this often
    pub sync_interval: Option<Duration>,
    /// Wait between reconnection attempts
    pub reconnect_delay: Duration,
    /// Begin muted
    pub start_muted: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3001/radio".to_string(),
            media_base_url: None,
            transition: TransitionStyle::Cut,
            resync: ResyncPolicy::HardCut,
            sync_interval: None,
            reconnect_delay: Duration::from_secs(2),
            start_muted: false,
        }
    }
}

impl ClientConfig {
    /// Config for the given event channel URL
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Set the media base URL
    pub fn media_base_url(mut self, url: impl Into<String>) -> Self {
        self.media_base_url = Some(url.into());
        self
    }

    /// Set the track-change transition
    pub fn transition(mut self, transition: TransitionStyle) -> Self {
        self.transition = transition;
        self
    }

    /// Set the resync policy
    pub fn resync(mut self, resync: ResyncPolicy) -> Self {
        self.resync = resync;
        self
    }

    /// Poll the server position periodically
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval).filter(|d| !d.is_zero());
        self
    }

    /// Set the reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Begin muted
    pub fn start_muted(mut self, muted: bool) -> Self {
        self.start_muted = muted;
        self
    }

    /// Length of a crossfade, whichever path requested it
    pub fn crossfade_window(&self) -> Duration {
        let window = self.transition.window();
        if window.is_zero() {
            DEFAULT_CROSSFADE_WINDOW
        } else {
            window
        }
    }

    /// Base URL for fetching tracks
    ///
    /// Without an explicit value, `ws://host:port/path` becomes `http://host:port`.
    pub fn media_base(&self) -> String {
        if let Some(url) = &self.media_base_url {
            return url.clone();
        }

        let (scheme, rest) = if let Some(rest) = self.server_url.strip_prefix("wss://") {
            ("https", rest)
        } else if let Some(rest) = self.server_url.strip_prefix("ws://") {
            ("http", rest)
        } else {
            ("http", self.server_url.as_str())
        };
        let authority = rest.split('/').next().unwrap_or(rest);
        format!("{}://{}", scheme, authority)
    }
}
