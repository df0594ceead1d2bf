// ABOUTME: Server configuration
// ABOUTME: Defines configurable parameters for the broadcast server

use crate::protocol::track::FALLBACK_DURATION_SECS;
use crate::server::playlist::{LoaderOptions, DEFAULT_COVER_ART_LIMIT};
use crate::server::scheduler::{SchedulerConfig, TransitionStyle};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// WebSocket endpoint path
    pub ws_path: String,
    /// Directory scanned for audio files
    pub music_dir: PathBuf,
    /// URL path the music directory is served under
    pub music_route: String,
    /// Cut or crossfade hand-over between tracks
    pub transition: TransitionStyle,
    /// Duration assumed for tracks without readable metadata, in seconds
    pub fallback_duration: f64,
    /// Shortest delay ever scheduled between two advances
    pub minimum_delay: Duration,
    /// Embedded cover art at or above this many bytes is dropped
    pub cover_art_limit: usize,
}

impl ServerConfig {
    /// Create a new server configuration broadcasting the given directory
    pub fn new(music_dir: impl Into<PathBuf>) -> Self {
        Self {
            music_dir: music_dir.into(),
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the WebSocket path
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Set the URL path for the music directory
    pub fn music_route(mut self, route: impl Into<String>) -> Self {
        self.music_route = route.into();
        self
    }

    /// Set the transition style
    pub fn transition(mut self, transition: TransitionStyle) -> Self {
        self.transition = transition;
        self
    }

    /// Set the fallback duration in seconds (ignored unless positive)
    pub fn fallback_duration(mut self, secs: f64) -> Self {
        if secs.is_finite() && secs > 0.0 {
            self.fallback_duration = secs;
        }
        self
    }

    /// Set the minimum delay between advances
    pub fn minimum_delay(mut self, delay: Duration) -> Self {
        self.minimum_delay = delay;
        self
    }

    /// Scheduler settings derived from this configuration
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            transition: self.transition,
            fallback_duration: self.fallback_duration,
            minimum_delay: self.minimum_delay,
        }
    }

    /// Playlist loader settings derived from this configuration
    pub fn loader(&self) -> LoaderOptions {
        LoaderOptions {
            music_route: self.music_route.clone(),
            fallback_duration: self.fallback_duration,
            cover_art_limit: self.cover_art_limit,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 3001)),
            ws_path: "/radio".to_string(),
            music_dir: PathBuf::from("./music"),
            music_route: "/music".to_string(),
            transition: TransitionStyle::Cut,
            fallback_duration: FALLBACK_DURATION_SECS,
            minimum_delay: Duration::from_secs(1),
            cover_art_limit: DEFAULT_COVER_ART_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_feeds_scheduler_and_loader() {
        let config = ServerConfig::new("/srv/music")
            .music_route("/audio/")
            .transition(TransitionStyle::Crossfade { window_secs: 3.0 })
            .fallback_duration(-1.0);

        assert_eq!(config.fallback_duration, FALLBACK_DURATION_SECS);
        assert_eq!(config.scheduler().transition.window(), Duration::from_secs(3));
        assert_eq!(config.loader().music_route, "/audio/");
        assert_eq!(config.bind_addr.port(), 3001);
    }
}
