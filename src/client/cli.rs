// ABOUTME: CLI arguments for the listening client
// ABOUTME: Turns listener flags into a ClientConfig

use crate::client::config::{ClientConfig, ResyncPolicy};
use crate::server::TransitionStyle;
use clap::Args;
use std::time::Duration;

/// Listener arguments, flattened into the `liveradio` binary
#[derive(Args, Debug, Clone)]
pub struct ListenerArgs {
    /// Event channel URL
    #[arg(short, long, default_value = "ws://127.0.0.1:3001/radio")]
    pub server: String,

    /// Base URL for track files (defaults to the server's host)
    #[arg(long)]
    pub media_base: Option<String>,

    /// Track-change handling: "cut" or "crossfade:<seconds>"
    #[arg(short, long, default_value = "cut")]
    pub transition: TransitionStyle,

    /// Resync handling: "hard-cut" or "crossfade"
    #[arg(long, default_value = "hard-cut")]
    pub resync: ResyncPolicy,

    /// Request the server position every N seconds (0 disables)
    #[arg(long, default_value = "0")]
    pub sync_interval: u64,

    /// Wait between reconnection attempts, in milliseconds
    #[arg(long, default_value = "2000")]
    pub reconnect_delay_ms: u64,

    /// Start muted
    #[arg(long)]
    pub muted: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl ListenerArgs {
    /// Initialize tracing based on verbosity flag
    pub fn init_tracing(&self) {
        crate::server::init_tracing(self.verbose);
    }

    /// Build ClientConfig from these args
    pub fn build_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.server.clone())
            .transition(self.transition)
            .resync(self.resync)
            .sync_interval(Duration::from_secs(self.sync_interval))
            .reconnect_delay(Duration::from_millis(self.reconnect_delay_ms))
            .start_muted(self.muted);
        if let Some(base) = &self.media_base {
            config = config.media_base_url(base.clone());
        }
        config
    }
}
