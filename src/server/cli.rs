// ABOUTME: Shared CLI argument parsing and logging setup
// ABOUTME: Consolidates server flags into a ServerConfig and initializes tracing for the binaries

use crate::server::{ServerConfig, TransitionStyle};
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server arguments
///
/// Use with `#[command(flatten)]` in a binary's Args struct:
/// ```ignore
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     server: ServerArgs,
/// }
/// ```
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address to bind the server to
    #[arg(short, long, default_value = "0.0.0.0:3001")]
    pub bind: SocketAddr,

    /// Directory of audio files to broadcast
    #[arg(short, long, default_value = "./music")]
    pub music_dir: PathBuf,

    /// WebSocket endpoint path
    #[arg(long, default_value = "/radio")]
    pub path: String,

    /// URL path the music directory is served under
    #[arg(long, default_value = "/music")]
    pub music_route: String,

    /// Track hand-over: "cut" or "crossfade:<seconds>"
    #[arg(short, long, default_value = "cut")]
    pub transition: TransitionStyle,

    /// Duration assumed for files without readable metadata, in seconds
    #[arg(long, default_value = "180")]
    pub fallback_duration: f64,

    /// Shortest delay between two track changes, in milliseconds
    #[arg(long, default_value = "1000")]
    pub minimum_delay_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServerArgs {
    /// Initialize tracing based on verbosity flag
    pub fn init_tracing(&self) {
        init_tracing(self.verbose);
    }

    /// Log startup information
    pub fn log_startup_info(&self) {
        tracing::info!("Liveradio Server v{}", env!("CARGO_PKG_VERSION"));
        tracing::info!("Bind: {}", self.bind);
        tracing::info!("Endpoint: ws://{}{}", self.bind, self.path);
        tracing::info!("Music: {} at {}", self.music_dir.display(), self.music_route);
        tracing::info!("Transition: {}", self.transition);
    }

    /// Build ServerConfig from these args
    pub fn build_config(&self) -> ServerConfig {
        ServerConfig::new(self.music_dir.clone())
            .bind_addr(self.bind)
            .ws_path(self.path.clone())
            .music_route(self.music_route.clone())
            .transition(self.transition)
            .fallback_duration(self.fallback_duration)
            .minimum_delay(Duration::from_millis(self.minimum_delay_ms))
    }
}

/// Install a tracing subscriber; `RUST_LOG` overrides the default filter
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose {
        "liveradio=debug,tower_http=debug"
    } else {
        "liveradio=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
