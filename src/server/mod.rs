// ABOUTME: Server module for the broadcast
// ABOUTME: Provides the scheduler, listener counting, playlist loading and the WebSocket server

mod cli;
mod client_handler;
mod client_manager;
mod clock;
mod config;
mod listeners;
mod playlist;
mod scheduler;
mod server;

pub use cli::{init_tracing, ServerArgs};
pub use client_handler::handle_client;
pub use client_manager::{ClientId, ClientManager, ConnectedClient, ServerMessage};
pub use clock::ServerClock;
pub use config::ServerConfig;
pub use listeners::ListenerCounter;
pub use playlist::{load_playlist, LoaderOptions, MetadataError, Playlist, AUDIO_EXTENSIONS};
pub use scheduler::{
    spawn_scheduler, BroadcastScheduler, NowPlaying, ScheduleView, SchedulerConfig,
    SchedulerEvent, Snapshot, TransitionStyle,
};
pub use server::{AppState, RadioServer};
