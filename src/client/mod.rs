// ABOUTME: Listening client module
// ABOUTME: Decoding, audio graph, sync engine, device output and the event channel connection

mod buffer;
mod cli;
mod config;
mod connection;
mod engine;
mod fetch;
mod graph;
mod output;

pub use buffer::{extension_of, AudioBuffer};
pub use cli::ListenerArgs;
pub use config::{ClientConfig, ResyncPolicy, DEFAULT_CROSSFADE_WINDOW};
pub use connection::{run_listener, ListenerCommand};
pub use engine::{PlaybackState, SyncEngine};
pub use fetch::{HttpFetcher, MemoryFetcher, TrackFetcher, MAX_TRACK_BYTES};
pub use graph::{AnalysisTap, AudioGraph, GainNode, Levels, Mixer, VoiceHandle, VoiceId};
pub use output::CpalOutput;
