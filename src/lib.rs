// ABOUTME: Main library entry point for liveradio
// ABOUTME: Exports public API for the broadcast server and the listening client

//! # liveradio
//!
//! A synchronized "live radio" broadcast. One server-side timeline decides which
//! track is on air and at what offset; every listener reconstructs that offset
//! against its own audio output clock, including late joiners and listeners that
//! drop and regain their connection.
//!
//! ## Features
//!
//! - **Server**: broadcast scheduler, listener counter and the WebSocket event channel
//! - **Client**: sync engine that turns server timestamps into local playback
//! - **Protocol**: the JSON messages exchanged over the event channel
//!
//! ## Example: Running a Server
//!
//! ```no_run
//! use liveradio::server::{RadioServer, ServerConfig, TransitionStyle};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::new("./music")
//!         .bind_addr("0.0.0.0:3001".parse().unwrap())
//!         .transition(TransitionStyle::Crossfade { window_secs: 1.0 });
//!
//!     RadioServer::with_config(config).run().await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

/// Listening client: audio graph, sync engine and event channel connection
pub mod client;
/// Protocol implementation for WebSocket communication
pub mod protocol;
/// Server implementation for hosting a broadcast
pub mod server;

pub use client::{ClientConfig, SyncEngine};
pub use protocol::messages::Message;
pub use server::{BroadcastScheduler, RadioServer, ServerConfig};

/// Result type for liveradio operations
pub type Result<T> = std::result::Result<T, error::Error>;

/// Error types for liveradio
pub mod error {
    use thiserror::Error;

    /// Error types for liveradio operations
    #[derive(Error, Debug)]
    pub enum Error {
        /// WebSocket-related error
        #[error("WebSocket error: {0}")]
        WebSocket(String),

        /// Protocol violation or parsing error
        #[error("Protocol error: {0}")]
        Protocol(String),

        /// Audio output error
        #[error("Audio output error: {0}")]
        Output(String),
    }

    /// Failure fetching or decoding a track on the client
    ///
    /// The engine keeps its previous buffer and playback when this occurs.
    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum LoadError {
        /// Network or filesystem failure getting the bytes
        #[error("fetch failed: {0}")]
        Fetch(String),

        /// Bytes could not be decoded as audio
        #[error("decode failed: {0}")]
        Decode(String),

        /// Container holds no decodable audio track
        #[error("no audio track found")]
        NoAudioTrack,

        /// Decoding produced no samples
        #[error("decoded audio is empty")]
        Empty,
    }

    /// Failure starting playback on the client
    #[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PlayError {
        /// No buffer has been loaded yet
        #[error("no track loaded")]
        NoBuffer,
    }

    /// Failure reacting to a server event
    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum SyncError {
        /// The announced track could not be loaded
        #[error(transparent)]
        Load(#[from] LoadError),

        /// Playback could not be started
        #[error(transparent)]
        Play(#[from] PlayError),
    }

    impl From<serde_json::Error> for Error {
        fn from(e: serde_json::Error) -> Self {
            Error::Protocol(e.to_string())
        }
    }

    impl From<tokio_tungstenite::tungstenite::Error> for Error {
        fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
            Error::WebSocket(e.to_string())
        }
    }
}
