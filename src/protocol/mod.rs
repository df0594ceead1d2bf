// ABOUTME: Event channel protocol
// ABOUTME: Message envelope and the track record shared by server and client

/// Protocol message type definitions
pub mod messages;
/// Track record carried in broadcast messages
pub mod track;

pub use messages::{
    ListenersUpdate, Message, RadioState, SyncTime, TrackChange,
};
pub use track::{sanitize_duration, Track, FALLBACK_DURATION_SECS};
