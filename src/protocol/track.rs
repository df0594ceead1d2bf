// ABOUTME: Track record definition
// ABOUTME: Immutable per-track display metadata plus a guaranteed-positive duration

use serde::{Deserialize, Serialize};

/// Duration substituted when a track's real length is unknown or invalid
pub const FALLBACK_DURATION_SECS: f64 = 180.0;

/// Return `secs` if it is a finite positive number, otherwise `fallback`.
///
/// `fallback` itself is assumed positive; callers pass either
/// [`FALLBACK_DURATION_SECS`] or a validated configuration value.
#[inline]
pub fn sanitize_duration(secs: Option<f64>, fallback: f64) -> f64 {
    match secs {
        Some(d) if d.is_finite() && d > 0.0 => d,
        _ => fallback,
    }
}

/// One playable audio item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// 1-based position in the playlist it was loaded from
    pub id: u32,
    /// Display title
    pub title: String,
    /// Performing artist, when tagged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Album name, when tagged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Where clients fetch the audio bytes from (URL path or absolute URL)
    pub source_ref: String,
    /// Embedded cover art as a `data:` URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_art: Option<String>,
    /// Length in seconds, always positive
    pub duration_seconds: f64,
}

impl Track {
    /// Create a track, substituting the fallback for a missing or invalid duration
    pub fn new(
        id: u32,
        title: impl Into<String>,
        source_ref: impl Into<String>,
        duration_seconds: Option<f64>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            artist: None,
            album: None,
            source_ref: source_ref.into(),
            cover_art: None,
            duration_seconds: sanitize_duration(duration_seconds, FALLBACK_DURATION_SECS),
        }
    }

    /// Set the artist
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    /// Set the album
    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    /// Set the cover art data URI
    pub fn with_cover_art(mut self, cover_art: impl Into<String>) -> Self {
        self.cover_art = Some(cover_art.into());
        self
    }

    /// Duration guaranteed to be positive, even for tracks deserialized from
    /// an untrusted peer.
    pub fn duration_or(&self, fallback: f64) -> f64 {
        sanitize_duration(Some(self.duration_seconds), fallback)
    }
}
