// ABOUTME: Playlist loading from a directory of audio assets
// ABOUTME: Probes each file with symphonia for duration, tags and cover art, isolating failures

use crate::protocol::track::{sanitize_duration, Track, FALLBACK_DURATION_SECS};
use base64::Engine;
use std::path::Path;
use std::sync::Arc;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use thiserror::Error;

/// File extensions picked up by the loader
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "aac"];

/// Embedded pictures at or above this many bytes are dropped
pub const DEFAULT_COVER_ART_LIMIT: usize = 500_000;

/// Ordered, circular sequence of tracks for one session
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    tracks: Vec<Arc<Track>>,
}

impl Playlist {
    /// Create a playlist from tracks in broadcast order
    pub fn new(tracks: Vec<Track>) -> Self {
        tracks.into_iter().collect()
    }

    /// Number of tracks
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether the playlist has no tracks
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Track at `index`, wrapping around the end
    pub fn get(&self, index: usize) -> Option<&Arc<Track>> {
        if self.tracks.is_empty() {
            return None;
        }
        self.tracks.get(index % self.tracks.len())
    }

    /// Index following `index`, wrapping around the end
    pub fn next_index(&self, index: usize) -> usize {
        if self.tracks.is_empty() {
            0
        } else {
            (index + 1) % self.tracks.len()
        }
    }
}

impl FromIterator<Track> for Playlist {
    fn from_iter<I: IntoIterator<Item = Track>>(iter: I) -> Self {
        Self {
            tracks: iter.into_iter().map(Arc::new).collect(),
        }
    }
}

/// Failure reading one asset's metadata
///
/// Never aborts loading; the track is kept with fallback values.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// The file could not be opened
    #[error("cannot open: {0}")]
    Open(#[from] std::io::Error),

    /// The container could not be probed
    #[error("cannot probe: {0}")]
    Probe(#[from] symphonia::core::errors::Error),

    /// The container holds no decodable audio track
    #[error("no audio track")]
    NoAudioTrack,
}

/// Settings for [`load_playlist`]
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// URL path prefix the music directory is served under
    pub music_route: String,
    /// Duration used when a file's length cannot be read
    pub fallback_duration: f64,
    /// Embedded pictures at or above this many bytes are dropped
    pub cover_art_limit: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            music_route: "/music".to_string(),
            fallback_duration: FALLBACK_DURATION_SECS,
            cover_art_limit: DEFAULT_COVER_ART_LIMIT,
        }
    }
}

#[derive(Debug, Default)]
struct ProbedTags {
    title: Option<String>,
    artist: Option<String>,
    album_artist: Option<String>,
    album: Option<String>,
    cover_art: Option<String>,
    duration: Option<f64>,
}

impl ProbedTags {
    /// Take values from `revision` for every field still unset
    fn absorb(&mut self, revision: &MetadataRevision, cover_art_limit: usize) {
        for tag in revision.tags() {
            let slot = match tag.std_key {
                Some(StandardTagKey::TrackTitle) => &mut self.title,
                Some(StandardTagKey::Artist) => &mut self.artist,
                Some(StandardTagKey::AlbumArtist) => &mut self.album_artist,
                Some(StandardTagKey::Album) => &mut self.album,
                _ => continue,
            };
            if slot.is_none() {
                let value = tag.value.to_string();
                if !value.trim().is_empty() {
                    *slot = Some(value.trim().to_string());
                }
            }
        }

        if self.cover_art.is_some() {
            return;
        }
        if let Some(visual) = revision.visuals().first() {
            if visual.data.len() < cover_art_limit {
                let media_type = if visual.media_type.is_empty() {
                    "image/jpeg"
                } else {
                    visual.media_type.as_str()
                };
                let encoded = base64::engine::general_purpose::STANDARD.encode(&visual.data);
                self.cover_art = Some(format!("data:{};base64,{}", media_type, encoded));
            } else {
                log::debug!("Skipping {} byte cover art", visual.data.len());
            }
        }
    }

    /// Build the track, falling back to the file stem and album artist
    fn into_track(self, id: u32, stem: String, source_ref: String, fallback_duration: f64) -> Track {
        let mut track = Track::new(id, self.title.unwrap_or(stem), source_ref, None);
        track.duration_seconds = sanitize_duration(self.duration, fallback_duration);
        track.artist = self.artist.or(self.album_artist);
        track.album = self.album;
        track.cover_art = self.cover_art;
        track
    }
}

/// Load every audio file in `dir` into a playlist, sorted by file name
///
/// A file whose metadata cannot be read still becomes a track, titled after
/// its file name and given the fallback duration. An unreadable directory
/// yields an empty playlist.
pub fn load_playlist(dir: &Path, options: &LoaderOptions) -> Playlist {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Cannot read music directory {}: {}", dir.display(), e);
            return Playlist::default();
        }
    };

    let mut files: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_audio_file(path))
        .collect();
    files.sort();

    let playlist: Playlist = files
        .iter()
        .enumerate()
        .map(|(index, path)| load_track(index as u32 + 1, path, options))
        .collect();

    log::info!("Loaded {} tracks from {}", playlist.len(), dir.display());
    playlist
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn load_track(id: u32, path: &Path, options: &LoaderOptions) -> Track {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.clone());

    let tags = probe_file(path, options.cover_art_limit).unwrap_or_else(|e| {
        log::warn!("Metadata unavailable for {}: {}", path.display(), e);
        ProbedTags::default()
    });

    let source_ref = format!(
        "{}/{}",
        options.music_route.trim_end_matches('/'),
        urlencoding::encode(&file_name)
    );

    let track = tags.into_track(id, stem, source_ref, options.fallback_duration);

    log::debug!(
        "Track {}: {:?} ({:.1}s, cover art: {})",
        id,
        track.title,
        track.duration_seconds,
        track.cover_art.is_some()
    );
    track
}

fn probe_file(path: &Path, cover_art_limit: usize) -> Result<ProbedTags, MetadataError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mut probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut tags = ProbedTags::default();

    // Tags found ahead of the container (e.g. ID3v2) take precedence
    if let Some(metadata) = probed.metadata.get() {
        if let Some(revision) = metadata.current() {
            tags.absorb(revision, cover_art_limit);
        }
    }
    {
        let metadata = probed.format.metadata();
        if let Some(revision) = metadata.current() {
            tags.absorb(revision, cover_art_limit);
        }
    }

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| {
            t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL
                && t.codec_params.sample_rate.is_some()
        })
        .ok_or(MetadataError::NoAudioTrack)?;

    let track_id = track.id;
    let params = track.codec_params.clone();
    let frames_to_secs = |frames: u64| -> Option<f64> {
        if let Some(rate) = params.sample_rate.filter(|r| *r > 0) {
            return Some(frames as f64 / rate as f64);
        }
        params.time_base.map(|tb| {
            let time = tb.calc_time(frames);
            time.seconds as f64 + time.frac
        })
    };

    tags.duration = match params.n_frames {
        Some(frames) => frames_to_secs(frames),
        None => {
            // No frame count in the header: walk the packets
            let mut total = 0u64;
            while let Ok(packet) = probed.format.next_packet() {
                if packet.track_id() == track_id {
                    total += packet.dur;
                }
            }
            frames_to_secs(total)
        }
    };

    Ok(tags)
}
