// ABOUTME: Track byte retrieval for the listening client
// ABOUTME: Fetches source refs over HTTP with ureq or from local files

use crate::error::LoadError;
use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

/// Largest track the client will download
pub const MAX_TRACK_BYTES: u64 = 256 * 1024 * 1024;

/// Retrieves the raw bytes behind a track's source ref
///
/// Implementations block; the engine calls them from a blocking task.
pub trait TrackFetcher: Send + Sync + 'static {
    /// Fetch the encoded bytes for `source_ref`
    fn fetch(&self, source_ref: &str) -> Result<Vec<u8>, LoadError>;
}

/// Fetches tracks from the broadcast server's music route
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpFetcher {
    /// Resolve relative source refs against `base_url` (e.g. `http://host:3001`)
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(60))
            .build();
        Self {
            base_url: base_url.into(),
            agent,
        }
    }

    /// Base URL relative refs are joined onto
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a source ref
    pub fn resolve(&self, source_ref: &str) -> String {
        if source_ref.starts_with("http://") || source_ref.starts_with("https://") {
            return source_ref.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            source_ref.trim_start_matches('/')
        )
    }
}

impl TrackFetcher for HttpFetcher {
    fn fetch(&self, source_ref: &str) -> Result<Vec<u8>, LoadError> {
        if let Some(path) = source_ref.strip_prefix("file://") {
            return std::fs::read(path).map_err(|e| LoadError::Fetch(format!("{}: {}", path, e)));
        }

        let url = self.resolve(source_ref);
        log::debug!("Fetching {}", url);

        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| LoadError::Fetch(format!("{}: {}", url, e)))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_TRACK_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| LoadError::Fetch(format!("{}: {}", url, e)))?;

        log::debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }
}

/// Serves tracks from memory, keyed by source ref
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    tracks: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    /// Empty fetcher; every ref fails until inserted
    pub fn new() -> Self {
        Self::default()
    }

    /// Register bytes for a source ref
    pub fn insert(&mut self, source_ref: impl Into<String>, bytes: Vec<u8>) {
        self.tracks.insert(source_ref.into(), bytes);
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with_track(mut self, source_ref: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(source_ref, bytes);
        self
    }
}

impl TrackFetcher for MemoryFetcher {
    fn fetch(&self, source_ref: &str) -> Result<Vec<u8>, LoadError> {
        self.tracks
            .get(source_ref)
            .cloned()
            .ok_or_else(|| LoadError::Fetch(format!("{}: not found", source_ref)))
    }
}
