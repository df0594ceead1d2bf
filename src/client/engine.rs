// ABOUTME: Client sync engine mapping server timestamps onto the local output clock
// ABOUTME: Loads tracks, starts voices at the live offset, mutes, crossfades and resyncs

use crate::client::buffer::{extension_of, AudioBuffer};
use crate::client::config::{ClientConfig, ResyncPolicy};
use crate::client::fetch::TrackFetcher;
use crate::client::graph::{AudioGraph, Levels, VoiceHandle, VoiceId};
use crate::error::{LoadError, PlayError, SyncError};
use crate::protocol::messages::Message;
use crate::protocol::track::Track;
use crate::server::TransitionStyle;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Observable playback state of one client
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    /// Source ref of the decoded buffer, if any
    pub loaded_track_ref: Option<String>,
    /// Output clock (seconds) when the current voice started
    pub output_clock_at_start: f64,
    /// Track offset (seconds) the current voice started at
    pub offset_at_start: f64,
    /// Whether output is muted
    pub muted: bool,
    /// Voices currently in the mixer (two during a crossfade)
    pub active_graphs: usize,
}

struct LoadedTrack {
    source_ref: String,
    buffer: Arc<AudioBuffer>,
}

struct ActiveVoice {
    handle: VoiceHandle,
    duration: f64,
}

/// Per-client playback driven by server events
pub struct SyncEngine {
    fetcher: Arc<dyn TrackFetcher>,
    graph: AudioGraph,
    transition: TransitionStyle,
    resync: ResyncPolicy,
    crossfade_window: Duration,
    loaded: Option<LoadedTrack>,
    announced: Option<Arc<Track>>,
    current: Option<ActiveVoice>,
    outgoing: Option<VoiceId>,
    output_clock_at_start: f64,
    offset_at_start: f64,
    muted: bool,
}

impl SyncEngine {
    /// Engine playing into `graph` and fetching through `fetcher`
    pub fn new(graph: AudioGraph, fetcher: Arc<dyn TrackFetcher>, config: &ClientConfig) -> Self {
        Self {
            fetcher,
            graph,
            transition: config.transition,
            resync: config.resync,
            crossfade_window: config.crossfade_window(),
            loaded: None,
            announced: None,
            current: None,
            outgoing: None,
            output_clock_at_start: 0.0,
            offset_at_start: 0.0,
            muted: config.start_muted,
        }
    }

    /// The audio graph this engine plays into
    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    /// Last track the server announced
    pub fn announced_track(&self) -> Option<&Arc<Track>> {
        self.announced.as_ref()
    }

    /// Source ref of the loaded buffer
    pub fn loaded_ref(&self) -> Option<&str> {
        self.loaded.as_ref().map(|l| l.source_ref.as_str())
    }

    /// Whether output is muted
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Snapshot of the playback state
    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            loaded_track_ref: self.loaded_ref().map(str::to_string),
            output_clock_at_start: self.output_clock_at_start,
            offset_at_start: self.offset_at_start,
            muted: self.muted,
            active_graphs: self.graph.lock().active_voices(),
        }
    }

    /// Levels of the current voice's source, silence when idle
    pub fn levels(&self) -> Levels {
        self.current
            .as_ref()
            .map(|v| v.handle.tap.levels())
            .unwrap_or_default()
    }

    /// Fetch and decode `source_ref`
    ///
    /// The previous buffer stays loaded unless this succeeds.
    pub async fn load_track(&mut self, source_ref: &str) -> Result<(), LoadError> {
        let fetcher = Arc::clone(&self.fetcher);
        let reference = source_ref.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let bytes = fetcher.fetch(&reference)?;
            AudioBuffer::decode(bytes, extension_of(&reference))
        })
        .await
        .map_err(|e| LoadError::Fetch(format!("load task failed: {}", e)))?;

        let buffer = match result {
            Ok(buffer) => buffer,
            Err(e) => {
                log::warn!("Failed to load {}: {}", source_ref, e);
                return Err(e);
            }
        };

        log::info!(
            "Loaded {} ({:.1}s at {} Hz)",
            source_ref,
            buffer.duration(),
            buffer.sample_rate()
        );
        self.loaded = Some(LoadedTrack {
            source_ref: source_ref.to_string(),
            buffer: Arc::new(buffer),
        });
        Ok(())
    }

    async fn ensure_loaded(&mut self, source_ref: &str) -> Result<(), LoadError> {
        if self.loaded_ref() == Some(source_ref) {
            return Ok(());
        }
        self.load_track(source_ref).await
    }

    fn loaded_buffer(&self) -> Result<Arc<AudioBuffer>, PlayError> {
        self.loaded
            .as_ref()
            .map(|l| Arc::clone(&l.buffer))
            .ok_or(PlayError::NoBuffer)
    }

    /// Replace whatever is playing with the loaded buffer at `offset_secs`
    pub fn play(&mut self, offset_secs: f64) -> Result<(), PlayError> {
        let buffer = self.loaded_buffer()?;
        let duration = buffer.duration();
        let offset = clamp_offset(offset_secs, duration);

        let mut mixer = self.graph.lock();
        if let Some(old) = self.current.take() {
            mixer.stop_voice(old.handle.id);
        }
        if let Some(old) = self.outgoing.take() {
            mixer.stop_voice(old);
        }

        let handle = mixer.start_voice(buffer, offset, 1.0);
        if self.muted {
            mixer.set_muted(handle.id, true);
        }
        self.output_clock_at_start = mixer.current_time();
        drop(mixer);

        self.offset_at_start = offset;
        self.current = Some(ActiveVoice { handle, duration });
        log::debug!("Playing at {:.3}s", offset);
        Ok(())
    }

    /// Blend from the current voice to the loaded buffer at `offset_secs`
    ///
    /// Positions follow the incoming voice immediately; the outgoing one is
    /// removed by the mixer when the window ends. With nothing playing this
    /// is a plain [`play`](Self::play).
    pub fn crossfade_to(&mut self, offset_secs: f64) -> Result<(), PlayError> {
        let buffer = self.loaded_buffer()?;
        let window = self.crossfade_window;

        let playing = self
            .current
            .as_ref()
            .is_some_and(|v| self.graph.lock().is_active(v.handle.id));
        if !playing || window.is_zero() {
            return self.play(offset_secs);
        }

        let duration = buffer.duration();
        let offset = clamp_offset(offset_secs, duration);

        let mut mixer = self.graph.lock();
        // A fade still running from an earlier transition is cut short
        if let Some(previous) = self.outgoing.take() {
            mixer.stop_voice(previous);
        }
        if let Some(old) = self.current.take() {
            mixer.ramp_gain(old.handle.id, 0.0, window);
            mixer.stop_voice_after(old.handle.id, window);
            self.outgoing = Some(old.handle.id);
        }

        let handle = mixer.start_voice(buffer, offset, 0.0);
        mixer.ramp_gain(handle.id, 1.0, window);
        if self.muted {
            mixer.set_muted(handle.id, true);
        }
        self.output_clock_at_start = mixer.current_time();
        drop(mixer);

        self.offset_at_start = offset;
        self.current = Some(ActiveVoice { handle, duration });
        log::debug!("Crossfading to {:.3}s over {:?}", offset, window);
        Ok(())
    }

    /// Stop all voices, remembering the position reached
    pub fn stop(&mut self) {
        let position = self.current_time();
        let mut mixer = self.graph.lock();
        if let Some(old) = self.current.take() {
            mixer.stop_voice(old.handle.id);
        }
        if let Some(old) = self.outgoing.take() {
            mixer.stop_voice(old);
        }
        drop(mixer);
        self.offset_at_start = position;
    }

    /// Silence output; playback and position keep advancing
    pub fn mute(&mut self) {
        self.set_muted(true);
    }

    /// Restore output
    pub fn unmute(&mut self) {
        self.set_muted(false);
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        let mut mixer = self.graph.lock();
        if let Some(voice) = &self.current {
            mixer.set_muted(voice.handle.id, muted);
        }
        if let Some(id) = self.outgoing {
            mixer.set_muted(id, muted);
        }
    }

    /// Position in the current track, in seconds
    ///
    /// Derived from the output clock while a voice plays. Once the voice has
    /// run off the end of its buffer the buffer duration is reported, so the
    /// value never goes backwards until the next play.
    pub fn current_time(&self) -> f64 {
        let Some(voice) = &self.current else {
            return self.offset_at_start;
        };

        let mixer = self.graph.lock();
        if mixer.is_active(voice.handle.id) {
            let elapsed = (mixer.current_time() - self.output_clock_at_start).max(0.0);
            (self.offset_at_start + elapsed).min(voice.duration)
        } else {
            voice.duration
        }
    }

    /// React to one server event received at `received_at`
    ///
    /// Local time spent since `received_at` (fetch and decode) is added to the
    /// reported offset before playback starts.
    pub async fn handle_message(
        &mut self,
        message: &Message,
        received_at: Instant,
    ) -> Result<(), SyncError> {
        let fade_on_change = matches!(self.transition, TransitionStyle::Crossfade { .. });

        match message {
            Message::RadioState(state) => {
                self.follow(&state.track, state.current_position, received_at, fade_on_change)
                    .await
            }
            Message::TrackChange(change) => {
                log::info!("Now playing: {}", change.track.title);
                self.follow(&change.track, change.position_at_send(), received_at, fade_on_change)
                    .await
            }
            Message::SyncTime(sync) => {
                let Some(track) = self.announced.clone() else {
                    log::debug!("Ignoring sync-time before any track was announced");
                    return Ok(());
                };
                let fade = self.resync == ResyncPolicy::Crossfade;
                self.follow(&track, sync.current_position, received_at, fade).await
            }
            _ => Ok(()),
        }
    }

    async fn follow(
        &mut self,
        track: &Arc<Track>,
        reported_offset: f64,
        received_at: Instant,
        fade: bool,
    ) -> Result<(), SyncError> {
        self.announced = Some(Arc::clone(track));
        self.ensure_loaded(&track.source_ref).await?;

        let offset = reported_offset + received_at.elapsed().as_secs_f64();
        if fade {
            self.crossfade_to(offset)?;
        } else {
            self.play(offset)?;
        }
        Ok(())
    }
}

fn clamp_offset(offset: f64, duration: f64) -> f64 {
    if !offset.is_finite() {
        return 0.0;
    }
    offset.clamp(0.0, duration.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::buffer::tests::wav_bytes;
    use crate::client::fetch::MemoryFetcher;
    use crate::protocol::messages::{RadioState, SyncTime, TrackChange};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RATE: u32 = 8000;

    struct CountingFetcher {
        inner: MemoryFetcher,
        calls: AtomicUsize,
    }

    impl TrackFetcher for CountingFetcher {
        fn fetch(&self, source_ref: &str) -> Result<Vec<u8>, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(source_ref)
        }
    }

    fn fetcher() -> Arc<CountingFetcher> {
        Arc::new(CountingFetcher {
            inner: MemoryFetcher::new()
                .with_track("/music/a.wav", wav_bytes(RATE, 4.0))
                .with_track("/music/b.wav", wav_bytes(RATE, 1.5)),
            calls: AtomicUsize::new(0),
        })
    }

    fn engine_with(config: ClientConfig) -> (SyncEngine, Arc<CountingFetcher>) {
        let fetcher = fetcher();
        let engine = SyncEngine::new(AudioGraph::new(RATE), fetcher.clone(), &config);
        (engine, fetcher)
    }

    fn render_secs(engine: &SyncEngine, secs: f64) {
        let frames = (RATE as f64 * secs) as usize;
        let mut block = vec![0.0; frames * 2];
        engine.graph().render(&mut block);
    }

    fn track(id: u32, source_ref: &str) -> Arc<Track> {
        Arc::new(Track::new(id, format!("Track {}", id), source_ref, Some(4.0)))
    }

    #[tokio::test]
    async fn test_play_without_buffer_fails() {
        let (mut engine, _) = engine_with(ClientConfig::default());
        assert_eq!(engine.play(0.0), Err(PlayError::NoBuffer));
        assert_eq!(engine.crossfade_to(0.0), Err(PlayError::NoBuffer));
        assert_eq!(engine.current_time(), 0.0);
    }

    #[tokio::test]
    async fn test_play_fails_cleanly_after_undecodable_load() {
        let fetcher = MemoryFetcher::new()
            .with_track("/music/broken.mp3", b"<html>404 not found</html>".to_vec());
        let mut engine =
            SyncEngine::new(AudioGraph::new(RATE), Arc::new(fetcher), &ClientConfig::default());

        let err = engine.load_track("/music/broken.mp3").await.unwrap_err();
        assert!(
            matches!(err, LoadError::Decode(_) | LoadError::NoAudioTrack | LoadError::Empty),
            "unexpected {:?}",
            err
        );
        let err = engine.load_track("/music/missing.mp3").await.unwrap_err();
        assert!(matches!(err, LoadError::Fetch(_)));

        assert_eq!(engine.state().loaded_track_ref, None);
        assert_eq!(engine.play(0.0), Err(PlayError::NoBuffer));
        assert_eq!(engine.crossfade_to(0.0), Err(PlayError::NoBuffer));
        assert_eq!(engine.state().active_graphs, 0);
        assert_eq!(engine.current_time(), 0.0);
    }

    #[test]
    fn test_load_from_sync_code() {
        let (mut engine, fetcher) = engine_with(ClientConfig::default());
        tokio_test::assert_ok!(tokio_test::block_on(engine.load_track("/music/b.wav")));

        assert_eq!(engine.loaded_ref(), Some("/music/b.wav"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        tokio_test::assert_ok!(engine.play(0.0));
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_buffer() {
        let (mut engine, _) = engine_with(ClientConfig::default());
        engine.load_track("/music/a.wav").await.unwrap();
        engine.play(1.0).unwrap();

        let err = engine.load_track("/music/missing.wav").await.unwrap_err();
        assert!(matches!(err, LoadError::Fetch(_)));
        assert_eq!(engine.loaded_ref(), Some("/music/a.wav"));
        assert_eq!(engine.state().active_graphs, 1);

        render_secs(&engine, 0.5);
        assert!((engine.current_time() - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_position_follows_output_clock() {
        let (mut engine, _) = engine_with(ClientConfig::default());
        engine.load_track("/music/a.wav").await.unwrap();

        render_secs(&engine, 0.25);
        engine.play(2.0).unwrap();
        assert_eq!(engine.state().output_clock_at_start, 0.25);
        assert_eq!(engine.current_time(), 2.0);

        render_secs(&engine, 0.5);
        assert!((engine.current_time() - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_play_replaces_active_graph() {
        let (mut engine, _) = engine_with(ClientConfig::default());
        engine.load_track("/music/a.wav").await.unwrap();
        engine.play(0.0).unwrap();
        engine.play(3.0).unwrap();

        assert_eq!(engine.state().active_graphs, 1);
        assert_eq!(engine.current_time(), 3.0);
    }

    #[tokio::test]
    async fn test_offsets_are_clamped() {
        let (mut engine, _) = engine_with(ClientConfig::default());
        engine.load_track("/music/a.wav").await.unwrap();

        engine.play(-3.0).unwrap();
        assert_eq!(engine.state().offset_at_start, 0.0);

        engine.play(99.0).unwrap();
        assert_eq!(engine.state().offset_at_start, 4.0);
    }

    #[tokio::test]
    async fn test_mute_keeps_position_advancing() {
        let (mut engine, _) = engine_with(ClientConfig::default());
        engine.load_track("/music/a.wav").await.unwrap();
        engine.play(0.0).unwrap();
        engine.mute();

        let mut block = vec![0.0; 800];
        engine.graph().render(&mut block);
        assert!(block.iter().all(|&s| s == 0.0));
        assert!((engine.current_time() - 0.05).abs() < 1e-9);
        assert!(engine.levels().peak > 0.0);

        engine.unmute();
        engine.graph().render(&mut block);
        assert!(block.iter().any(|&s| s != 0.0));
        assert!((engine.current_time() - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_play_while_muted_stays_muted() {
        let (mut engine, _) = engine_with(ClientConfig::default().start_muted(true));
        engine.load_track("/music/a.wav").await.unwrap();
        engine.play(0.0).unwrap();

        let mut block = vec![0.0; 200];
        engine.graph().render(&mut block);
        assert!(engine.is_muted());
        assert!(block.iter().all(|&s| s == 0.0));
    }

    #[tokio::test]
    async fn test_time_never_goes_backwards_after_track_ends() {
        let (mut engine, _) = engine_with(ClientConfig::default());
        engine.load_track("/music/b.wav").await.unwrap();
        engine.play(1.0).unwrap();

        render_secs(&engine, 0.25);
        let before = engine.current_time();
        render_secs(&engine, 1.0);
        let ended = engine.current_time();
        render_secs(&engine, 1.0);

        assert!(ended >= before);
        assert!((ended - 1.5).abs() < 1e-9);
        assert_eq!(engine.current_time(), ended);
        assert_eq!(engine.state().active_graphs, 0);
    }

    #[tokio::test]
    async fn test_stop_remembers_position() {
        let (mut engine, _) = engine_with(ClientConfig::default());
        engine.load_track("/music/a.wav").await.unwrap();
        engine.play(1.0).unwrap();
        render_secs(&engine, 0.5);

        engine.stop();
        render_secs(&engine, 0.5);
        assert!((engine.current_time() - 1.5).abs() < 1e-9);
        assert_eq!(engine.state().active_graphs, 0);
    }

    #[tokio::test]
    async fn test_crossfade_runs_two_graphs_for_the_window() {
        let config =
            ClientConfig::default().transition(TransitionStyle::Crossfade { window_secs: 0.5 });
        let (mut engine, _) = engine_with(config);
        engine.load_track("/music/a.wav").await.unwrap();
        engine.play(0.0).unwrap();
        render_secs(&engine, 0.25);

        engine.crossfade_to(1.0).unwrap();
        assert_eq!(engine.state().active_graphs, 2);

        render_secs(&engine, 0.25);
        assert_eq!(engine.state().active_graphs, 2);
        assert!((engine.current_time() - 1.25).abs() < 1e-9);

        render_secs(&engine, 0.3);
        assert_eq!(engine.state().active_graphs, 1);
        assert!((engine.current_time() - 1.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_crossfade_with_nothing_playing_starts_directly() {
        let (mut engine, _) = engine_with(ClientConfig::default());
        engine.load_track("/music/a.wav").await.unwrap();
        engine.crossfade_to(2.0).unwrap();

        assert_eq!(engine.state().active_graphs, 1);
        let mut block = vec![0.0; 2];
        engine.graph().render(&mut block);
        assert!(block[0] != 0.0, "no fade-in without an outgoing voice");
    }

    #[tokio::test]
    async fn test_radio_state_loads_and_seeks() {
        let (mut engine, fetcher) = engine_with(ClientConfig::default());
        let message = Message::RadioState(RadioState {
            track: track(1, "/music/a.wav"),
            listener_count: 3,
            track_start_timestamp: 1_000_000,
            current_position: 1.0,
            server_time: 1_001_000,
        });

        engine.handle_message(&message, Instant::now()).await.unwrap();

        assert_eq!(engine.loaded_ref(), Some("/music/a.wav"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        let offset = engine.state().offset_at_start;
        assert!((1.0..1.5).contains(&offset), "offset {}", offset);
    }

    #[tokio::test]
    async fn test_sync_time_reuses_loaded_buffer() {
        let (mut engine, fetcher) = engine_with(ClientConfig::default());
        let state = Message::RadioState(RadioState {
            track: track(1, "/music/a.wav"),
            listener_count: 1,
            track_start_timestamp: 0,
            current_position: 0.5,
            server_time: 500,
        });
        engine.handle_message(&state, Instant::now()).await.unwrap();

        let sync = Message::SyncTime(SyncTime {
            current_position: 3.0,
            server_time: 3000,
        });
        engine.handle_message(&sync, Instant::now()).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state().active_graphs, 1);
        let offset = engine.state().offset_at_start;
        assert!((3.0..3.5).contains(&offset), "offset {}", offset);
    }

    #[tokio::test]
    async fn test_sync_time_before_any_track_is_ignored() {
        let (mut engine, fetcher) = engine_with(ClientConfig::default());
        let sync = Message::SyncTime(SyncTime {
            current_position: 3.0,
            server_time: 3000,
        });

        engine.handle_message(&sync, Instant::now()).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(engine.loaded_ref().is_none());
    }

    #[tokio::test]
    async fn test_track_change_uses_send_time_offset() {
        let (mut engine, fetcher) = engine_with(ClientConfig::default());
        let change = Message::TrackChange(TrackChange {
            track: track(2, "/music/b.wav"),
            listener_count: 2,
            track_start_timestamp: 10_000,
            server_time: 10_500,
        });

        engine.handle_message(&change, Instant::now()).await.unwrap();

        assert_eq!(engine.loaded_ref(), Some("/music/b.wav"));
        assert_eq!(engine.announced_track().map(|t| t.id), Some(2));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        let offset = engine.state().offset_at_start;
        assert!((0.5..1.0).contains(&offset), "offset {}", offset);
    }

    #[tokio::test]
    async fn test_failed_track_change_keeps_old_playback() {
        let (mut engine, _) = engine_with(ClientConfig::default());
        engine.load_track("/music/a.wav").await.unwrap();
        engine.play(0.0).unwrap();

        let change = Message::TrackChange(TrackChange {
            track: track(9, "/music/gone.mp3"),
            listener_count: 1,
            track_start_timestamp: 0,
            server_time: 0,
        });
        let err = engine.handle_message(&change, Instant::now()).await.unwrap_err();

        assert!(matches!(err, SyncError::Load(_)));
        assert_eq!(engine.loaded_ref(), Some("/music/a.wav"));
        assert_eq!(engine.state().active_graphs, 1);
    }

    #[tokio::test]
    async fn test_crossfade_style_blends_track_changes() {
        let config =
            ClientConfig::default().transition(TransitionStyle::Crossfade { window_secs: 1.0 });
        let (mut engine, _) = engine_with(config);
        engine.load_track("/music/a.wav").await.unwrap();
        engine.play(0.0).unwrap();

        let change = Message::TrackChange(TrackChange {
            track: track(2, "/music/b.wav"),
            listener_count: 1,
            track_start_timestamp: 0,
            server_time: 0,
        });
        engine.handle_message(&change, Instant::now()).await.unwrap();

        assert_eq!(engine.state().active_graphs, 2);
        assert_eq!(engine.loaded_ref(), Some("/music/b.wav"));
    }

    #[tokio::test]
    async fn test_listener_updates_do_not_touch_playback() {
        let (mut engine, fetcher) = engine_with(ClientConfig::default());
        let update = Message::ListenersUpdate(crate::protocol::messages::ListenersUpdate { count: 4 });

        engine.handle_message(&update, Instant::now()).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.state().active_graphs, 0);
    }
}
