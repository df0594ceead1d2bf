// ABOUTME: Broadcast scheduler owning the canonical "now playing" timeline
// ABOUTME: Advances tracks on real duration with a single, generation-checked pending timer

use crate::protocol::messages::{Message, RadioState, SyncTime, TrackChange};
use crate::protocol::track::{sanitize_duration, Track, FALLBACK_DURATION_SECS};
use crate::server::client_manager::ClientManager;
use crate::server::clock::ServerClock;
use crate::server::listeners::ListenerCounter;
use crate::server::playlist::Playlist;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// How one track hands over to the next
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStyle {
    /// Advance exactly when the track ends
    #[default]
    Cut,
    /// Advance `window_secs` early so listeners can blend the two tracks
    Crossfade {
        /// Overlap between outgoing and incoming track, in seconds
        window_secs: f64,
    },
}

impl TransitionStyle {
    /// Crossfade window, zero for a cut
    pub fn window(&self) -> Duration {
        match *self {
            TransitionStyle::Cut => Duration::ZERO,
            TransitionStyle::Crossfade { window_secs } => {
                Duration::try_from_secs_f64(window_secs.max(0.0)).unwrap_or(Duration::ZERO)
            }
        }
    }
}

impl fmt::Display for TransitionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionStyle::Cut => write!(f, "cut"),
            TransitionStyle::Crossfade { window_secs } => write!(f, "crossfade:{}", window_secs),
        }
    }
}

/// Parses `cut`, `crossfade` (1 second) or `crossfade:<seconds>`
impl FromStr for TransitionStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.split_once(':') {
            None if s == "cut" => Ok(TransitionStyle::Cut),
            None if s == "crossfade" => Ok(TransitionStyle::Crossfade { window_secs: 1.0 }),
            Some(("crossfade", secs)) => match secs.parse::<f64>() {
                Ok(w) if w.is_finite() && w >= 0.0 => Ok(TransitionStyle::Crossfade { window_secs: w }),
                _ => Err(format!("invalid crossfade window '{}'", secs)),
            },
            _ => Err(format!("unknown transition style '{}'", s)),
        }
    }
}

/// Scheduler timing parameters
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cut or crossfade hand-over
    pub transition: TransitionStyle,
    /// Duration assumed for tracks without a usable one
    pub fallback_duration: f64,
    /// Shortest delay ever scheduled between two advances
    pub minimum_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            transition: TransitionStyle::Cut,
            fallback_duration: FALLBACK_DURATION_SECS,
            minimum_delay: Duration::from_secs(1),
        }
    }
}

impl SchedulerConfig {
    /// Delay until the advance that ends a track of `duration_secs`
    ///
    /// Always positive: invalid durations use the fallback and crossfades
    /// never schedule below `minimum_delay`.
    pub fn advance_delay(&self, duration_secs: f64) -> Duration {
        let fallback = sanitize_duration(Some(self.fallback_duration), FALLBACK_DURATION_SECS);
        let duration = Duration::try_from_secs_f64(sanitize_duration(Some(duration_secs), fallback))
            .unwrap_or(Duration::from_secs_f64(FALLBACK_DURATION_SECS));
        let minimum = self.minimum_delay.max(Duration::from_millis(1));
        match self.transition {
            TransitionStyle::Cut => duration.max(Duration::from_millis(1)),
            TransitionStyle::Crossfade { .. } => duration
                .saturating_sub(self.transition.window())
                .max(minimum),
        }
    }
}

/// Events processed by the scheduler loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A pending-advance timer fired
    Advance {
        /// Generation of the timer that fired
        generation: u64,
    },
}

/// The single scheduled advance
///
/// Dropping it aborts its timer task, so replacing the value cancels the
/// previous timer in the same assignment.
#[derive(Debug)]
struct PendingAdvance {
    generation: u64,
    fires_at_ms: i64,
    task: JoinHandle<()>,
}

impl Drop for PendingAdvance {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug)]
struct BroadcastState {
    current_index: usize,
    track_start_ms: i64,
    pending: PendingAdvance,
}

#[derive(Debug)]
enum SchedulerState {
    Idle,
    Playing(BroadcastState),
}

/// Published view of what is on air
#[derive(Debug, Clone)]
pub struct NowPlaying {
    /// Index into the playlist
    pub index: usize,
    /// Track on air
    pub track: Arc<Track>,
    /// When the track went on air (ms since Unix epoch)
    pub track_start_timestamp: i64,
    /// When the next advance is due (ms since Unix epoch)
    pub next_advance_at: i64,
}

impl NowPlaying {
    /// Seconds into the track at `now_ms`, clamped to `[0, duration]`
    pub fn position_at(&self, now_ms: i64) -> f64 {
        let elapsed = now_ms.saturating_sub(self.track_start_timestamp) as f64 / 1000.0;
        elapsed.clamp(0.0, self.track.duration_or(FALLBACK_DURATION_SECS))
    }

    /// Build a snapshot at `now_ms`
    pub fn snapshot_at(&self, now_ms: i64, listener_count: u64) -> Snapshot {
        Snapshot {
            track: Arc::clone(&self.track),
            listener_count,
            track_start_timestamp: self.track_start_timestamp,
            current_position: self.position_at(now_ms),
            server_time: now_ms,
        }
    }
}

/// Point-in-time broadcast state
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Track on air
    pub track: Arc<Track>,
    /// Connected listeners
    pub listener_count: u64,
    /// When the track went on air (ms since Unix epoch)
    pub track_start_timestamp: i64,
    /// Seconds into the track at `server_time`
    pub current_position: f64,
    /// When the snapshot was taken (ms since Unix epoch)
    pub server_time: i64,
}

impl Snapshot {
    /// radio-state message for this snapshot
    pub fn to_radio_state(&self) -> Message {
        Message::RadioState(RadioState {
            track: Arc::clone(&self.track),
            listener_count: self.listener_count,
            track_start_timestamp: self.track_start_timestamp,
            current_position: self.current_position,
            server_time: self.server_time,
        })
    }

    /// sync-time message for this snapshot
    pub fn to_sync_time(&self) -> Message {
        Message::SyncTime(SyncTime {
            current_position: self.current_position,
            server_time: self.server_time,
        })
    }
}

/// Read-only handle for answering snapshot queries from request handlers
#[derive(Debug, Clone)]
pub struct ScheduleView {
    now_playing: watch::Receiver<Option<NowPlaying>>,
    clock: Arc<ServerClock>,
    listeners: Arc<ListenerCounter>,
}

impl ScheduleView {
    /// Current state, or `None` while the scheduler is idle
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.snapshot_with(self.listeners.count())
    }

    /// Current state reporting `listener_count` listeners
    pub fn snapshot_with(&self, listener_count: u64) -> Option<Snapshot> {
        self.now_playing()
            .map(|np| np.snapshot_at(self.clock.now_millis(), listener_count))
    }

    /// What is on air, without computing a position
    pub fn now_playing(&self) -> Option<NowPlaying> {
        self.now_playing.borrow().clone()
    }

    /// Wait until the on-air track changes
    pub async fn changed(&mut self) -> bool {
        self.now_playing.changed().await.is_ok()
    }
}

/// Owner of the broadcast timeline
///
/// Only this value mutates the timeline. It is driven by [`run`](Self::run)
/// on a single task; everything else reads through a [`ScheduleView`].
pub struct BroadcastScheduler {
    config: SchedulerConfig,
    playlist: Playlist,
    state: SchedulerState,
    clock: Arc<ServerClock>,
    listeners: Arc<ListenerCounter>,
    clients: Arc<ClientManager>,
    events_tx: mpsc::UnboundedSender<SchedulerEvent>,
    events_rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    now_playing: watch::Sender<Option<NowPlaying>>,
    next_generation: u64,
}

impl BroadcastScheduler {
    /// Create an idle scheduler
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<ServerClock>,
        listeners: Arc<ListenerCounter>,
        clients: Arc<ClientManager>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (now_playing, _) = watch::channel(None);
        Self {
            config,
            playlist: Playlist::default(),
            state: SchedulerState::Idle,
            clock,
            listeners,
            clients,
            events_tx,
            events_rx,
            now_playing,
            next_generation: 0,
        }
    }

    /// Read-only view for request handlers
    pub fn view(&self) -> ScheduleView {
        ScheduleView {
            now_playing: self.now_playing.subscribe(),
            clock: Arc::clone(&self.clock),
            listeners: Arc::clone(&self.listeners),
        }
    }

    /// Whether a track is on air
    pub fn is_playing(&self) -> bool {
        matches!(self.state, SchedulerState::Playing(_))
    }

    /// Index of the track on air
    pub fn current_index(&self) -> Option<usize> {
        match &self.state {
            SchedulerState::Playing(state) => Some(state.current_index),
            SchedulerState::Idle => None,
        }
    }

    /// When the pending advance is due (ms since Unix epoch)
    pub fn next_advance_at(&self) -> Option<i64> {
        match &self.state {
            SchedulerState::Playing(state) => Some(state.pending.fires_at_ms),
            SchedulerState::Idle => None,
        }
    }

    /// Put the first track on air
    ///
    /// An empty playlist leaves the scheduler idle: no timer, no broadcast.
    /// Returns whether playback started.
    pub fn start(&mut self, playlist: Playlist) -> bool {
        self.playlist = playlist;
        if self.playlist.is_empty() {
            log::info!("Playlist is empty, scheduler stays idle");
            self.state = SchedulerState::Idle;
            self.now_playing.send_replace(None);
            return false;
        }

        let now = self.clock.now_millis();
        if self.go_on_air(0, now).is_none() {
            return false;
        }
        log::info!(
            "Broadcast started with {} tracks ({} transitions)",
            self.playlist.len(),
            self.config.transition
        );
        true
    }

    /// Move to the next track in response to timer `generation` firing
    ///
    /// A fire whose generation is not the installed one (an aborted or
    /// duplicated timer) is ignored. Returns the published track-change.
    pub fn advance(&mut self, generation: u64) -> Option<TrackChange> {
        let current_index = match &self.state {
            SchedulerState::Playing(state) if state.pending.generation == generation => {
                state.current_index
            }
            SchedulerState::Playing(state) => {
                log::warn!(
                    "Ignoring stale advance (generation {}, installed {})",
                    generation,
                    state.pending.generation
                );
                return None;
            }
            SchedulerState::Idle => {
                log::debug!("Ignoring advance while idle");
                return None;
            }
        };

        let now = self.clock.now_millis();
        let next_index = self.playlist.next_index(current_index);
        let track = self.go_on_air(next_index, now)?;

        let change = TrackChange {
            track,
            listener_count: self.listeners.count(),
            track_start_timestamp: now,
            server_time: self.clock.now_millis(),
        };
        log::info!(
            "Now playing #{} {:?} ({:.1}s)",
            next_index,
            change.track.title,
            change.track.duration_seconds
        );
        self.clients.broadcast(&Message::TrackChange(change.clone()));
        Some(change)
    }

    /// Current state, or `None` while idle. Never mutates.
    pub fn snapshot(&self) -> Option<Snapshot> {
        let SchedulerState::Playing(state) = &self.state else {
            return None;
        };
        let track = self.playlist.get(state.current_index)?;
        let now_playing = NowPlaying {
            index: state.current_index,
            track: Arc::clone(track),
            track_start_timestamp: state.track_start_ms,
            next_advance_at: state.pending.fires_at_ms,
        };
        Some(now_playing.snapshot_at(self.clock.now_millis(), self.listeners.count()))
    }

    /// Process timer events until shutdown is signalled
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        log::info!("Scheduler loop started");
        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => match event {
                    SchedulerEvent::Advance { generation } => {
                        self.advance(generation);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("Scheduler shutting down");
                        break;
                    }
                }
            }
        }
        self.state = SchedulerState::Idle;
        self.now_playing.send_replace(None);
    }

    /// Install `index` as on air from `now`, replacing the pending advance
    fn go_on_air(&mut self, index: usize, now: i64) -> Option<Arc<Track>> {
        let track = Arc::clone(self.playlist.get(index)?);
        let delay = self.config.advance_delay(track.duration_seconds);
        let pending = self.schedule_advance(delay, now);
        let next_advance_at = pending.fires_at_ms;

        // Single assignment: the previous PendingAdvance is dropped (and its
        // timer aborted) as the new one is installed.
        self.state = SchedulerState::Playing(BroadcastState {
            current_index: index,
            track_start_ms: now,
            pending,
        });

        self.now_playing.send_replace(Some(NowPlaying {
            index,
            track: Arc::clone(&track),
            track_start_timestamp: now,
            next_advance_at,
        }));
        Some(track)
    }

    fn schedule_advance(&mut self, delay: Duration, now: i64) -> PendingAdvance {
        self.next_generation += 1;
        let generation = self.next_generation;
        let events_tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events_tx.send(SchedulerEvent::Advance { generation });
        });
        log::debug!("Advance #{} scheduled in {:.3}s", generation, delay.as_secs_f64());
        PendingAdvance {
            generation,
            fires_at_ms: now.saturating_add(ServerClock::duration_to_millis(delay)),
            task,
        }
    }
}

/// Spawn the scheduler loop
///
/// Returns the task handle and a shutdown sender (send `true` to stop).
pub fn spawn_scheduler(
    mut scheduler: BroadcastScheduler,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        scheduler.run(shutdown_rx).await;
    });
    (handle, shutdown_tx)
}
