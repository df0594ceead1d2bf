// ABOUTME: Software audio graph for the listening client
// ABOUTME: Voices (buffer -> analysis tap -> gain) summed by a mixer that owns the output clock

use crate::client::buffer::AudioBuffer;
use crossbeam::atomic::AtomicCell;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;

/// Identifies one playing voice in the mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(u64);

/// Signal levels measured by an [`AnalysisTap`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Levels {
    /// Root mean square over the last rendered block
    pub rms: f32,
    /// Absolute peak over the last rendered block
    pub peak: f32,
}

/// Pre-gain level meter for visualisation
///
/// Clones share the same readings; the audio thread writes, anyone reads.
#[derive(Debug, Clone, Default)]
pub struct AnalysisTap {
    levels: Arc<AtomicCell<Levels>>,
}

impl AnalysisTap {
    /// Latest measured levels
    pub fn levels(&self) -> Levels {
        self.levels.load()
    }

    fn publish(&self, levels: Levels) {
        self.levels.store(levels);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GainRamp {
    from: f32,
    to: f32,
    start_frame: u64,
    end_frame: u64,
}

/// Gain stage with linear ramps scheduled on the output clock
///
/// Muting is a separate multiplier, so a ramp in flight survives mute/unmute.
#[derive(Debug, Clone, PartialEq)]
pub struct GainNode {
    value: f32,
    ramp: Option<GainRamp>,
    muted: bool,
}

impl GainNode {
    fn new(value: f32) -> Self {
        Self {
            value,
            ramp: None,
            muted: false,
        }
    }

    /// Envelope value at an output frame, ignoring mute
    pub fn envelope_at(&self, frame: u64) -> f32 {
        match self.ramp {
            Some(ramp) if frame >= ramp.end_frame => ramp.to,
            Some(ramp) if frame <= ramp.start_frame => ramp.from,
            Some(ramp) => {
                let t = (frame - ramp.start_frame) as f32
                    / (ramp.end_frame - ramp.start_frame) as f32;
                ramp.from + (ramp.to - ramp.from) * t
            }
            None => self.value,
        }
    }

    /// Effective gain at an output frame
    #[inline]
    pub fn value_at(&self, frame: u64) -> f32 {
        if self.muted {
            0.0
        } else {
            self.envelope_at(frame)
        }
    }

    fn set_value(&mut self, value: f32) {
        self.value = value;
        self.ramp = None;
    }

    fn linear_ramp(&mut self, from: f32, to: f32, start_frame: u64, end_frame: u64) {
        if end_frame <= start_frame {
            self.set_value(to);
            return;
        }
        self.value = to;
        self.ramp = Some(GainRamp {
            from,
            to,
            start_frame,
            end_frame,
        });
    }
}

struct Voice {
    id: VoiceId,
    buffer: Arc<AudioBuffer>,
    /// Output frame playback began on
    start_frame: u64,
    /// Buffer position (in buffer frames) at `start_frame`
    offset_frames: f64,
    /// Buffer frames consumed per output frame
    step: f64,
    tap: AnalysisTap,
    gain: GainNode,
    stop_at: Option<u64>,
    ended: bool,
}

impl Voice {
    fn render_into(&mut self, out: &mut [f32], first_frame: u64) {
        let mut sum_sq = 0.0f32;
        let mut peak = 0.0f32;
        let mut measured = 0usize;

        for (i, frame) in out.chunks_exact_mut(2).enumerate() {
            let now = first_frame + i as u64;
            if self.stop_at.is_some_and(|stop| now >= stop) {
                self.ended = true;
                break;
            }
            let position = self.offset_frames + (now - self.start_frame) as f64 * self.step;
            let Some((l, r)) = self.buffer.frame_at(position) else {
                self.ended = true;
                break;
            };

            sum_sq += l * l + r * r;
            peak = peak.max(l.abs()).max(r.abs());
            measured += 2;

            let gain = self.gain.value_at(now);
            frame[0] += l * gain;
            frame[1] += r * gain;
        }

        if measured > 0 {
            self.tap.publish(Levels {
                rms: (sum_sq / measured as f32).sqrt(),
                peak,
            });
        }
    }
}

/// Handle returned when a voice starts
#[derive(Debug, Clone)]
pub struct VoiceHandle {
    /// Mixer id of the voice
    pub id: VoiceId,
    /// Level meter fed by the voice's source
    pub tap: AnalysisTap,
}

/// Sums voices into interleaved stereo and advances the output clock
///
/// The clock is the number of frames rendered divided by the sample rate, so
/// it only moves when the device asks for audio.
pub struct Mixer {
    sample_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
    next_id: u64,
}

impl Mixer {
    /// Mixer rendering at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frames_rendered: 0,
            voices: Vec::new(),
            next_id: 0,
        }
    }

    /// Output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output frames rendered so far
    pub fn current_frame(&self) -> u64 {
        self.frames_rendered
    }

    /// Output clock in seconds
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    fn frames_for(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as u64
    }

    /// Start playing `buffer` from `offset_secs` on the next rendered frame
    pub fn start_voice(&mut self, buffer: Arc<AudioBuffer>, offset_secs: f64, gain: f32) -> VoiceHandle {
        let id = VoiceId(self.next_id);
        self.next_id += 1;

        let tap = AnalysisTap::default();
        let source_rate = buffer.sample_rate() as f64;
        self.voices.push(Voice {
            id,
            offset_frames: offset_secs.max(0.0) * source_rate,
            step: source_rate / self.sample_rate as f64,
            buffer,
            start_frame: self.frames_rendered,
            tap: tap.clone(),
            gain: GainNode::new(gain),
            stop_at: None,
            ended: false,
        });

        VoiceHandle { id, tap }
    }

    fn voice_mut(&mut self, id: VoiceId) -> Option<&mut Voice> {
        self.voices.iter_mut().find(|v| v.id == id)
    }

    /// Remove a voice immediately
    pub fn stop_voice(&mut self, id: VoiceId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        self.voices.len() != before
    }

    /// Remove a voice once the output clock has advanced by `after`
    pub fn stop_voice_after(&mut self, id: VoiceId, after: Duration) -> bool {
        let at = self.frames_rendered + self.frames_for(after);
        match self.voice_mut(id) {
            Some(voice) => {
                voice.stop_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Ramp a voice's gain linearly from its current envelope to `to`
    pub fn ramp_gain(&mut self, id: VoiceId, to: f32, over: Duration) -> bool {
        let start = self.frames_rendered;
        let end = start + self.frames_for(over);
        match self.voice_mut(id) {
            Some(voice) => {
                let from = voice.gain.envelope_at(start);
                voice.gain.linear_ramp(from, to, start, end);
                true
            }
            None => false,
        }
    }

    /// Engage or release a voice's mute without stopping it
    pub fn set_muted(&mut self, id: VoiceId, muted: bool) -> bool {
        match self.voice_mut(id) {
            Some(voice) => {
                voice.gain.muted = muted;
                true
            }
            None => false,
        }
    }

    /// Gain stage of a voice
    pub fn gain(&self, id: VoiceId) -> Option<&GainNode> {
        self.voices.iter().find(|v| v.id == id).map(|v| &v.gain)
    }

    /// Whether a voice is still producing audio
    pub fn is_active(&self, id: VoiceId) -> bool {
        self.voices.iter().any(|v| v.id == id)
    }

    /// Number of voices currently mixed
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Fill `out` (interleaved stereo) and advance the clock
    ///
    /// Voices that ran out of audio or reached their stop frame are dropped.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let first_frame = self.frames_rendered;

        for voice in &mut self.voices {
            voice.render_into(out, first_frame);
        }

        let before = self.voices.len();
        self.voices.retain(|v| !v.ended);
        if self.voices.len() != before {
            log::trace!("{} voice(s) ended", before - self.voices.len());
        }

        self.frames_rendered += (out.len() / 2) as u64;
    }
}

/// Shared handle to the mixer used by the engine and the output device
#[derive(Clone)]
pub struct AudioGraph {
    mixer: Arc<Mutex<Mixer>>,
}

impl AudioGraph {
    /// New graph rendering at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mixer: Arc::new(Mutex::new(Mixer::new(sample_rate))),
        }
    }

    /// Lock the mixer for a batch of changes
    pub fn lock(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock()
    }

    /// Output clock in seconds
    pub fn current_time(&self) -> f64 {
        self.mixer.lock().current_time()
    }

    /// Render one block (called from the output callback)
    pub fn render(&self, out: &mut [f32]) {
        self.mixer.lock().render(out);
    }
}
