// ABOUTME: Decoded, playable audio buffer
// ABOUTME: Decodes fetched bytes with symphonia into interleaved stereo f32

use crate::error::LoadError;
use std::io::Cursor;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Interleaved stereo PCM held in memory
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    sample_rate: u32,
    samples: Arc<[f32]>,
}

impl AudioBuffer {
    /// Wrap interleaved stereo samples; a trailing half frame is dropped
    pub fn from_interleaved(sample_rate: u32, mut samples: Vec<f32>) -> Self {
        samples.truncate(samples.len() - samples.len() % 2);
        Self {
            sample_rate,
            samples: samples.into(),
        }
    }

    /// Decode a complete encoded file (MP3, FLAC, WAV, AAC, Ogg Vorbis)
    ///
    /// `extension` is a probe hint; the container is still sniffed.
    pub fn decode(bytes: Vec<u8>, extension: Option<&str>) -> Result<Self, LoadError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| LoadError::Decode(e.to_string()))?;
        let mut format = probed.format;

        // Skip video/image tracks like album art
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
            .ok_or(LoadError::NoAudioTrack)?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::Decode(e.to_string()))?;

        let mut stereo: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) if !stereo.is_empty() => {
                    log::warn!("Stopping decode early: {}", e);
                    break;
                }
                Err(e) => return Err(LoadError::Decode(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(err)) => {
                    log::warn!("Decode error: {}", err);
                    continue;
                }
                Err(e) => return Err(LoadError::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            sample_rate = spec.rate;
            let channels = spec.channels.count().max(1);

            let needed = decoded.capacity() * channels;
            if sample_buf.as_ref().is_some_and(|buf| buf.capacity() < needed) {
                sample_buf = None;
            }
            let buf = sample_buf
                .get_or_insert_with(|| SampleBuffer::new(decoded.capacity() as u64, spec));
            buf.copy_interleaved_ref(decoded);

            match channels {
                // Mono: duplicate to stereo
                1 => stereo.extend(buf.samples().iter().flat_map(|&s| [s, s])),
                2 => stereo.extend_from_slice(buf.samples()),
                // Multi-channel: keep the first two channels
                n => stereo.extend(
                    buf.samples()
                        .chunks_exact(n)
                        .flat_map(|frame| [frame[0], frame[1]]),
                ),
            }
        }

        if stereo.is_empty() || sample_rate == 0 {
            return Err(LoadError::Empty);
        }

        Ok(Self::from_interleaved(sample_rate, stereo))
    }

    /// Sample rate of the decoded audio
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Stereo frame at a fractional position, linearly interpolated
    ///
    /// `None` once `position` is past the last frame.
    #[inline]
    pub fn frame_at(&self, position: f64) -> Option<(f32, f32)> {
        if position < 0.0 {
            return None;
        }
        let index = position as usize;
        let frames = self.frames();
        if index >= frames {
            return None;
        }
        let frac = (position - index as f64) as f32;
        let a = (self.samples[index * 2], self.samples[index * 2 + 1]);
        if frac == 0.0 || index + 1 >= frames {
            return Some(a);
        }
        let b = (self.samples[index * 2 + 2], self.samples[index * 2 + 3]);
        Some((a.0 + (b.0 - a.0) * frac, a.1 + (b.1 - a.1) * frac))
    }
}

/// Extension of the file a source ref points at, ignoring any query string
pub fn extension_of(source_ref: &str) -> Option<&str> {
    let path = source_ref.split(['?', '#']).next().unwrap_or(source_ref);
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}
