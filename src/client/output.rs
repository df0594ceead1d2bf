// ABOUTME: Audio device output for the listening client
// ABOUTME: Opens the default cpal device and pulls blocks from the audio graph

use crate::client::graph::AudioGraph;
use crate::error::Error;
use crate::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};

/// Running output stream on the default device
///
/// The stream stops when this is dropped. `cpal::Stream` is not `Send`, so
/// keep this on the task that created it.
pub struct CpalOutput {
    _stream: cpal::Stream,
    device_name: String,
    sample_rate: u32,
    channels: u16,
}

impl CpalOutput {
    /// Open the default output device and a graph running at its rate
    pub fn open() -> Result<(Self, AudioGraph)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Output("no output device available".to_string()))?;
        let device_name = device.name().unwrap_or_else(|_| "unknown device".to_string());

        let supported = device
            .default_output_config()
            .map_err(|e| Error::Output(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let sample_rate = config.sample_rate.0;
        let channels = config.channels;

        let graph = AudioGraph::new(sample_rate);
        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, graph.clone()),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, graph.clone()),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, graph.clone()),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, graph.clone()),
            other => Err(Error::Output(format!("unsupported sample format {:?}", other))),
        }?;
        stream.play().map_err(|e| Error::Output(e.to_string()))?;

        log::info!(
            "Audio output: {} ({} Hz, {} channels, {:?})",
            device_name,
            sample_rate,
            channels,
            sample_format
        );

        Ok((
            Self {
                _stream: stream,
                device_name,
                sample_rate,
                channels,
            },
            graph,
        ))
    }

    /// Name reported by the device
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Device sample rate, also the graph's rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Device channel count
    pub fn channels(&self) -> u16 {
        self.channels
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    graph: AudioGraph,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                if scratch.len() < frames * 2 {
                    scratch.resize(frames * 2, 0.0);
                }
                let block = &mut scratch[..frames * 2];
                graph.render(block);
                write_frames(data, channels, block);
            },
            |err| log::error!("Audio output error: {}", err),
            None,
        )
        .map_err(|e| Error::Output(e.to_string()))
}

/// Map interleaved stereo onto a device with `channels` channels
fn write_frames<T: Sample + FromSample<f32>>(data: &mut [T], channels: usize, stereo: &[f32]) {
    for (out, frame) in data.chunks_mut(channels.max(1)).zip(stereo.chunks_exact(2)) {
        let (l, r) = (frame[0], frame[1]);
        if out.len() == 1 {
            out[0] = T::from_sample((l + r) * 0.5);
            continue;
        }
        for (c, sample) in out.iter_mut().enumerate() {
            // Extra channels beyond stereo stay silent
            let value = match c {
                0 => l,
                1 => r,
                _ => 0.0,
            };
            *sample = T::from_sample(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_frames_stereo_and_mono() {
        let stereo = [0.5f32, -0.5, 1.0, 0.0];

        let mut two = [0.0f32; 4];
        write_frames(&mut two, 2, &stereo);
        assert_eq!(two, stereo);

        let mut one = [0.0f32; 2];
        write_frames(&mut one, 1, &stereo);
        assert_eq!(one, [0.0, 0.5]);

        let mut four = [9.0f32; 8];
        write_frames(&mut four, 4, &stereo);
        assert_eq!(four, [0.5, -0.5, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_write_frames_integer_format() {
        let mut out = [0i16; 2];
        write_frames(&mut out, 2, &[1.0, -1.0]);
        assert!(out[0] > 32_000);
        assert!(out[1] < -32_000);
    }
}
