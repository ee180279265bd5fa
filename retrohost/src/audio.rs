//! cpal output for the core's audio.

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use retrohost_core::audio::AudioSink;
use ringbuf::{HeapProducer, HeapRb};

/// Plays interleaved stereo `i16` on the default output device.
///
/// The core's rate is converted to the device rate by dropping or repeating frames.
pub struct CpalSink {
    _stream: cpal::Stream,
    producer: HeapProducer<f32>,
    device_rate: u32,
    channels: u16,
    /// Output frames per input frame.
    ratio: f64,
    phase: f64,
    dropped: usize,
}

impl CpalSink {
    pub fn new() -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .context("no audio output device")?;
        let config = device.default_output_config()?;
        let device_rate = config.sample_rate().0;
        let channels = config.channels();

        // Half a second of slack.
        let ring = HeapRb::<f32>::new(device_rate as usize * channels as usize / 2);
        let (producer, mut consumer) = ring.split();

        let mut last = 0.0;
        let stream = device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _| {
                for sample in data.iter_mut() {
                    if let Some(s) = consumer.pop() {
                        last = s;
                    }
                    *sample = last;
                }
            },
            |err| log::error!("audio stream error: {err}"),
            None,
        )?;
        stream.play()?;
        log::info!("audio output at {device_rate} Hz, {channels} channels");

        Ok(Self {
            _stream: stream,
            producer,
            device_rate,
            channels,
            ratio: 1.0,
            phase: 0.0,
            dropped: 0,
        })
    }
}

impl AudioSink for CpalSink {
    fn configure(&mut self, sample_rate: f64) {
        self.ratio = f64::from(self.device_rate) / sample_rate;
        self.phase = 0.0;
    }

    fn push(&mut self, samples: &[i16]) {
        for frame in samples.chunks_exact(2) {
            self.phase += self.ratio;
            while self.phase >= 1.0 {
                self.phase -= 1.0;
                for channel in 0..self.channels as usize {
                    let sample = f32::from(frame[channel.min(1)]) / 32768.0;
                    if self.producer.push(sample).is_err() {
                        self.dropped += 1;
                    }
                }
            }
        }
    }

    fn flush(&mut self) {
        if self.dropped > 0 {
            log::debug!("audio ring full; dropped {} samples", self.dropped);
            self.dropped = 0;
        }
    }
}
