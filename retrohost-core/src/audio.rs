//! Audio output seam.

/// Receives the core's audio as interleaved stereo `i16` frames.
pub trait AudioSink {
    /// Called once the core's sample rate is known, and again whenever it changes.
    fn configure(&mut self, _sample_rate: f64) {}

    fn push(&mut self, samples: &[i16]);

    /// End of a `run_frame`.
    fn flush(&mut self) {}
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullAudio;

impl AudioSink for NullAudio {
    fn push(&mut self, _samples: &[i16]) {}
}
