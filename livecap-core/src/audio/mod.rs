//! Audio sources and sample-rate conversion.
//!
//! An [`AudioSource`] delivers mono f32 PCM in fixed-duration chunks at a
//! declared sample rate. Two implementations ship here: [`FileSource`]
//! (decode, down-mix, resample, chunk) and [`MicrophoneSource`] (cpal
//! capture behind a bounded chunk ring). Downstream stages resample to the
//! 16 kHz VAD rate themselves, so sources are free to declare whatever rate
//! the device or file actually produces.

pub mod device;
pub mod file;
#[cfg(feature = "audio-cpal")]
pub mod microphone;
pub mod resample;

pub use device::DeviceInfo;
pub use file::FileSource;
#[cfg(feature = "audio-cpal")]
pub use microphone::MicrophoneSource;
pub use resample::RateConverter;

use std::time::Duration;

use crate::error::Result;

/// A contiguous block of mono PCM samples at a known sample rate.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Contract for chunked audio producers.
///
/// `start()`/`stop()` are idempotent; `stop()` releases the device and
/// drains internal buffers. `sample_rate()` and `chunk_ms()` are fixed for
/// a session once started.
pub trait AudioSource: Send {
    /// Begin producing chunks. Calling `start` on an active source is a no-op.
    fn start(&mut self) -> Result<()>;

    /// Stop producing and release resources. Safe to call repeatedly.
    fn stop(&mut self);

    /// Read the next chunk, blocking at most `timeout`.
    ///
    /// Returns `None` on timeout, end of stream, or when the source is
    /// inactive.
    fn read(&mut self, timeout: Duration) -> Option<AudioChunk>;

    /// Declared sample rate in Hz. Valid once the source has started.
    fn sample_rate(&self) -> u32;

    /// Chunk duration in milliseconds.
    fn chunk_ms(&self) -> u32;

    /// Whether the source is currently producing.
    fn is_active(&self) -> bool;
}

/// Samples per chunk for a given rate and chunk duration.
pub(crate) fn chunk_size(sample_rate: u32, chunk_ms: u32) -> usize {
    (sample_rate as usize * chunk_ms as usize) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_duration_matches_rate() {
        let chunk = AudioChunk::new(vec![0.0; 1600], 16_000);
        assert!((chunk.duration_secs() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn chunk_size_geometry() {
        assert_eq!(chunk_size(16_000, 100), 1600);
        assert_eq!(chunk_size(48_000, 20), 960);
    }
}
