//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Sources capture at whatever rate the device or file provides; the VAD
//! and most ASR engines want 16 kHz mono f32. `RateConverter` bridges that
//! gap on the processing thread, where allocation is allowed.
//!
//! When input rate == output rate the converter is a passthrough — no
//! rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{LivecapError, Result};

/// Input frame count per rubato call.
const PROCESS_CHUNK: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
///
/// Samples are accumulated internally until a full block is available for
/// rubato; the remainder carries over to the next call. [`reset`] clears
/// that carry-over along with the filter state.
///
/// [`reset`]: RateConverter::reset
pub struct RateConverter {
    /// `None` when input rate == output rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input blocks between calls.
    input_buf: Vec<f32>,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    input_rate: u32,
    output_rate: u32,
}

impl RateConverter {
    /// Create a converter from `input_rate` to `output_rate` (both Hz).
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == output_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                output_buf: Vec::new(),
                input_rate,
                output_rate,
            });
        }

        let ratio = output_rate as f64 / input_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            PROCESS_CHUNK,
            1, // mono
        )
        .map_err(|e| LivecapError::SourceOpen(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            output_buf,
            input_rate,
            output_rate,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty
    /// while the converter accumulates a full block).
    ///
    /// In passthrough mode input is returned directly.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= PROCESS_CHUNK {
            let input_slice = &self.input_buf[..PROCESS_CHUNK];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..PROCESS_CHUNK);
        }

        result
    }

    /// Drain any buffered partial block, zero-padded to a full block.
    ///
    /// Call at end of stream. Output length past the true end of input is
    /// the caller's concern; [`resample_buffer`] trims it.
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return Vec::new();
        };
        if self.input_buf.is_empty() {
            return Vec::new();
        }

        self.input_buf.resize(PROCESS_CHUNK, 0.0);
        let mut result = Vec::new();
        match resampler.process_into_buffer(&[&self.input_buf[..]], &mut self.output_buf, None) {
            Ok((_consumed, produced)) => {
                result.extend_from_slice(&self.output_buf[0][..produced]);
            }
            Err(e) => {
                error!("resampler flush error: {e}");
            }
        }
        self.input_buf.clear();
        result
    }

    /// Clear the carry-over buffer and filter state.
    pub fn reset(&mut self) {
        self.input_buf.clear();
        if let Some(ref mut resampler) = self.resampler {
            resampler.reset();
        }
    }

    /// `true` when input rate == output rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }
}

/// One-shot rational resample of a whole buffer.
///
/// Output is trimmed (or zero-padded) to `round(len * output/input)` so the
/// duration of the buffer is preserved exactly.
pub fn resample_buffer(samples: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    if input_rate == output_rate {
        return Ok(samples.to_vec());
    }

    let expected = ((samples.len() as f64) * output_rate as f64 / input_rate as f64).round() as usize;

    let mut converter = RateConverter::new(input_rate, output_rate)?;
    let mut out = converter.process(samples);
    out.extend(converter.flush());

    if out.len() > expected {
        out.truncate(expected);
    } else {
        out.resize(expected, 0.0);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let out = rc.process(&samples);
        assert_eq!(out, samples);
    }

    #[test]
    fn ratio_48k_to_16k_correct_length() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        assert!(!rc.is_passthrough());
        // 3072 input samples at 48 kHz → ~1024 at 16 kHz
        let samples = vec![0.0f32; 3072];
        let out = rc.process(&samples);
        assert!(!out.is_empty(), "expected non-empty output");
        let expected = 1024isize;
        assert!(
            (out.len() as isize - expected).unsigned_abs() <= 16,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn partial_accumulation_returns_empty() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        let out = rc.process(&vec![0.0f32; 500]);
        assert!(out.is_empty(), "expected empty output for partial block");
    }

    #[test]
    fn reset_discards_partial_block() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        rc.process(&vec![0.5f32; 500]);
        rc.reset();
        // After reset the first 1024 samples form a fresh block.
        let out = rc.process(&vec![0.0f32; 500]);
        assert!(out.is_empty());
    }

    #[test]
    fn buffer_resample_preserves_duration() {
        // 1.0 s at 44.1 kHz → exactly 16 000 samples at 16 kHz
        let samples = vec![0.1f32; 44_100];
        let out = resample_buffer(&samples, 44_100, 16_000).unwrap();
        assert_eq!(out.len(), 16_000);
    }

    #[test]
    fn buffer_resample_round_trip_duration_within_one_percent() {
        let samples: Vec<f32> = (0..48_000)
            .map(|i| (i as f32 * 0.01).sin() * 0.4)
            .collect();
        let down = resample_buffer(&samples, 48_000, 16_000).unwrap();
        let back = resample_buffer(&down, 16_000, 48_000).unwrap();
        let drift = (back.len() as f64 - samples.len() as f64).abs() / samples.len() as f64;
        assert!(drift < 0.01, "duration drift {drift}");
    }
}
