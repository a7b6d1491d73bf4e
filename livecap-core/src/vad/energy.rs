//! Energy-based VAD backend.
//!
//! Maps frame RMS onto a speech probability against a reference level:
//! silence scores near 0, anything at or above `reference_rms` scores 1.
//! Hysteresis and timing live in the state machine, so this backend is a
//! pure per-frame classifier.

use super::VadBackend;
use crate::error::Result;

/// Default frame length (32 ms at 16 kHz, matching the Silero window).
const DEFAULT_FRAME_SIZE: usize = 512;

/// RMS level that maps to probability 1.0. Typical close-mic speech sits
/// around 0.05–0.3 RMS.
const DEFAULT_REFERENCE_RMS: f32 = 0.1;

/// RMS-to-probability voice activity backend.
#[derive(Debug, Clone)]
pub struct EnergyBackend {
    reference_rms: f32,
    frame_size: usize,
}

impl EnergyBackend {
    pub fn new(reference_rms: f32, frame_size: usize) -> Self {
        Self {
            reference_rms,
            frame_size,
        }
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }
}

impl Default for EnergyBackend {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_RMS, DEFAULT_FRAME_SIZE)
    }
}

impl VadBackend for EnergyBackend {
    fn process(&mut self, frame: &[f32]) -> Result<f32> {
        Ok((Self::rms(frame) / self.reference_rms).clamp(0.0, 1.0))
    }

    fn reset(&mut self) {}

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn name(&self) -> &str {
        "energy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn silence_scores_zero() {
        let mut vad = EnergyBackend::default();
        let prob = vad.process(&vec![0.0; 512]).unwrap();
        assert_eq!(prob, 0.0);
    }

    #[test]
    fn loud_frame_saturates_at_one() {
        let mut vad = EnergyBackend::default();
        let prob = vad.process(&vec![0.5; 512]).unwrap();
        assert_eq!(prob, 1.0);
    }

    #[test]
    fn probability_scales_with_level() {
        let mut vad = EnergyBackend::new(0.1, 512);
        let quiet = vad.process(&vec![0.02; 512]).unwrap();
        let louder = vad.process(&vec![0.06; 512]).unwrap();
        assert!(quiet < louder);
        assert_relative_eq!(quiet, 0.2, epsilon = 1e-5);
        assert_relative_eq!(louder, 0.6, epsilon = 1e-5);
    }

    #[test]
    fn rms_of_square_wave() {
        // ±0.5 square wave has RMS 0.5
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert_relative_eq!(EnergyBackend::rms(&samples), 0.5, epsilon = 1e-5);
    }
}
