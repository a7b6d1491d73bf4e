//! VAD segmentation parameters.

use serde::{Deserialize, Serialize};

use crate::error::{LivecapError, Result};

/// Hysteresis and timing configuration for the VAD state machine.
///
/// Immutable for a session once handed to a processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VadConfig {
    /// Speech probability at or above which a frame counts as speech.
    pub threshold: f32,
    /// Exit threshold for hysteresis. `None` derives
    /// `max(threshold - 0.15, 0.01)`.
    pub neg_threshold: Option<f32>,
    /// Minimum run of speech before an utterance is confirmed.
    pub min_speech_ms: u32,
    /// Silence run that closes an utterance.
    pub min_silence_ms: u32,
    /// Padding prepended and appended to each segment.
    pub speech_pad_ms: u32,
    /// Force a segment split once speech lasts this long. 0 disables.
    pub max_speech_ms: u32,
    /// Minimum utterance duration before the first interim is emitted.
    pub interim_min_duration_ms: u32,
    /// Minimum spacing between interims within one utterance.
    pub interim_interval_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            neg_threshold: None,
            min_speech_ms: 250,
            min_silence_ms: 100,
            speech_pad_ms: 400,
            max_speech_ms: 0,
            interim_min_duration_ms: 2000,
            interim_interval_ms: 1000,
        }
    }
}

impl VadConfig {
    /// The exit threshold actually used: explicit value, or
    /// `max(threshold - 0.15, 0.01)`.
    pub fn effective_neg_threshold(&self) -> f32 {
        self.neg_threshold
            .unwrap_or_else(|| (self.threshold - 0.15).max(0.01))
    }

    /// Check the hysteresis and range invariants.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(LivecapError::Config(format!(
                "threshold {} outside [0, 1]",
                self.threshold
            )));
        }
        let neg = self.effective_neg_threshold();
        if neg > self.threshold {
            return Err(LivecapError::Config(format!(
                "neg_threshold {} exceeds threshold {}",
                neg, self.threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_neg_threshold_follows_hysteresis_rule() {
        let config = VadConfig::default();
        assert!((config.effective_neg_threshold() - 0.35).abs() < 1e-6);

        let low = VadConfig {
            threshold: 0.05,
            ..VadConfig::default()
        };
        assert!((low.effective_neg_threshold() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn explicit_neg_threshold_wins() {
        let config = VadConfig {
            neg_threshold: Some(0.2),
            ..VadConfig::default()
        };
        assert!((config.effective_neg_threshold() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn validate_rejects_inverted_hysteresis() {
        let config = VadConfig {
            threshold: 0.3,
            neg_threshold: Some(0.6),
            ..VadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(VadConfig::default().validate().is_ok());
    }
}
