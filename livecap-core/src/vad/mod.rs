//! Voice activity detection.
//!
//! A [`VadBackend`] turns one fixed-size frame of 16 kHz audio into a
//! speech probability; the [`VadStateMachine`] turns the probability stream
//! into utterance segments with hysteresis and padding; the
//! [`VadProcessor`] feeds arbitrary chunks through both, handling
//! resampling, framing, and residual carry-over.
//!
//! Backends are the extensibility point: [`EnergyBackend`] ships as the
//! dependency-free default, `SileroBackend` (feature `onnx`) wraps the
//! Silero VAD ONNX model, and anything else implementing [`VadBackend`]
//! plugs in without touching the state machine.

pub mod config;
pub mod energy;
pub mod processor;
pub mod state_machine;

#[cfg(feature = "onnx")]
pub mod silero;

pub use config::VadConfig;
pub use energy::EnergyBackend;
pub use processor::VadProcessor;
pub use state_machine::{VadSegment, VadState, VadStateMachine};

#[cfg(feature = "onnx")]
pub use silero::SileroBackend;

use crate::error::Result;

/// Sample rate every backend and the state machine operate at (Hz).
pub const VAD_SAMPLE_RATE: u32 = 16_000;

/// Per-frame speech probability classifier.
///
/// Implementors may be stateful (RNN hidden states, smoothing windows);
/// `reset()` must restore the initial state between sessions.
pub trait VadBackend: Send {
    /// Classify one frame of exactly [`frame_size`](VadBackend::frame_size)
    /// mono 16 kHz samples. Returns a speech probability in `[0, 1]`.
    fn process(&mut self, frame: &[f32]) -> Result<f32>;

    /// Reset internal state.
    fn reset(&mut self);

    /// Required frame length in samples.
    fn frame_size(&self) -> usize;

    /// Backend identifier (e.g. `"energy"`, `"silero"`).
    fn name(&self) -> &str;
}
