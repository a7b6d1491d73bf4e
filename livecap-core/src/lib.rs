//! # livecap-core
//!
//! Low-latency streaming speech pipeline: a continuous audio stream in,
//! time-stamped (and optionally translated) caption segments out.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource → Resampler → VadBackend → VadStateMachine
//!                                             │ segments
//!                                     StreamTranscriber
//!                                      │            │
//!                                Transcriber   Translator (deadline)
//!                                      │
//!                            TranscriptionResult / InterimResult
//! ```
//!
//! Several sources can share one expensive engine through the
//! [`SharedEngineDispatcher`], which serializes requests on a priority
//! queue behind a single worker.
//!
//! ASR engines, VAD classifiers, and translators are capability traits
//! ([`Transcriber`], [`vad::VadBackend`], [`translation::Translator`]);
//! the concrete heavy implementations live outside this crate.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod paths;
pub mod transcription;
pub mod translation;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{AudioChunk, AudioSource, DeviceInfo, FileSource};
pub use dispatcher::{DispatcherStats, SharedEngineDispatcher};
pub use engine::{EchoEngine, EngineCache, EngineHandle, Transcriber};
pub use error::LivecapError;
pub use transcription::{
    ContextWindow, InterimResult, StreamTranscriber, TranscriptionResult, MAX_CONTEXT_BUFFER,
};
pub use translation::{TranslationError, TranslationResult, Translator};
pub use vad::{VadBackend, VadConfig, VadProcessor, VadSegment, VadState};

#[cfg(feature = "audio-cpal")]
pub use audio::MicrophoneSource;

#[cfg(feature = "onnx")]
pub use vad::SileroBackend;
