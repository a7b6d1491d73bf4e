//! ASR engine abstraction.
//!
//! The [`Transcriber`] trait decouples the pipeline from any specific
//! backend (Whisper-family, NeMo-family, the built-in echo stub). Engines
//! are stateful — decoder caches, hidden states — so `transcribe` takes
//! `&mut self` and all sharing goes through [`EngineHandle`]'s
//! `parking_lot::Mutex`.

pub mod cache;
pub mod metadata;
pub mod stub;

pub use cache::EngineCache;
pub use metadata::{create_engine, engine_info, engines_for_language, list_engine_ids, EngineInfo};
pub use stub::EchoEngine;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Contract required of every ASR backend.
pub trait Transcriber: Send {
    /// Transcribe mono f32 audio at `sample_rate`.
    ///
    /// Returns the recognized text and a confidence in `[0, 1]`.
    fn transcribe(&mut self, audio: &[f32], sample_rate: u32) -> Result<(String, f32)>;

    /// Sample rate this engine expects its input at (typically 16 000).
    fn required_sample_rate(&self) -> u32 {
        16_000
    }

    /// Engine identifier for logs and stats.
    fn engine_name(&self) -> &str;

    /// Release model resources. Called once when the owner shuts down.
    fn cleanup(&mut self) {}
}

/// Thread-safe reference-counted handle to any [`Transcriber`].
///
/// `parking_lot::Mutex` over std: non-poisoning on panic, and the pipeline
/// locks it on every segment.
#[derive(Clone)]
pub struct EngineHandle(pub Arc<Mutex<dyn Transcriber>>);

impl EngineHandle {
    pub fn new<T: Transcriber + 'static>(engine: T) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }

    pub fn from_boxed(engine: Box<dyn Transcriber>) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }

    /// The sample rate the wrapped engine requires.
    pub fn required_sample_rate(&self) -> u32 {
        self.0.lock().required_sample_rate()
    }

    pub fn engine_name(&self) -> String {
        self.0.lock().engine_name().to_string()
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

impl<T: Transcriber + ?Sized> Transcriber for Box<T> {
    fn transcribe(&mut self, audio: &[f32], sample_rate: u32) -> Result<(String, f32)> {
        (**self).transcribe(audio, sample_rate)
    }

    fn required_sample_rate(&self) -> u32 {
        (**self).required_sample_rate()
    }

    fn engine_name(&self) -> &str {
        (**self).engine_name()
    }

    fn cleanup(&mut self) {
        (**self).cleanup()
    }
}
