//! Transcription results and the stream orchestrator.

pub mod context;
pub mod result;
pub mod srt;
pub mod stream;
pub mod worker_pool;

pub use context::{ContextWindow, MAX_CONTEXT_BUFFER};
pub use result::{InterimResult, TranscriptionResult};
pub use stream::{translation_timeout, StreamTranscriber, SyncDriver};
pub use worker_pool::{JobError, JobHandle, WorkerPool};
