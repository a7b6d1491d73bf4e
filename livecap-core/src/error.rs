use thiserror::Error;

/// All errors produced by livecap-core.
///
/// Per-segment failures (`Engine`) are recovered locally by the stream
/// orchestrator; everything else surfaces to the caller.
#[derive(Debug, Error)]
pub enum LivecapError {
    #[error("audio source open error: {0}")]
    SourceOpen(String),

    #[error("audio source read error: {0}")]
    SourceRead(String),

    #[error("no input device found")]
    NoInputDevice,

    #[error("VAD backend error: {0}")]
    VadBackend(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("unknown engine id: {0}")]
    UnknownEngine(String),

    #[error("dispatcher is stopped")]
    DispatcherShutdown,

    #[error("dispatcher queue is full")]
    QueueFull,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LivecapError>;
