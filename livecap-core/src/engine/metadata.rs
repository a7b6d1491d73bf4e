//! Engine registry and factory.
//!
//! A static table maps engine ids to display metadata and a constructor,
//! so callers discover engines by language and build them by id without
//! any reflection. Applications embedding real backends (Whisper-family,
//! NeMo-family) register them at their own layer; the table here carries
//! the engines this crate can construct itself.

use super::{stub::EchoEngine, Transcriber};
use crate::error::{LivecapError, Result};

/// Static description of one ASR engine.
pub struct EngineInfo {
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    /// ISO 639-1 codes; empty means every language.
    pub supported_languages: &'static [&'static str],
    pub required_sample_rate: u32,
    pub requires_download: bool,
    constructor: fn() -> Box<dyn Transcriber>,
}

static ENGINES: &[EngineInfo] = &[EngineInfo {
    id: "echo",
    display_name: "Echo (diagnostic)",
    description: "Deterministic stub reporting segment shape; no model required",
    supported_languages: &[],
    required_sample_rate: 16_000,
    requires_download: false,
    constructor: || Box::new(EchoEngine::new()),
}];

/// Look up the metadata for `engine_id`.
pub fn engine_info(engine_id: &str) -> Option<&'static EngineInfo> {
    ENGINES.iter().find(|info| info.id == engine_id)
}

/// All registered engine ids.
pub fn list_engine_ids() -> Vec<&'static str> {
    ENGINES.iter().map(|info| info.id).collect()
}

/// Engines that support `lang` (ISO 639-1 or BCP-47).
pub fn engines_for_language(lang: &str) -> Vec<&'static str> {
    let iso = crate::translation::lang::to_iso639_1(lang);
    ENGINES
        .iter()
        .filter(|info| {
            info.supported_languages.is_empty()
                || info.supported_languages.iter().any(|&l| l == iso)
        })
        .map(|info| info.id)
        .collect()
}

/// Construct the engine registered under `engine_id`.
pub fn create_engine(engine_id: &str) -> Result<Box<dyn Transcriber>> {
    let info = engine_info(engine_id)
        .ok_or_else(|| LivecapError::UnknownEngine(engine_id.to_string()))?;
    Ok((info.constructor)())
}
