//! Translation contract and support types.
//!
//! Translation backends (cloud APIs, on-device LLMs) live outside this
//! crate; they plug in through the [`Translator`] trait. This module
//! carries the contract, the error taxonomy the stream orchestrator
//! dispatches on, language-code normalization, and the retry policy for
//! network-backed translators.

pub mod lang;
pub mod metadata;
pub mod retry;

pub use lang::{normalize_for_google, same_language, to_iso639_1};
pub use metadata::{translator_info, translators_for_pair, TranslatorInfo};
pub use retry::with_retry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a translation failed. Callers retry `Network`, surface the rest.
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("translation network error: {0}")]
    Network(String),

    #[error("translation model error: {0}")]
    Model(String),

    #[error("language pair ({source_lang} -> {target}) not supported by {translator}")]
    UnsupportedPair {
        source_lang: String,
        target: String,
        translator: String,
    },

    #[error("translation error: {0}")]
    Other(String),
}

/// A completed translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    /// Translated text.
    pub text: String,
    /// The source text that was translated.
    pub original_text: String,
    /// Source language code as given to `translate`.
    pub source_lang: String,
    /// Target language code as given to `translate`.
    pub target_lang: String,
    /// Confidence, when the backend reports one (LLM translators).
    pub confidence: Option<f32>,
}

/// Contract required of every translation backend.
///
/// Implementations are shared across worker threads, so `translate` takes
/// `&self`; interior mutability is the implementor's concern.
pub trait Translator: Send + Sync {
    /// Translate `text` from `source_lang` to `target_lang`.
    ///
    /// `context` carries the most recent source-language sentences, oldest
    /// first, when the backend advertises a nonzero
    /// [`default_context_sentences`](Translator::default_context_sentences).
    fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        context: Option<&[String]>,
    ) -> Result<TranslationResult, TranslationError>;

    /// Supported language pairs. Empty means universal.
    fn supported_pairs(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// How many context sentences this backend wants. 0 disables context.
    fn default_context_sentences(&self) -> usize {
        2
    }

    /// Backend identifier (e.g. `"google"`, `"opus_mt"`).
    fn translator_name(&self) -> &str;

    /// Whether the backend is ready to translate.
    fn is_initialized(&self) -> bool;

    /// Load model weights for local backends. Cloud APIs are no-ops.
    fn load_model(&mut self) -> Result<(), TranslationError> {
        Ok(())
    }

    /// Release model resources.
    fn cleanup(&mut self) {}
}

/// Reject same-language requests before hitting a backend.
///
/// Comparison happens on normalized ISO 639-1 codes, so `zh` vs `zh-CN`
/// counts as the same language.
pub fn ensure_distinct_pair(
    source_lang: &str,
    target_lang: &str,
    translator: &str,
) -> Result<(), TranslationError> {
    if same_language(source_lang, target_lang) {
        return Err(TranslationError::UnsupportedPair {
            source_lang: source_lang.to_string(),
            target: target_lang.to_string(),
            translator: translator.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_language_pair_is_rejected() {
        let err = ensure_distinct_pair("zh-CN", "zh", "google");
        assert!(matches!(err, Err(TranslationError::UnsupportedPair { .. })));
    }

    #[test]
    fn distinct_pair_is_accepted() {
        assert!(ensure_distinct_pair("ja", "en", "google").is_ok());
    }

    #[test]
    fn unsupported_pair_error_names_the_pair() {
        let err = TranslationError::UnsupportedPair {
            source_lang: "ja".into(),
            target: "en".into(),
            translator: "opus_mt".into(),
        };
        let message = err.to_string();
        assert!(message.contains("ja -> en"));
        assert!(message.contains("opus_mt"));
    }
}
