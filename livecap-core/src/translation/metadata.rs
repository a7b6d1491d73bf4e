//! Translator registry data.
//!
//! Static descriptions of the known translation backends, used for
//! discovery and pair-support warnings. The backends themselves are
//! external; callers construct one and hand it to the stream orchestrator
//! as a [`Translator`](super::Translator) object.

/// Static description of one translation backend.
pub struct TranslatorInfo {
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    /// ISO 639-1 pairs; empty means universal.
    pub supported_pairs: &'static [(&'static str, &'static str)],
    pub requires_model_load: bool,
    pub default_context_sentences: usize,
}

static TRANSLATORS: &[TranslatorInfo] = &[
    TranslatorInfo {
        id: "google",
        display_name: "Google Translate",
        description: "Cloud translation API; near-universal pair coverage",
        supported_pairs: &[],
        requires_model_load: false,
        default_context_sentences: 2,
    },
    TranslatorInfo {
        id: "opus_mt",
        display_name: "OPUS-MT",
        description: "Helsinki-NLP OPUS-MT models, on-device",
        supported_pairs: &[("ja", "en"), ("en", "ja")],
        requires_model_load: true,
        default_context_sentences: 0,
    },
];

/// Look up the metadata for `translator_id`.
pub fn translator_info(translator_id: &str) -> Option<&'static TranslatorInfo> {
    TRANSLATORS.iter().find(|info| info.id == translator_id)
}

/// All translator ids supporting `(source, target)` (ISO 639-1).
pub fn translators_for_pair(source: &str, target: &str) -> Vec<&'static str> {
    let source = super::lang::to_iso639_1(source);
    let target = super::lang::to_iso639_1(target);
    TRANSLATORS
        .iter()
        .filter(|info| {
            info.supported_pairs.is_empty()
                || info
                    .supported_pairs
                    .iter()
                    .any(|&(s, t)| s == source && t == target)
        })
        .map(|info| info.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universal_translator_matches_every_pair() {
        let ids = translators_for_pair("ko", "de");
        assert!(ids.contains(&"google"));
        assert!(!ids.contains(&"opus_mt"));
    }

    #[test]
    fn finite_pair_set_is_respected() {
        assert!(translators_for_pair("ja", "en").contains(&"opus_mt"));
        assert!(translators_for_pair("en", "ja").contains(&"opus_mt"));
    }

    #[test]
    fn pair_lookup_normalizes_codes() {
        assert!(translators_for_pair("ja-JP", "en-US").contains(&"opus_mt"));
    }

    #[test]
    fn info_lookup_by_id() {
        let info = translator_info("opus_mt").expect("registered");
        assert!(info.requires_model_load);
        assert_eq!(info.default_context_sentences, 0);
    }
}
