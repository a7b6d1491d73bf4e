//! Language code normalization.
//!
//! BCP-47 codes come in on every public surface; comparisons happen on
//! ISO 639-1 primary subtags. Google-style translators distinguish
//! Simplified from Traditional Chinese, so their normalization preserves
//! `zh-TW`.

/// BCP-47 → ISO 639-1 primary subtag, lowercased.
///
/// `"zh-CN"` → `"zh"`, `"PT-br"` → `"pt"`, `"ja"` → `"ja"`.
pub fn to_iso639_1(code: &str) -> String {
    code.split(['-', '_'])
        .next()
        .unwrap_or(code)
        .trim()
        .to_ascii_lowercase()
}

/// Whether two codes denote the same language after normalization.
pub fn same_language(a: &str, b: &str) -> bool {
    to_iso639_1(a) == to_iso639_1(b)
}

/// Normalize for Google-style translators.
///
/// `zh-TW`/`zh-Hant` stay `zh-TW`; every other Chinese code folds to
/// `zh-CN`; the rest become their ISO 639-1 subtag.
pub fn normalize_for_google(lang: &str) -> String {
    let lowered = lang.trim().to_ascii_lowercase();
    if lowered == "zh-tw" || lowered == "zh-hant" {
        return "zh-TW".to_string();
    }
    let iso = to_iso639_1(lang);
    if iso == "zh" {
        return "zh-CN".to_string();
    }
    iso
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_subtag_is_extracted() {
        assert_eq!(to_iso639_1("ja"), "ja");
        assert_eq!(to_iso639_1("zh-CN"), "zh");
        assert_eq!(to_iso639_1("ZH-TW"), "zh");
        assert_eq!(to_iso639_1("pt_BR"), "pt");
    }

    #[test]
    fn google_keeps_traditional_chinese() {
        assert_eq!(normalize_for_google("zh-TW"), "zh-TW");
        assert_eq!(normalize_for_google("zh-Hant"), "zh-TW");
    }

    #[test]
    fn google_folds_other_chinese_to_simplified() {
        assert_eq!(normalize_for_google("zh"), "zh-CN");
        assert_eq!(normalize_for_google("zh-CN"), "zh-CN");
        assert_eq!(normalize_for_google("zh-Hans"), "zh-CN");
    }

    #[test]
    fn google_passes_plain_codes_through() {
        assert_eq!(normalize_for_google("ja"), "ja");
        assert_eq!(normalize_for_google("pt-BR"), "pt");
    }

    #[test]
    fn same_language_ignores_region() {
        assert!(same_language("zh-CN", "zh"));
        assert!(same_language("pt-BR", "PT"));
        assert!(!same_language("ja", "en"));
    }
}
