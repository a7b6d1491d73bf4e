//! Model and cache directory resolution.
//!
//! Both directories can be pinned through environment variables so that
//! embedding applications control where large model files land:
//!
//! | Variable | Directory |
//! |----------|-----------|
//! | `LIVECAP_CORE_MODELS_DIR` | model storage root |
//! | `LIVECAP_CORE_CACHE_DIR`  | downloads and temp data |

use std::path::PathBuf;

/// Root directory for model storage.
///
/// Resolution order: `LIVECAP_CORE_MODELS_DIR`, then a platform data dir
/// (`%APPDATA%` on Windows, `~/.local/share` elsewhere) under `livecap/models`.
pub fn models_dir() -> PathBuf {
    if let Some(explicit) = std::env::var_os("LIVECAP_CORE_MODELS_DIR") {
        return PathBuf::from(explicit);
    }
    platform_data_dir().join("livecap").join("models")
}

/// Root directory for downloads and temporary files.
///
/// Resolution order: `LIVECAP_CORE_CACHE_DIR`, then a platform cache dir
/// under `livecap/cache`.
pub fn cache_dir() -> PathBuf {
    if let Some(explicit) = std::env::var_os("LIVECAP_CORE_CACHE_DIR") {
        return PathBuf::from(explicit);
    }
    platform_cache_dir().join("livecap").join("cache")
}

/// Scoped subdirectory of [`models_dir`] for one engine.
pub fn engine_models_dir(engine_id: &str) -> PathBuf {
    models_dir().join(engine_id)
}

#[cfg(windows)]
fn platform_data_dir() -> PathBuf {
    std::env::var_os("APPDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(not(windows))]
fn platform_data_dir() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("share"))
        })
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(windows)]
fn platform_cache_dir() -> PathBuf {
    std::env::var_os("LOCALAPPDATA")
        .map(PathBuf::from)
        .unwrap_or_else(platform_data_dir)
}

#[cfg(not(windows))]
fn platform_cache_dir() -> PathBuf {
    std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_dir_is_scoped_under_models_dir() {
        let root = models_dir();
        let scoped = engine_models_dir("echo");
        assert!(scoped.starts_with(&root));
        assert!(scoped.ends_with("echo"));
    }
}
