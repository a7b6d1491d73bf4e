//! Exponential-backoff retry for network translators.

use std::time::Duration;

use tracing::warn;

use super::TranslationError;

/// Default number of attempts.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Default first-retry delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Run `op`, retrying [`TranslationError::Network`] failures with delays of
/// `base_delay * 2^attempt`. Other error kinds fail immediately.
pub fn with_retry<T>(
    max_retries: usize,
    base_delay: Duration,
    mut op: impl FnMut() -> Result<T, TranslationError>,
) -> Result<T, TranslationError> {
    let attempts = max_retries.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(TranslationError::Network(message)) => {
                if attempt + 1 < attempts {
                    let delay = base_delay * (1u32 << attempt);
                    warn!(
                        attempt = attempt + 1,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = message.as_str(),
                        "translation failed, retrying"
                    );
                    std::thread::sleep(delay);
                }
                last_error = Some(TranslationError::Network(message));
            }
            Err(other) => return Err(other),
        }
    }

    Err(last_error.unwrap_or_else(|| TranslationError::Other("retry exhausted".into())))
}
