//! SRT entry formatting and parsing.
//!
//! Entries follow `index \n HH:MM:SS,mmm --> HH:MM:SS,mmm \n text \n`.
//! Negative times clamp to zero. The parser tolerates `.` as the
//! millisecond separator, which some tools emit.

/// Seconds → `HH:MM:SS,mmm`.
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let hours = (seconds / 3600.0) as u64;
    let minutes = ((seconds % 3600.0) / 60.0) as u64;
    let secs = (seconds % 60.0) as u64;
    let millis = ((seconds % 1.0) * 1000.0) as u64;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

/// Render one SRT entry.
pub fn format_entry(index: usize, start: f64, end: f64, text: &str) -> String {
    format!(
        "{index}\n{} --> {}\n{text}\n",
        format_timestamp(start),
        format_timestamp(end)
    )
}

/// `HH:MM:SS,mmm` (or `HH:MM:SS.mmm`) → seconds.
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let s = s.trim().replace(',', ".");
    let mut parts = s.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse one entry of the form produced by [`format_entry`].
///
/// Returns `(index, start_secs, end_secs, text)`; multi-line text is
/// joined with spaces.
pub fn parse_entry(entry: &str) -> Option<(usize, f64, f64, String)> {
    let mut lines = entry.lines();
    let index: usize = lines.next()?.trim().parse().ok()?;

    let ts_line = lines.next()?;
    let (start_str, end_str) = ts_line.split_once("-->")?;
    let start = parse_timestamp(start_str)?;
    let end = parse_timestamp(end_str)?;

    let text = lines
        .map(str::trim)
        .take_while(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Some((index, start, end, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_hour_scale_timestamps() {
        assert_eq!(format_timestamp(3661.5), "01:01:01,500");
        assert_eq!(format_timestamp(90.5), "00:01:30,500");
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
    }

    #[test]
    fn negative_timestamp_clamps() {
        assert_eq!(format_timestamp(-5.0), "00:00:00,000");
    }

    #[test]
    fn parses_both_millisecond_separators() {
        assert!((parse_timestamp("00:00:02,965").unwrap() - 2.965).abs() < 1e-3);
        assert!((parse_timestamp("00:01:30.500").unwrap() - 90.5).abs() < 1e-3);
        assert!((parse_timestamp("01:00:00,000").unwrap() - 3600.0).abs() < 1e-3);
    }

    #[test]
    fn rejects_malformed_timestamps() {
        assert!(parse_timestamp("1:2").is_none());
        assert!(parse_timestamp("aa:bb:cc").is_none());
    }

    #[test]
    fn entry_round_trips() {
        let entry = format_entry(42, 3661.5, 3665.123, "Long video content");
        let (index, start, end, text) = parse_entry(&entry).expect("parse back");
        assert_eq!(index, 42);
        assert!((start - 3661.5).abs() < 1e-3);
        assert!((end - 3665.123).abs() < 1e-3);
        assert_eq!(text, "Long video content");
    }
}
