//! Caption result types.
//!
//! [`TranscriptionResult`] is the committed caption for a closed
//! utterance; [`InterimResult`] is the preview for an utterance still in
//! flight. Both are immutable once emitted — an interim is superseded by
//! the next interim or the final, never edited.

use serde::{Deserialize, Serialize};

use super::srt;

/// Final caption for one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionResult {
    /// Recognized text, whitespace-trimmed.
    pub text: String,
    /// Segment start in stream time (seconds).
    pub start_time: f64,
    /// Segment end in stream time (seconds).
    pub end_time: f64,
    /// Always `true` for this type; kept for wire compatibility with
    /// interim events.
    pub is_final: bool,
    /// Engine confidence in [0.0, 1.0].
    pub confidence: f32,
    /// Detected language code, empty when the engine does not report one.
    pub language: String,
    /// Which audio source produced this segment.
    pub source_id: String,
    /// Translation of `text`, when a translator was configured and
    /// succeeded within its deadline.
    pub translated_text: Option<String>,
    /// Target language of `translated_text`.
    pub target_language: Option<String>,
}

impl TranscriptionResult {
    /// Segment length in seconds.
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Render as one SRT entry with the given 1-based index.
    pub fn to_srt_entry(&self, index: usize) -> String {
        srt::format_entry(index, self.start_time, self.end_time, &self.text)
    }
}

/// Preview transcript during an ongoing utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterimResult {
    /// Preview text; may change in the next interim.
    pub text: String,
    /// Seconds of speech accumulated since the utterance began.
    pub accumulated_time: f64,
    /// Which audio source produced this preview.
    pub source_id: String,
}
