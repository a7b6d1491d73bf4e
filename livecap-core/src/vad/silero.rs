//! Silero VAD neural backend.
//!
//! Runs the Silero VAD ONNX model (<https://github.com/snakers4/silero-vad>)
//! one 512-sample window at a time and carries its recurrent state between
//! calls. Published graphs differ in how that state is wired: v3/v4 use an
//! LSTM with separate `h`/`c` tensors of shape `[2, 1, 64]`, v5 a GRU with
//! a single `state` tensor of shape `[2, 1, 128]`. Tensor names also vary
//! across exports, so they are discovered from the session at load time and
//! both layouts collapse into a uniform list of feed/fetch state slots.

use std::path::PathBuf;

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::SessionInputValue;
use ort::value::Value;
use tracing::{info, warn};

use super::{VadBackend, VAD_SAMPLE_RATE};
use crate::error::{LivecapError, Result};

/// Window size expected by Silero VAD (samples at 16 kHz = 32 ms).
const WINDOW: usize = 512;

/// v3/v4 LSTM state tensors: 2 layers × 1 batch × 64 units.
const LSTM_SHAPE: (usize, usize, usize) = (2, 1, 64);
/// v5 GRU state tensor: 2 layers × 1 batch × 128 units.
const GRU_SHAPE: (usize, usize, usize) = (2, 1, 128);

fn onnx_error(e: impl std::fmt::Display) -> LivecapError {
    LivecapError::OnnxSession(e.to_string())
}

/// Non-state tensor names resolved from the session.
struct IoNames {
    input: String,
    sample_rate: Option<String>,
    output: String,
}

/// One recurrent tensor: fed under `feed`, read back under `fetch`.
struct StateSlot {
    feed: String,
    fetch: String,
    shape: (usize, usize, usize),
    values: Vec<f32>,
}

impl StateSlot {
    fn zeroed(feed: String, fetch: String, shape: (usize, usize, usize)) -> Self {
        Self {
            values: vec![0.0; shape.0 * shape.1 * shape.2],
            feed,
            fetch,
            shape,
        }
    }
}

/// Neural VAD backend using the Silero ONNX model.
pub struct SileroBackend {
    session: ort::session::Session,
    io: IoNames,
    /// Empty for stateless graphs, one slot for v5, two (h, c) for v3/v4.
    states: Vec<StateSlot>,
}

impl SileroBackend {
    /// Load the Silero VAD ONNX model from `path`.
    pub fn new(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LivecapError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(onnx_error)?
            .commit_from_file(path)
            .map_err(onnx_error)?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();

        let input = matching_name(&input_names, &["input", "audio", "x"])
            .or_else(|| input_names.first().cloned())
            .ok_or_else(|| LivecapError::OnnxSession("Silero model has no inputs".into()))?;
        let output = matching_name(&output_names, &["output", "speech_prob", "prob"])
            .or_else(|| output_names.first().cloned())
            .ok_or_else(|| LivecapError::OnnxSession("Silero model has no outputs".into()))?;
        let sample_rate = matching_name(&input_names, &["sr", "sample_rate"]);

        let states = recurrent_slots(&input_names, &output_names);
        if states.is_empty() {
            warn!("no recurrent state tensors found, running Silero stateless");
        }

        info!(
            path = %path.display(),
            state_slots = states.len(),
            "Silero VAD loaded"
        );

        Ok(Self {
            session,
            io: IoNames {
                input,
                sample_rate,
                output,
            },
            states,
        })
    }

    /// Default location for the model file under the models dir.
    pub fn default_model_path() -> PathBuf {
        crate::paths::models_dir().join("silero_vad.onnx")
    }

    fn run_window(&mut self, frame: &[f32]) -> Result<f32> {
        let mut feeds: Vec<(String, SessionInputValue<'_>)> =
            Vec::with_capacity(2 + self.states.len());

        let audio =
            Array2::<f32>::from_shape_vec((1, WINDOW), frame.to_vec()).map_err(onnx_error)?;
        feeds.push((
            self.io.input.clone(),
            Value::from_array(audio).map_err(onnx_error)?.into(),
        ));

        if let Some(sr_name) = &self.io.sample_rate {
            let sr = Array1::<i64>::from_elem(1, i64::from(VAD_SAMPLE_RATE));
            feeds.push((
                sr_name.clone(),
                Value::from_array(sr).map_err(onnx_error)?.into(),
            ));
        }

        for slot in &self.states {
            let state = Array3::<f32>::from_shape_vec(slot.shape, slot.values.clone())
                .map_err(onnx_error)?;
            feeds.push((
                slot.feed.clone(),
                Value::from_array(state).map_err(onnx_error)?.into(),
            ));
        }

        let outputs = self.session.run(feeds).map_err(onnx_error)?;

        let prob_tensor = outputs
            .get(self.io.output.as_str())
            .unwrap_or(&outputs[0]);
        let (_, prob_data) = prob_tensor
            .try_extract_tensor::<f32>()
            .map_err(onnx_error)?;
        let prob = prob_data.first().copied().unwrap_or(0.0);

        // Carry every recurrent tensor forward. A graph that stops
        // producing one degrades to stateless classification.
        let mut state_lost = false;
        for slot in &mut self.states {
            match outputs.get(slot.fetch.as_str()) {
                Some(value) => {
                    let (_, data) = value.try_extract_tensor::<f32>().map_err(onnx_error)?;
                    slot.values.clear();
                    slot.values.extend_from_slice(data);
                }
                None => state_lost = true,
            }
        }
        if state_lost {
            warn!("Silero state output missing, continuing stateless");
            self.states.clear();
        }

        Ok(prob)
    }
}

/// First session tensor whose name matches one of `wanted`,
/// case-insensitively.
fn matching_name(names: &[String], wanted: &[&str]) -> Option<String> {
    names
        .iter()
        .find(|name| wanted.iter().any(|w| name.eq_ignore_ascii_case(w)))
        .cloned()
}

/// Pair up recurrent feed/fetch tensors for whichever layout the graph
/// exposes. A slot only counts when both directions resolve.
fn recurrent_slots(inputs: &[String], outputs: &[String]) -> Vec<StateSlot> {
    let slot = |feeds: &[&str], fetches: &[&str], shape| {
        let feed = matching_name(inputs, feeds)?;
        let fetch = matching_name(outputs, fetches)?;
        Some(StateSlot::zeroed(feed, fetch, shape))
    };

    // v3/v4: the LSTM's h and c round-trip separately.
    let h = slot(&["h", "state_h"], &["hn", "state_hn", "h_out"], LSTM_SHAPE);
    let c = slot(&["c", "state_c"], &["cn", "state_cn", "c_out"], LSTM_SHAPE);
    if let (Some(h), Some(c)) = (h, c) {
        return vec![h, c];
    }

    // v5: everything folded into one GRU state tensor.
    slot(
        &["state", "h_0", "hidden"],
        &["stateN", "state_out", "h_0_out", "hn_out"],
        GRU_SHAPE,
    )
    .into_iter()
    .collect()
}

impl VadBackend for SileroBackend {
    fn process(&mut self, frame: &[f32]) -> Result<f32> {
        if frame.len() != WINDOW {
            return Err(LivecapError::VadBackend(format!(
                "Silero expects {WINDOW}-sample frames, got {}",
                frame.len()
            )));
        }
        self.run_window(frame)
            .map_err(|e| LivecapError::VadBackend(e.to_string()))
    }

    fn reset(&mut self) {
        for slot in &mut self.states {
            slot.values.iter_mut().for_each(|v| *v = 0.0);
        }
    }

    fn frame_size(&self) -> usize {
        WINDOW
    }

    fn name(&self) -> &str {
        "silero"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_model_file_reports_path() {
        let err = SileroBackend::new("/nonexistent/silero_vad.onnx");
        assert!(matches!(err, Err(LivecapError::ModelNotFound { .. })));
    }

    #[test]
    fn matching_name_is_case_insensitive() {
        let candidates = names(&["Input", "SR"]);
        assert_eq!(
            matching_name(&candidates, &["input"]).as_deref(),
            Some("Input")
        );
        assert_eq!(matching_name(&candidates, &["sr"]).as_deref(), Some("SR"));
        assert!(matching_name(&candidates, &["state"]).is_none());
    }

    #[test]
    fn lstm_graph_yields_two_slots() {
        let slots = recurrent_slots(
            &names(&["input", "sr", "h", "c"]),
            &names(&["output", "hn", "cn"]),
        );
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].feed, "h");
        assert_eq!(slots[0].fetch, "hn");
        assert_eq!(slots[1].feed, "c");
        assert_eq!(slots[1].fetch, "cn");
        assert_eq!(slots[0].values.len(), 128);
    }

    #[test]
    fn gru_graph_yields_one_slot() {
        let slots = recurrent_slots(
            &names(&["input", "sr", "state"]),
            &names(&["output", "stateN"]),
        );
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].feed, "state");
        assert_eq!(slots[0].fetch, "stateN");
        assert_eq!(slots[0].values.len(), 256);
    }

    #[test]
    fn half_wired_lstm_falls_back_to_stateless() {
        // h round-trips but c has no output: neither LSTM nor GRU applies.
        let slots = recurrent_slots(
            &names(&["input", "h", "c"]),
            &names(&["output", "hn"]),
        );
        assert!(slots.is_empty());
    }
}
