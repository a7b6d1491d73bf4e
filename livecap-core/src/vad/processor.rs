//! Chunk-level VAD driver.
//!
//! Accepts audio chunks of any size and rate, converts to the 16 kHz VAD
//! rate, frames them to the backend's window, and drives the state
//! machine. Sub-frame tails are carried over to the next chunk, so feeding
//! the same samples in different chunkings produces identical segments.

use tracing::warn;

use super::{config::VadConfig, state_machine::VadStateMachine, VadBackend, VadSegment, VadState};
use crate::audio::resample::RateConverter;
use crate::error::Result;
use crate::vad::VAD_SAMPLE_RATE;

/// Feeds chunks through a [`VadBackend`] into a [`VadStateMachine`].
pub struct VadProcessor {
    backend: Box<dyn VadBackend>,
    machine: VadStateMachine,
    /// Tail samples (at the VAD rate) that did not fill a full frame.
    residual: Vec<f32>,
    /// Created lazily for the first non-16 kHz chunk.
    converter: Option<RateConverter>,
}

impl VadProcessor {
    pub fn new(config: VadConfig, backend: Box<dyn VadBackend>) -> Result<Self> {
        config.validate()?;
        let machine = VadStateMachine::new(config, backend.frame_size());
        Ok(Self {
            backend,
            machine,
            residual: Vec::new(),
            converter: None,
        })
    }

    /// Default configuration with the given backend.
    pub fn with_backend(backend: Box<dyn VadBackend>) -> Result<Self> {
        Self::new(VadConfig::default(), backend)
    }

    pub fn state(&self) -> VadState {
        self.machine.state()
    }

    /// Stream time processed so far (seconds at the VAD rate).
    pub fn current_time(&self) -> f64 {
        self.machine.current_time()
    }

    pub fn frame_size(&self) -> usize {
        self.backend.frame_size()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Process one chunk of mono samples at `sample_rate`, returning any
    /// segments (interim and final) it completed.
    pub fn process_chunk(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<VadSegment>> {
        let converted;
        let samples: &[f32] = if sample_rate == VAD_SAMPLE_RATE {
            samples
        } else {
            let rebuild = match self.converter.as_ref() {
                Some(c) if c.input_rate() == sample_rate => false,
                Some(c) => {
                    warn!(
                        previous = c.input_rate(),
                        current = sample_rate,
                        "input sample rate changed mid-session, rebuilding resampler"
                    );
                    true
                }
                None => true,
            };
            if rebuild {
                self.converter = Some(RateConverter::new(sample_rate, VAD_SAMPLE_RATE)?);
            }
            converted = match self.converter.as_mut() {
                Some(converter) => converter.process(samples),
                None => Vec::new(),
            };
            &converted
        };

        if samples.is_empty() && self.residual.is_empty() {
            return Ok(Vec::new());
        }

        self.residual.extend_from_slice(samples);

        let frame_size = self.backend.frame_size();
        let mut segments = Vec::new();
        let mut offset = 0;

        while self.residual.len() - offset >= frame_size {
            let frame = &self.residual[offset..offset + frame_size];
            let prob = self.backend.process(frame)?.clamp(0.0, 1.0);
            segments.extend(self.machine.process_frame(prob, frame));
            offset += frame_size;
        }

        self.residual.drain(..offset);
        Ok(segments)
    }

    /// Close the session: flush any pending utterance as final segments.
    /// The sub-frame residual is discarded.
    pub fn finalize(&mut self) -> Vec<VadSegment> {
        self.machine.finalize()
    }

    /// Restore the initial state: `Silence`, empty buffers, zero elapsed
    /// time, backend state cleared.
    pub fn reset(&mut self) {
        self.machine.reset();
        self.backend.reset();
        self.residual.clear();
        if let Some(converter) = self.converter.as_mut() {
            converter.reset();
        }
    }

    #[cfg(test)]
    pub(crate) fn residual_len(&self) -> usize {
        self.residual.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LivecapError;

    /// Scripted backend returning a fixed probability sequence.
    struct ScriptedBackend {
        probabilities: Vec<f32>,
        index: usize,
        frame_size: usize,
        fail: bool,
    }

    impl ScriptedBackend {
        fn new(probabilities: Vec<f32>) -> Self {
            Self {
                probabilities,
                index: 0,
                frame_size: 512,
                fail: false,
            }
        }
    }

    impl VadBackend for ScriptedBackend {
        fn process(&mut self, _frame: &[f32]) -> Result<f32> {
            if self.fail {
                return Err(LivecapError::VadBackend("scripted failure".into()));
            }
            let prob = self.probabilities.get(self.index).copied().unwrap_or(0.0);
            self.index += 1;
            Ok(prob)
        }

        fn reset(&mut self) {
            self.index = 0;
        }

        fn frame_size(&self) -> usize {
            self.frame_size
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn quick_config() -> VadConfig {
        VadConfig {
            min_speech_ms: 64,
            min_silence_ms: 64,
            speech_pad_ms: 32,
            interim_min_duration_ms: 10_000,
            ..VadConfig::default()
        }
    }

    #[test]
    fn empty_chunk_yields_nothing() {
        let mut processor =
            VadProcessor::new(quick_config(), Box::new(ScriptedBackend::new(vec![]))).unwrap();
        let segments = processor.process_chunk(&[], 16_000).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn sub_frame_chunk_is_retained_as_residual() {
        let mut processor =
            VadProcessor::new(quick_config(), Box::new(ScriptedBackend::new(vec![0.3])))
                .unwrap();
        let segments = processor.process_chunk(&vec![0.0; 256], 16_000).unwrap();
        assert!(segments.is_empty());
        assert_eq!(processor.residual_len(), 256);
        assert_eq!(processor.current_time(), 0.0);

        // Residual + 256 new samples = one full frame.
        processor.process_chunk(&vec![0.0; 256], 16_000).unwrap();
        assert_eq!(processor.residual_len(), 0);
        assert!((processor.current_time() - 0.032).abs() < 1e-3);
    }

    #[test]
    fn chunking_does_not_change_segments() {
        let probs: Vec<f32> = std::iter::repeat(0.9)
            .take(10)
            .chain(std::iter::repeat(0.1).take(15))
            .collect();
        let audio: Vec<f32> = (0..25 * 512).map(|i| (i as f32 * 0.001).sin()).collect();

        let mut one_shot =
            VadProcessor::new(quick_config(), Box::new(ScriptedBackend::new(probs.clone())))
                .unwrap();
        let mut all = one_shot.process_chunk(&audio, 16_000).unwrap();
        all.extend(one_shot.finalize());

        let mut chunked =
            VadProcessor::new(quick_config(), Box::new(ScriptedBackend::new(probs))).unwrap();
        let mut collected = Vec::new();
        // Ragged chunk sizes summing to the same total.
        for chunk in audio.chunks(377) {
            collected.extend(chunked.process_chunk(chunk, 16_000).unwrap());
        }
        collected.extend(chunked.finalize());

        assert_eq!(all.len(), collected.len());
        for (a, b) in all.iter().zip(&collected) {
            assert_eq!(a.audio, b.audio);
            assert_eq!(a.is_final, b.is_final);
            assert!((a.start_time - b.start_time).abs() < 1e-12);
        }
    }

    #[test]
    fn backend_failure_is_fatal() {
        let mut backend = ScriptedBackend::new(vec![0.9]);
        backend.fail = true;
        let mut processor = VadProcessor::new(quick_config(), Box::new(backend)).unwrap();
        let err = processor.process_chunk(&vec![0.0; 512], 16_000);
        assert!(matches!(err, Err(LivecapError::VadBackend(_))));
    }

    #[test]
    fn reset_clears_residual_and_clock() {
        let mut processor =
            VadProcessor::new(quick_config(), Box::new(ScriptedBackend::new(vec![0.3; 4])))
                .unwrap();
        processor.process_chunk(&vec![0.0; 700], 16_000).unwrap();
        assert!(processor.residual_len() > 0);

        processor.reset();
        assert_eq!(processor.residual_len(), 0);
        assert_eq!(processor.current_time(), 0.0);
        assert_eq!(processor.state(), VadState::Silence);
    }

    #[test]
    fn non_vad_rate_chunks_are_resampled() {
        // 48 kHz input: 3× the samples per frame of stream time.
        let probs = vec![0.1f32; 100];
        let mut processor =
            VadProcessor::new(quick_config(), Box::new(ScriptedBackend::new(probs))).unwrap();
        // 1 s at 48 kHz ≈ 1 s of stream time after conversion.
        for chunk in vec![0.0f32; 48_000].chunks(4800) {
            processor.process_chunk(chunk, 48_000).unwrap();
        }
        let t = processor.current_time();
        assert!((t - 1.0).abs() < 0.1, "stream time {t}");
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let config = VadConfig {
            threshold: 0.2,
            neg_threshold: Some(0.8),
            ..VadConfig::default()
        };
        let result = VadProcessor::new(config, Box::new(ScriptedBackend::new(vec![])));
        assert!(matches!(result, Err(LivecapError::Config(_))));
    }
}
