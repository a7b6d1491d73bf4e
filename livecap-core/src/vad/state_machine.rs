//! Utterance segmentation state machine.
//!
//! Consumes per-frame speech probabilities and emits [`VadSegment`]s:
//!
//! ```text
//! Silence ──p ≥ threshold──► PotentialSpeech ──run ≥ min_speech──► Speech
//!    ▲                            │                                  │
//!    └────p < neg_threshold───────┘            p < neg_threshold     │
//!    ▲                                                               ▼
//!    └──silence ≥ min_silence── PotentialSilence ◄──────────────────┘
//!              (emit final)          │ p ≥ threshold back to Speech
//! ```
//!
//! Entry and exit use different thresholds (`neg_threshold < threshold`)
//! so borderline frames cannot flap the machine. Each final segment carries
//! `speech_pad_ms` of audio on both flanks: the leading pad comes from a
//! bounded pre-roll of recent frames, the trailing pad from frames that
//! arrive after silence onset.

use std::collections::VecDeque;

use tracing::{debug, trace};

use super::{config::VadConfig, VAD_SAMPLE_RATE};

/// Machine state. Initial: `Silence`. There is no terminal state; a
/// session ends with [`VadStateMachine::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Silence,
    PotentialSpeech,
    Speech,
    PotentialSilence,
}

/// An utterance boundary with its audio, interim or final.
#[derive(Debug, Clone)]
pub struct VadSegment {
    /// Mono 16 kHz samples covering `[start_time, end_time]`.
    pub audio: Vec<f32>,
    /// Segment start in stream time (seconds).
    pub start_time: f64,
    /// Segment end in stream time (seconds).
    pub end_time: f64,
    /// `false` for interim previews of an ongoing utterance.
    pub is_final: bool,
}

impl VadSegment {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// A closed utterance still collecting its trailing pad.
struct ClosingSegment {
    audio: Vec<f32>,
    start_time: f64,
    end_time: f64,
    samples_needed: usize,
}

/// Converts a probability stream into utterance segments.
///
/// Strictly single-threaded; driven frame-by-frame from one producer.
pub struct VadStateMachine {
    config: VadConfig,
    neg_threshold: f32,
    frame_secs: f64,
    pad_secs: f64,

    state: VadState,
    /// Stream time at the start of the next frame.
    clock: f64,

    /// Recent raw samples, sized to supply the leading pad.
    pre_roll: VecDeque<f32>,
    pre_roll_capacity: usize,

    /// Buffer while speech is unconfirmed (includes the leading pad).
    pending_audio: Vec<f32>,
    tentative_start: f64,
    speech_run_secs: f64,

    /// Confirmed utterance buffer.
    segment_audio: Vec<f32>,
    segment_start: f64,

    silence_onset: f64,
    silence_run_secs: f64,

    /// Stream time of the last interim for the current utterance.
    last_interim_at: Option<f64>,

    closing: Option<ClosingSegment>,
}

impl VadStateMachine {
    pub fn new(config: VadConfig, frame_size: usize) -> Self {
        let neg_threshold = config.effective_neg_threshold();
        let pad_secs = config.speech_pad_ms as f64 / 1000.0;
        let pad_samples = (config.speech_pad_ms as usize * VAD_SAMPLE_RATE as usize) / 1000;
        Self {
            neg_threshold,
            frame_secs: frame_size as f64 / VAD_SAMPLE_RATE as f64,
            pad_secs,
            config,
            state: VadState::Silence,
            clock: 0.0,
            pre_roll: VecDeque::with_capacity(pad_samples + frame_size),
            pre_roll_capacity: pad_samples,
            pending_audio: Vec::new(),
            tentative_start: 0.0,
            speech_run_secs: 0.0,
            segment_audio: Vec::new(),
            segment_start: 0.0,
            silence_onset: 0.0,
            silence_run_secs: 0.0,
            last_interim_at: None,
            closing: None,
        }
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// Total stream time processed so far (seconds).
    pub fn current_time(&self) -> f64 {
        self.clock
    }

    /// Advance the machine by one frame with speech probability `prob`.
    ///
    /// Returns zero or more segments: at most one completed final (a
    /// previously closed utterance whose trailing pad just filled, or a
    /// forced max-length split) and at most one interim.
    pub fn process_frame(&mut self, prob: f32, frame: &[f32]) -> Vec<VadSegment> {
        let mut out = Vec::new();
        let frame_start = self.clock;
        let frame_end = frame_start + self.frame_secs;

        self.fill_trailing_pad(frame, &mut out);

        match self.state {
            VadState::Silence => {
                if prob >= self.config.threshold {
                    self.enter_potential_speech(frame, frame_start, &mut out);
                }
            }

            VadState::PotentialSpeech => {
                self.pending_audio.extend_from_slice(frame);
                if prob >= self.config.threshold {
                    self.speech_run_secs += self.frame_secs;
                    if self.speech_run_secs * 1000.0 + 1e-6
                        >= self.config.min_speech_ms as f64
                    {
                        debug!(
                            start = format_args!("{:.3}", self.tentative_start),
                            "speech confirmed"
                        );
                        self.state = VadState::Speech;
                        self.segment_start = self.tentative_start;
                        self.segment_audio = std::mem::take(&mut self.pending_audio);
                        self.last_interim_at = None;
                    }
                } else if prob < self.neg_threshold {
                    // False start.
                    trace!(
                        start = format_args!("{:.3}", self.tentative_start),
                        "speech candidate discarded"
                    );
                    self.state = VadState::Silence;
                    self.pending_audio.clear();
                    self.speech_run_secs = 0.0;
                }
                // Probabilities between the two thresholds keep buffering
                // without extending the speech run.
            }

            VadState::Speech => {
                self.segment_audio.extend_from_slice(frame);

                if prob < self.neg_threshold {
                    self.state = VadState::PotentialSilence;
                    self.silence_onset = frame_start;
                    self.silence_run_secs = self.frame_secs;
                    self.try_close_segment(&mut out);
                } else {
                    let duration = frame_end - self.segment_start;
                    if self.config.max_speech_ms > 0
                        && duration * 1000.0 >= self.config.max_speech_ms as f64
                    {
                        // Split the long utterance; stay in Speech with a
                        // fresh segment starting now.
                        debug!(
                            start = format_args!("{:.3}", self.segment_start),
                            end = format_args!("{:.3}", frame_end),
                            "max speech duration reached, splitting segment"
                        );
                        out.push(VadSegment {
                            audio: std::mem::take(&mut self.segment_audio),
                            start_time: self.segment_start,
                            end_time: frame_end,
                            is_final: true,
                        });
                        self.segment_start = frame_end;
                        self.last_interim_at = None;
                    } else if self.interim_due(frame_end, duration) {
                        out.push(VadSegment {
                            audio: self.segment_audio.clone(),
                            start_time: self.segment_start,
                            end_time: frame_end,
                            is_final: false,
                        });
                        self.last_interim_at = Some(frame_end);
                    }
                }
            }

            VadState::PotentialSilence => {
                // Frames here may still become speech, and otherwise count
                // toward the trailing pad.
                self.segment_audio.extend_from_slice(frame);
                if prob >= self.config.threshold {
                    self.state = VadState::Speech;
                    self.silence_run_secs = 0.0;
                } else {
                    self.silence_run_secs += self.frame_secs;
                    self.try_close_segment(&mut out);
                }
            }
        }

        self.push_pre_roll(frame);
        self.clock = frame_end;
        out
    }

    /// Flush whatever is pending as a final segment at the current time.
    pub fn finalize(&mut self) -> Vec<VadSegment> {
        let mut out = Vec::new();

        if let Some(closing) = self.closing.take() {
            out.push(VadSegment {
                audio: closing.audio,
                start_time: closing.start_time,
                end_time: closing.end_time,
                is_final: true,
            });
        }

        if matches!(self.state, VadState::Speech | VadState::PotentialSilence) {
            out.push(VadSegment {
                audio: std::mem::take(&mut self.segment_audio),
                start_time: self.segment_start,
                end_time: self.clock,
                is_final: true,
            });
        }

        self.state = VadState::Silence;
        self.pending_audio.clear();
        self.speech_run_secs = 0.0;
        self.silence_run_secs = 0.0;
        self.last_interim_at = None;
        out
    }

    /// Restore the initial state: `Silence`, empty buffers, zero elapsed
    /// time.
    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.clock = 0.0;
        self.pre_roll.clear();
        self.pending_audio.clear();
        self.speech_run_secs = 0.0;
        self.segment_audio.clear();
        self.silence_run_secs = 0.0;
        self.last_interim_at = None;
        self.closing = None;
    }

    fn interim_due(&self, frame_end: f64, duration: f64) -> bool {
        if duration * 1000.0 + 1e-6 < self.config.interim_min_duration_ms as f64 {
            return false;
        }
        match self.last_interim_at {
            None => true,
            Some(at) => {
                (frame_end - at) * 1000.0 + 1e-6 >= self.config.interim_interval_ms as f64
            }
        }
    }

    fn enter_potential_speech(&mut self, frame: &[f32], frame_start: f64, out: &mut Vec<VadSegment>) {
        // Speech restarting cuts the previous segment's trailing pad short:
        // later frames belong to the new utterance, and emitting now keeps
        // segment start times non-decreasing in emission order.
        if let Some(closing) = self.closing.take() {
            out.push(VadSegment {
                audio: closing.audio,
                start_time: closing.start_time,
                end_time: closing.end_time,
                is_final: true,
            });
        }

        self.tentative_start = (frame_start - self.pad_secs).max(0.0);
        let lead_secs = frame_start - self.tentative_start;
        let lead_samples =
            ((lead_secs * VAD_SAMPLE_RATE as f64).round() as usize).min(self.pre_roll.len());

        self.pending_audio.clear();
        let skip = self.pre_roll.len() - lead_samples;
        self.pending_audio.extend(self.pre_roll.iter().skip(skip));
        self.pending_audio.extend_from_slice(frame);

        self.speech_run_secs = self.frame_secs;
        self.state = VadState::PotentialSpeech;
    }

    fn try_close_segment(&mut self, out: &mut Vec<VadSegment>) {
        if self.silence_run_secs * 1000.0 + 1e-6 < self.config.min_silence_ms as f64 {
            return;
        }

        let end_time = self.silence_onset + self.pad_secs;
        let target_len =
            ((end_time - self.segment_start) * VAD_SAMPLE_RATE as f64).round() as usize;
        let audio = std::mem::take(&mut self.segment_audio);

        debug!(
            start = format_args!("{:.3}", self.segment_start),
            end = format_args!("{:.3}", end_time),
            "utterance closed"
        );

        if audio.len() >= target_len {
            let mut audio = audio;
            audio.truncate(target_len);
            out.push(VadSegment {
                audio,
                start_time: self.segment_start,
                end_time,
                is_final: true,
            });
        } else {
            // Trailing pad not yet on hand; keep collecting from incoming
            // frames and emit once filled.
            let samples_needed = target_len - audio.len();
            self.closing = Some(ClosingSegment {
                audio,
                start_time: self.segment_start,
                end_time,
                samples_needed,
            });
        }

        self.state = VadState::Silence;
        self.silence_run_secs = 0.0;
        self.last_interim_at = None;
    }

    fn fill_trailing_pad(&mut self, frame: &[f32], out: &mut Vec<VadSegment>) {
        let Some(mut closing) = self.closing.take() else {
            return;
        };
        let take = closing.samples_needed.min(frame.len());
        closing.audio.extend_from_slice(&frame[..take]);
        closing.samples_needed -= take;

        if closing.samples_needed == 0 {
            out.push(VadSegment {
                audio: closing.audio,
                start_time: closing.start_time,
                end_time: closing.end_time,
                is_final: true,
            });
        } else {
            self.closing = Some(closing);
        }
    }

    fn push_pre_roll(&mut self, frame: &[f32]) {
        if self.pre_roll_capacity == 0 {
            return;
        }
        self.pre_roll.extend(frame.iter().copied());
        while self.pre_roll.len() > self.pre_roll_capacity {
            self.pre_roll.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 512;
    const FRAME_SECS: f64 = FRAME as f64 / 16_000.0;

    fn quick_config() -> VadConfig {
        VadConfig {
            threshold: 0.5,
            neg_threshold: None,
            min_speech_ms: 64,
            min_silence_ms: 64,
            speech_pad_ms: 32,
            max_speech_ms: 0,
            interim_min_duration_ms: 10_000,
            interim_interval_ms: 1000,
        }
    }

    fn run(machine: &mut VadStateMachine, probs: &[f32]) -> Vec<VadSegment> {
        let frame = vec![0.1f32; FRAME];
        probs
            .iter()
            .flat_map(|&p| machine.process_frame(p, &frame))
            .collect()
    }

    #[test]
    fn silence_only_emits_nothing() {
        let mut machine = VadStateMachine::new(quick_config(), FRAME);
        let segments = run(&mut machine, &[0.1; 30]);
        assert!(segments.is_empty());
        assert_eq!(machine.state(), VadState::Silence);
        assert!(machine.finalize().is_empty());
    }

    #[test]
    fn clock_advances_one_frame_at_a_time() {
        let mut machine = VadStateMachine::new(quick_config(), FRAME);
        assert_eq!(machine.current_time(), 0.0);
        run(&mut machine, &[0.1]);
        assert!((machine.current_time() - FRAME_SECS).abs() < 1e-9);
    }

    #[test]
    fn speech_then_silence_yields_exactly_one_final() {
        let mut machine = VadStateMachine::new(quick_config(), FRAME);
        let mut probs = vec![0.9f32; 10];
        probs.extend(vec![0.1f32; 10]);
        let segments = run(&mut machine, &probs);

        let finals: Vec<_> = segments.iter().filter(|s| s.is_final).collect();
        assert_eq!(finals.len(), 1);
        let segment = finals[0];
        assert!(segment.end_time > segment.start_time);
        // Audio covers [start, end] at 16 kHz.
        let expected = ((segment.end_time - segment.start_time) * 16_000.0).round() as usize;
        assert_eq!(segment.audio.len(), expected);
    }

    #[test]
    fn false_start_is_discarded() {
        let mut machine = VadStateMachine::new(quick_config(), FRAME);
        // One high frame (64 ms needed, only 32 ms run), then hard silence.
        let segments = run(&mut machine, &[0.9, 0.1, 0.1, 0.1, 0.1]);
        assert!(segments.is_empty());
        assert_eq!(machine.state(), VadState::Silence);
        assert!(machine.finalize().is_empty());
    }

    #[test]
    fn mid_band_probability_does_not_flap() {
        // neg = 0.35; probabilities in (0.35, 0.5) neither confirm nor cancel.
        let mut machine = VadStateMachine::new(quick_config(), FRAME);
        run(&mut machine, &[0.9, 0.4, 0.4, 0.4]);
        assert_eq!(machine.state(), VadState::PotentialSpeech);
        run(&mut machine, &[0.9]);
        assert_eq!(machine.state(), VadState::Speech);
    }

    #[test]
    fn potential_silence_returns_to_speech() {
        let mut machine = VadStateMachine::new(quick_config(), FRAME);
        run(&mut machine, &[0.9, 0.9, 0.9]);
        assert_eq!(machine.state(), VadState::Speech);
        run(&mut machine, &[0.1]);
        assert_eq!(machine.state(), VadState::PotentialSilence);
        run(&mut machine, &[0.9]);
        assert_eq!(machine.state(), VadState::Speech);
    }

    #[test]
    fn segment_times_are_padded_and_clamped() {
        let config = VadConfig {
            speech_pad_ms: 400,
            min_speech_ms: 64,
            min_silence_ms: 64,
            ..quick_config()
        };
        let mut machine = VadStateMachine::new(config, FRAME);
        // Speech from t=0: pad cannot go negative.
        let mut probs = vec![0.9f32; 10];
        probs.extend(vec![0.1f32; 30]);
        let segments = run(&mut machine, &probs);
        let finals: Vec<_> = segments.iter().filter(|s| s.is_final).collect();
        assert_eq!(finals.len(), 1);
        assert!(finals[0].start_time >= 0.0);
        // Silence onset at frame 10 → end = 10 * 32 ms + 400 ms pad.
        let expected_end = 10.0 * FRAME_SECS + 0.4;
        assert!(
            (finals[0].end_time - expected_end).abs() < FRAME_SECS + 1e-6,
            "end {} expected ≈ {}",
            finals[0].end_time,
            expected_end
        );
    }

    #[test]
    fn finalize_flushes_active_speech() {
        let mut machine = VadStateMachine::new(quick_config(), FRAME);
        run(&mut machine, &[0.9; 10]);
        assert_eq!(machine.state(), VadState::Speech);

        let segments = machine.finalize();
        assert_eq!(segments.len(), 1);
        assert!(segments[0].is_final);
        assert!((segments[0].end_time - machine.current_time()).abs() < 1e-9);
        assert_eq!(machine.state(), VadState::Silence);
    }

    #[test]
    fn max_speech_forces_split_and_new_segment_waits() {
        let config = VadConfig {
            max_speech_ms: 320, // 10 frames
            min_speech_ms: 64,
            interim_min_duration_ms: 96,
            interim_interval_ms: 32,
            ..quick_config()
        };
        let mut machine = VadStateMachine::new(config, FRAME);
        let segments = run(&mut machine, &[0.9; 26]);

        let finals: Vec<_> = segments.iter().filter(|s| s.is_final).collect();
        assert!(finals.len() >= 2, "expected ≥ 2 splits, got {}", finals.len());
        for segment in &finals {
            assert!(segment.duration() <= 0.32 + FRAME_SECS + 1e-6);
        }
        // Start times never decrease.
        for pair in segments.windows(2) {
            assert!(pair[1].start_time >= pair[0].start_time);
        }
        // After a split, interims restart from accumulated duration zero:
        // no interim may straddle a split boundary.
        for interim in segments.iter().filter(|s| !s.is_final) {
            assert!(interim.duration() * 1000.0 + 1e-6 >= 96.0);
        }
    }

    #[test]
    fn interims_precede_final_with_increasing_duration() {
        let config = VadConfig {
            interim_min_duration_ms: 128,
            interim_interval_ms: 64,
            ..quick_config()
        };
        let mut machine = VadStateMachine::new(config, FRAME);
        let mut probs = vec![0.9f32; 20];
        probs.extend(vec![0.1f32; 10]);
        let segments = run(&mut machine, &probs);

        let final_pos = segments.iter().position(|s| s.is_final).unwrap();
        let interims: Vec<_> = segments.iter().filter(|s| !s.is_final).collect();
        assert!(!interims.is_empty());
        // All interims precede the final.
        assert!(segments[final_pos + 1..].iter().all(|s| s.is_final));
        // Strictly increasing accumulated duration.
        for pair in interims.windows(2) {
            assert!(pair[1].duration() > pair[0].duration());
        }
    }

    #[test]
    fn reset_then_replay_reproduces_segments() {
        let mut machine = VadStateMachine::new(quick_config(), FRAME);
        let mut probs = vec![0.9f32; 8];
        probs.extend(vec![0.1f32; 12]);

        let first = run(&mut machine, &probs);
        machine.reset();
        assert_eq!(machine.current_time(), 0.0);
        let second = run(&mut machine, &probs);

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.is_final, b.is_final);
            assert_eq!(a.audio, b.audio);
            assert!((a.start_time - b.start_time).abs() < 1e-12);
            assert!((a.end_time - b.end_time).abs() < 1e-12);
        }
    }
}
