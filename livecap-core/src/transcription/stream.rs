//! Streaming transcription orchestrator.
//!
//! `StreamTranscriber` couples an [`AudioSource`] to a [`VadProcessor`],
//! an ASR engine, and an optional [`Translator`]:
//!
//! ```text
//! chunks ─► VadProcessor ─► segments ─► Transcriber ─► (+Translator) ─► results
//! ```
//!
//! Two driving modes. The sync driver ([`run_sync`]) does VAD and ASR on
//! the caller's thread and uses the worker pool only to bound translation
//! with a deadline. The async driver ([`run_async`]) awaits chunks,
//! submits ASR and translation to the pool, and polls their completions
//! with deadlines, keeping the executor free.
//!
//! Translation never stalls the pipeline: on failure or deadline the
//! result ships with `translated_text = None`, and the source text still
//! enters the context window so later translations keep their context.
//!
//! [`run_sync`]: StreamTranscriber::run_sync
//! [`run_async`]: StreamTranscriber::run_async

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::audio::AudioSource;
use crate::engine::EngineHandle;
use crate::error::{LivecapError, Result};
use crate::transcription::context::ContextWindow;
use crate::transcription::result::{InterimResult, TranscriptionResult};
use crate::transcription::worker_pool::{JobError, WorkerPool};
use crate::translation::{ensure_distinct_pair, to_iso639_1, Translator};
use crate::vad::{VadProcessor, VadSegment, VadState};

/// Default per-translation deadline in seconds.
const DEFAULT_TRANSLATION_TIMEOUT_SECS: f64 = 10.0;

/// Capacity of the final and interim result queues.
const RESULT_QUEUE_CAP: usize = 256;

/// How long the sync driver blocks per source read.
const SYNC_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// How long the async driver blocks per source read (off-executor).
const ASYNC_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Parse a `LIVECAP_TRANSLATION_TIMEOUT` value; invalid or non-positive
/// values fall back to the default with a warning.
fn parse_translation_timeout(raw: Option<&str>) -> f64 {
    let Some(raw) = raw else {
        return DEFAULT_TRANSLATION_TIMEOUT_SECS;
    };
    match raw.trim().parse::<f64>() {
        Ok(value) if value > 0.0 => value,
        Ok(value) => {
            warn!(
                value,
                default = DEFAULT_TRANSLATION_TIMEOUT_SECS,
                "LIVECAP_TRANSLATION_TIMEOUT must be positive, using default"
            );
            DEFAULT_TRANSLATION_TIMEOUT_SECS
        }
        Err(_) => {
            warn!(
                value = raw,
                default = DEFAULT_TRANSLATION_TIMEOUT_SECS,
                "invalid LIVECAP_TRANSLATION_TIMEOUT, using default"
            );
            DEFAULT_TRANSLATION_TIMEOUT_SECS
        }
    }
}

/// Per-translation deadline, read once per process.
pub fn translation_timeout() -> Duration {
    static TIMEOUT: OnceLock<Duration> = OnceLock::new();
    *TIMEOUT.get_or_init(|| {
        let raw = std::env::var("LIVECAP_TRANSLATION_TIMEOUT").ok();
        Duration::from_secs_f64(parse_translation_timeout(raw.as_deref()))
    })
}

type ResultCallback = Box<dyn Fn(&TranscriptionResult) + Send>;
type InterimCallback = Box<dyn Fn(&InterimResult) + Send>;

/// Orchestrates `AudioSource → VAD → Transcriber (+Translator)` for one
/// audio source.
pub struct StreamTranscriber {
    engine: EngineHandle,
    sample_rate: u32,
    source_id: String,
    vad: VadProcessor,

    translator: Option<Arc<dyn Translator>>,
    source_lang: Option<String>,
    target_lang: Option<String>,
    context: Arc<Mutex<ContextWindow>>,

    pool: WorkerPool,
    translation_deadline: Duration,

    finals_tx: Sender<TranscriptionResult>,
    finals_rx: Receiver<TranscriptionResult>,
    interims_tx: Sender<InterimResult>,
    interims_rx: Receiver<InterimResult>,

    on_result: Option<ResultCallback>,
    on_interim: Option<InterimCallback>,
}

impl StreamTranscriber {
    /// Create a transcriber for one source. The VAD processor's config and
    /// backend are the caller's choice; the engine's required sample rate
    /// is adopted for all transcription calls.
    pub fn new(engine: EngineHandle, vad: VadProcessor, source_id: impl Into<String>) -> Self {
        let sample_rate = engine.required_sample_rate();
        let (finals_tx, finals_rx) = bounded(RESULT_QUEUE_CAP);
        let (interims_tx, interims_rx) = bounded(RESULT_QUEUE_CAP);
        Self {
            engine,
            sample_rate,
            source_id: source_id.into(),
            vad,
            translator: None,
            source_lang: None,
            target_lang: None,
            context: Arc::new(Mutex::new(ContextWindow::new())),
            pool: WorkerPool::new(1),
            translation_deadline: translation_timeout(),
            finals_tx,
            finals_rx,
            interims_tx,
            interims_rx,
            on_result: None,
            on_interim: None,
        }
    }

    /// Attach a translator. Fails fast when the translator has not been
    /// initialized; an unsupported language pair only warns — the
    /// translation is still attempted per segment.
    pub fn with_translator(
        mut self,
        translator: Arc<dyn Translator>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Result<Self> {
        if !translator.is_initialized() {
            return Err(LivecapError::Config(
                "translator not initialized; call load_model() first".into(),
            ));
        }
        let source_lang = source_lang.into();
        let target_lang = target_lang.into();

        let pairs = translator.supported_pairs();
        if !pairs.is_empty() {
            let src = to_iso639_1(&source_lang);
            let tgt = to_iso639_1(&target_lang);
            let supported = pairs
                .iter()
                .any(|(s, t)| to_iso639_1(s) == src && to_iso639_1(t) == tgt);
            if !supported {
                warn!(
                    source = source_lang.as_str(),
                    target = target_lang.as_str(),
                    translator = translator.translator_name(),
                    "language pair may not be supported"
                );
            }
        }

        self.translator = Some(translator);
        self.source_lang = Some(source_lang);
        self.target_lang = Some(target_lang);
        Ok(self)
    }

    /// Replace the default single-worker pool with `workers` threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.pool = WorkerPool::new(workers);
        self
    }

    /// Override the per-translation deadline (defaults to
    /// [`translation_timeout`], i.e. `LIVECAP_TRANSLATION_TIMEOUT`).
    pub fn with_translation_deadline(mut self, deadline: Duration) -> Self {
        self.translation_deadline = deadline;
        self
    }

    /// Sentences currently held for translation context.
    pub fn context_len(&self) -> usize {
        self.context.lock().len()
    }

    /// Install result/interim callbacks. Either may be `None`.
    pub fn set_callbacks(
        &mut self,
        on_result: Option<ResultCallback>,
        on_interim: Option<InterimCallback>,
    ) {
        self.on_result = on_result;
        self.on_interim = on_interim;
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// The sample rate the engine requires (what segments are fed at).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current VAD state for this source.
    pub fn vad_state(&self) -> VadState {
        self.vad.state()
    }

    /// Feed one chunk of audio. Segments the VAD completes are
    /// transcribed inline (blocking); results go to the queue and the
    /// callbacks. A failed engine call skips that segment and keeps the
    /// pipeline running.
    pub fn feed_audio(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        let segments = self.vad.process_chunk(samples, sample_rate)?;
        for segment in segments {
            if segment.is_final {
                match self.transcribe_segment(&segment) {
                    Ok(Some(result)) => self.deliver_final(result),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "transcription failed, skipping segment"),
                }
            } else if let Some(interim) = self.transcribe_interim(&segment) {
                self.deliver_interim(interim);
            }
        }
        Ok(())
    }

    /// Blocking read of the next final result. Interims never appear
    /// here; they are delivered through the interim callback or
    /// [`get_interim`](Self::get_interim).
    pub fn get_result(&self, timeout: Duration) -> Option<TranscriptionResult> {
        if timeout.is_zero() {
            return self.finals_rx.try_recv().ok();
        }
        self.finals_rx.recv_timeout(timeout).ok()
    }

    /// Non-blocking poll for the next interim result.
    pub fn get_interim(&self) -> Option<InterimResult> {
        self.interims_rx.try_recv().ok()
    }

    /// Close the session: flush the VAD and transcribe what remains.
    ///
    /// Returns the last flushed result; any earlier ones (a split
    /// utterance still filling its trailing pad) are delivered through the
    /// queue and callbacks first.
    pub fn finalize(&mut self) -> Result<Option<TranscriptionResult>> {
        let mut flushed: Vec<TranscriptionResult> = Vec::new();
        for segment in self.vad.finalize() {
            if !segment.is_final {
                continue;
            }
            match self.transcribe_segment(&segment) {
                Ok(Some(result)) => flushed.push(result),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "final transcription failed"),
            }
        }
        let last = flushed.pop();
        for result in flushed {
            self.deliver_final(result);
        }
        Ok(last)
    }

    /// Clear the VAD, the context window, and all queued results.
    pub fn reset(&mut self) {
        self.vad.reset();
        self.context.lock().clear();
        while self.finals_rx.try_recv().is_ok() {}
        while self.interims_rx.try_recv().is_ok() {}
    }

    /// Shut the worker pool down without waiting. Outstanding jobs finish
    /// on their own; their results are discarded.
    pub fn close(&mut self) {
        self.pool.shutdown();
    }

    // ── Sync driver ─────────────────────────────────────────────────────

    /// Drive a whole source to EOF, yielding final results as they land.
    /// The source is started if inactive and stopped at the end.
    pub fn run_sync<'a, S: AudioSource>(&'a mut self, source: &'a mut S) -> SyncDriver<'a, S> {
        SyncDriver {
            transcriber: self,
            source,
            started: false,
            finished: false,
        }
    }

    // ── Async driver ────────────────────────────────────────────────────

    /// Drive a whole source to EOF on the async executor.
    ///
    /// Reads happen off-executor; ASR and translation run on the worker
    /// pool and are awaited with deadlines. Interims are delivered through
    /// the interim callback. Returns the final results in order.
    pub async fn run_async<S>(&mut self, mut source: S) -> Result<Vec<TranscriptionResult>>
    where
        S: AudioSource + 'static,
    {
        source.start()?;
        info!(source_id = self.source_id.as_str(), "async transcription started");
        let mut results = Vec::new();

        loop {
            // Move the source into the blocking read and take it back:
            // the await point stays cancellation-safe and the executor
            // never blocks on the device.
            let (returned, chunk) = tokio::task::spawn_blocking(move || {
                let chunk = source.read(ASYNC_READ_TIMEOUT);
                (source, chunk)
            })
            .await
            .map_err(|e| LivecapError::SourceRead(format!("source read task: {e}")))?;
            source = returned;

            let Some(chunk) = chunk else {
                if source.is_active() {
                    continue;
                }
                break;
            };

            let segments = self.vad.process_chunk(&chunk.samples, chunk.sample_rate)?;
            for segment in segments {
                if segment.is_final {
                    match self.transcribe_segment_async(&segment).await {
                        Ok(Some(result)) => results.push(result),
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "async transcription failed"),
                    }
                } else if self.on_interim.is_some() {
                    // Interim decoding is fast; run it inline.
                    if let Some(interim) = self.transcribe_interim(&segment) {
                        self.deliver_interim(interim);
                    }
                }
            }

            tokio::task::yield_now().await;
        }

        source.stop();

        for segment in self.vad.finalize() {
            if !segment.is_final {
                continue;
            }
            match self.transcribe_segment_async(&segment).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "final async transcription failed"),
            }
        }

        info!(
            source_id = self.source_id.as_str(),
            results = results.len(),
            "async transcription finished"
        );
        Ok(results)
    }

    // ── Transcription paths ─────────────────────────────────────────────

    /// Transcribe a final segment on the caller's thread; translation is
    /// bounded by the worker-pool deadline.
    fn transcribe_segment(&mut self, segment: &VadSegment) -> Result<Option<TranscriptionResult>> {
        if segment.audio.is_empty() {
            return Ok(None);
        }

        let (text, confidence) = self
            .engine
            .0
            .lock()
            .transcribe(&segment.audio, self.sample_rate)
            .map_err(|e| LivecapError::Engine(e.to_string()))?;

        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let (translated_text, target_language) = self.translate_with_deadline(text);

        Ok(Some(TranscriptionResult {
            text: text.to_string(),
            start_time: segment.start_time,
            end_time: segment.end_time,
            is_final: true,
            confidence,
            language: String::new(),
            source_id: self.source_id.clone(),
            translated_text,
            target_language,
        }))
    }

    /// Transcribe a final segment with ASR and translation on the worker
    /// pool.
    async fn transcribe_segment_async(
        &mut self,
        segment: &VadSegment,
    ) -> Result<Option<TranscriptionResult>> {
        if segment.audio.is_empty() {
            return Ok(None);
        }

        let engine = self.engine.clone();
        let audio = segment.audio.clone();
        let sample_rate = self.sample_rate;
        let job = self
            .pool
            .submit(move || engine.0.lock().transcribe(&audio, sample_rate))
            .map_err(|e| LivecapError::Engine(format!("submit transcription: {e}")))?;

        let (text, confidence) = job
            .wait_async()
            .await
            .map_err(|e| LivecapError::Engine(format!("transcription {e}")))?
            .map_err(|e| LivecapError::Engine(e.to_string()))?;

        let text = text.trim().to_string();
        if text.is_empty() {
            return Ok(None);
        }

        // Translation runs as a *direct* job on the same pool: it must not
        // submit again from inside the worker (a single-worker pool would
        // never serve that inner wait). On deadline the job keeps running
        // and appends to the context window itself when it completes.
        let (translated_text, target_language) = match self.translator.clone() {
            Some(translator) => {
                let context = Arc::clone(&self.context);
                let source_lang = self.source_lang.clone().unwrap_or_default();
                let target_lang = self.target_lang.clone().unwrap_or_default();
                let text_for_job = text.clone();

                match self.pool.submit(move || {
                    translate_direct(
                        translator.as_ref(),
                        &context,
                        &text_for_job,
                        &source_lang,
                        &target_lang,
                    )
                }) {
                    Ok(job) => {
                        match tokio::time::timeout(self.translation_deadline, job.wait_async())
                            .await
                        {
                            Ok(Ok(outcome)) => outcome,
                            Ok(Err(e)) => {
                                warn!(error = %e, "translation worker lost");
                                (None, None)
                            }
                            Err(_elapsed) => {
                                warn!(
                                    timeout_s = self.translation_deadline.as_secs_f64(),
                                    "async translation timed out"
                                );
                                (None, None)
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "could not submit translation");
                        (None, None)
                    }
                }
            }
            None => (None, None),
        };

        Ok(Some(TranscriptionResult {
            text,
            start_time: segment.start_time,
            end_time: segment.end_time,
            is_final: true,
            confidence,
            language: String::new(),
            source_id: self.source_id.clone(),
            translated_text,
            target_language,
        }))
    }

    /// Preview transcription for an ongoing utterance. Errors are logged
    /// and swallowed — a failed preview is not worth a skipped segment.
    fn transcribe_interim(&mut self, segment: &VadSegment) -> Option<InterimResult> {
        if segment.audio.is_empty() {
            return None;
        }

        match self
            .engine
            .0
            .lock()
            .transcribe(&segment.audio, self.sample_rate)
        {
            Ok((text, _)) => {
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                Some(InterimResult {
                    text: text.to_string(),
                    accumulated_time: segment.end_time - segment.start_time,
                    source_id: self.source_id.clone(),
                })
            }
            Err(e) => {
                error!(error = %e, "interim transcription error");
                None
            }
        }
    }

    /// Sync-path translation: submit to the pool, wait with the deadline.
    ///
    /// The caller appends to the context window on *every* outcome here;
    /// the job itself must not (on a timeout it would double-append).
    fn translate_with_deadline(&self, text: &str) -> (Option<String>, Option<String>) {
        let Some(translator) = self.translator.clone() else {
            return (None, None);
        };
        let source_lang = self.source_lang.clone().unwrap_or_default();
        let target_lang = self.target_lang.clone().unwrap_or_default();

        // Same-language requests never reach the backend; the caption
        // still ships, untranslated, and the context window still grows.
        if let Err(e) =
            ensure_distinct_pair(&source_lang, &target_lang, translator.translator_name())
        {
            warn!(error = %e, "translation rejected");
            self.context.lock().push(text);
            return (None, None);
        }

        let context_len = translator.default_context_sentences();
        let context: Option<Vec<String>> = if context_len > 0 {
            Some(self.context.lock().last_n(context_len))
        } else {
            None
        };

        let text_for_job = text.to_string();
        let job = self.pool.submit(move || {
            translator.translate(
                &text_for_job,
                &source_lang,
                &target_lang,
                context.as_deref(),
            )
        });

        let outcome = match job {
            Ok(handle) => match handle.wait_timeout(self.translation_deadline) {
                Ok(Ok(result)) => Some(result.text),
                Ok(Err(e)) => {
                    warn!(error = %e, "translation failed");
                    None
                }
                Err(JobError::Timeout) => {
                    warn!(
                        timeout_s = self.translation_deadline.as_secs_f64(),
                        "translation timed out, skipping translation"
                    );
                    None
                }
                Err(e) => {
                    warn!(error = %e, "translation result lost");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "could not submit translation");
                None
            }
        };

        // Context continuity: the source text is recorded whether the
        // translation succeeded, failed, or timed out.
        self.context.lock().push(text);

        match outcome {
            Some(translated) => (Some(translated), self.target_lang.clone()),
            None => (None, None),
        }
    }

    // ── Delivery ────────────────────────────────────────────────────────

    fn deliver_final(&self, result: TranscriptionResult) {
        if let Err(full) = self.finals_tx.try_send(result.clone()) {
            warn!("result queue full, dropping oldest final");
            let _ = self.finals_rx.try_recv();
            let _ = self.finals_tx.try_send(full.into_inner());
        }
        if let Some(callback) = &self.on_result {
            callback(&result);
        }
    }

    fn deliver_interim(&self, interim: InterimResult) {
        if self.interims_tx.try_send(interim.clone()).is_err() {
            let _ = self.interims_rx.try_recv();
            let _ = self.interims_tx.try_send(interim.clone());
        }
        if let Some(callback) = &self.on_interim {
            callback(&interim);
        }
    }
}

impl Drop for StreamTranscriber {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}

/// Direct-path translation, run *on* a worker.
///
/// Appends the source text to the context window itself — on success and
/// on failure — because the submitting side may have stopped waiting.
fn translate_direct(
    translator: &dyn Translator,
    context: &Arc<Mutex<ContextWindow>>,
    text: &str,
    source_lang: &str,
    target_lang: &str,
) -> (Option<String>, Option<String>) {
    let context_len = translator.default_context_sentences();
    let snapshot: Option<Vec<String>> = if context_len > 0 {
        Some(context.lock().last_n(context_len))
    } else {
        None
    };

    // Same-language requests are rejected without touching the backend.
    let outcome = ensure_distinct_pair(source_lang, target_lang, translator.translator_name())
        .and_then(|()| translator.translate(text, source_lang, target_lang, snapshot.as_deref()));
    context.lock().push(text);

    match outcome {
        Ok(result) => (Some(result.text), Some(target_lang.to_string())),
        Err(e) => {
            warn!(error = %e, "translation failed");
            (None, None)
        }
    }
}

/// Iterator returned by [`StreamTranscriber::run_sync`].
///
/// Each `next()` feeds chunks until a final result is available, then
/// yields it; at EOF the VAD is finalized and the last result yielded.
pub struct SyncDriver<'a, S: AudioSource> {
    transcriber: &'a mut StreamTranscriber,
    source: &'a mut S,
    started: bool,
    finished: bool,
}

impl<S: AudioSource> Iterator for SyncDriver<'_, S> {
    type Item = TranscriptionResult;

    fn next(&mut self) -> Option<TranscriptionResult> {
        if !self.started {
            self.started = true;
            if !self.source.is_active() {
                if let Err(e) = self.source.start() {
                    error!(error = %e, "audio source failed to start");
                    self.finished = true;
                    return None;
                }
            }
        }

        loop {
            if let Some(result) = self.transcriber.get_result(Duration::ZERO) {
                return Some(result);
            }
            if self.finished {
                return None;
            }

            match self.source.read(SYNC_READ_TIMEOUT) {
                Some(chunk) => {
                    if let Err(e) = self
                        .transcriber
                        .feed_audio(&chunk.samples, chunk.sample_rate)
                    {
                        error!(error = %e, "pipeline error, stopping sync driver");
                        self.finished = true;
                        self.source.stop();
                    }
                }
                None => {
                    if self.source.is_active() {
                        // Timed out while the source is live; keep polling.
                        continue;
                    }
                    self.finished = true;
                    self.source.stop();
                    match self.transcriber.finalize() {
                        Ok(Some(result)) => return Some(result),
                        Ok(None) => {}
                        Err(e) => error!(error = %e, "finalize failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_parser_accepts_positive_values() {
        assert_eq!(parse_translation_timeout(Some("2.5")), 2.5);
        assert_eq!(parse_translation_timeout(Some(" 7 ")), 7.0);
    }

    #[test]
    fn timeout_parser_falls_back_on_garbage() {
        assert_eq!(
            parse_translation_timeout(Some("fast")),
            DEFAULT_TRANSLATION_TIMEOUT_SECS
        );
        assert_eq!(
            parse_translation_timeout(Some("-3")),
            DEFAULT_TRANSLATION_TIMEOUT_SECS
        );
        assert_eq!(
            parse_translation_timeout(Some("0")),
            DEFAULT_TRANSLATION_TIMEOUT_SECS
        );
        assert_eq!(
            parse_translation_timeout(None),
            DEFAULT_TRANSLATION_TIMEOUT_SECS
        );
    }
}
