//! File-backed audio source.
//!
//! Decodes a WAV file up front, down-mixes to mono by channel averaging,
//! resamples to the requested rate, then streams fixed-size chunks. The
//! optional realtime mode sleeps one chunk duration between chunks to
//! simulate a live capture.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::audio::{chunk_size, resample::resample_buffer, AudioChunk, AudioSource};
use crate::error::{LivecapError, Result};

/// Streams a decoded audio file as fixed-duration chunks.
///
/// The last chunk is zero-padded to the full chunk size; `read` returns
/// `None` once the file is exhausted.
pub struct FileSource {
    file_path: PathBuf,
    sample_rate: u32,
    chunk_ms: u32,
    chunk_size: usize,
    realtime: bool,

    audio: Option<Vec<f32>>,
    position: usize,
    file_sample_rate: u32,
    active: bool,
}

impl FileSource {
    /// Create a source for `file_path`, output at `sample_rate` in
    /// `chunk_ms` chunks. Nothing is read until [`AudioSource::start`].
    pub fn new(file_path: impl AsRef<Path>, sample_rate: u32, chunk_ms: u32) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            sample_rate,
            chunk_ms,
            chunk_size: chunk_size(sample_rate, chunk_ms),
            realtime: false,
            audio: None,
            position: 0,
            file_sample_rate: 0,
            active: false,
        }
    }

    /// Sleep one chunk duration between full chunks, simulating live input.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Total duration of the decoded file in seconds (0 before `start`).
    pub fn duration(&self) -> f64 {
        self.audio
            .as_ref()
            .map(|a| a.len() as f64 / self.sample_rate as f64)
            .unwrap_or(0.0)
    }

    /// Current playback position in seconds.
    pub fn position_seconds(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    /// Remaining playback time in seconds.
    pub fn remaining_seconds(&self) -> f64 {
        self.duration() - self.position_seconds()
    }

    /// Sample rate of the underlying file (0 before `start`).
    pub fn file_sample_rate(&self) -> u32 {
        self.file_sample_rate
    }

    /// Rewind to the start of the file, reactivating an exhausted source.
    pub fn rewind(&mut self) {
        self.position = 0;
        if self.audio.is_some() {
            self.active = true;
        }
    }

    fn decode(&self) -> Result<(Vec<f32>, u32)> {
        let reader = hound::WavReader::open(&self.file_path).map_err(|e| {
            LivecapError::SourceOpen(format!("{}: {e}", self.file_path.display()))
        })?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| LivecapError::SourceRead(e.to_string()))?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| LivecapError::SourceRead(e.to_string()))?
            }
        };

        // Down-mix to mono by channel averaging.
        let mono: Vec<f32> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        Ok((mono, spec.sample_rate))
    }
}

impl AudioSource for FileSource {
    fn start(&mut self) -> Result<()> {
        if self.active {
            return Ok(());
        }

        let (mono, file_rate) = self.decode()?;
        self.file_sample_rate = file_rate;

        let audio = if file_rate != self.sample_rate {
            resample_buffer(&mono, file_rate, self.sample_rate)?
        } else {
            mono
        };

        info!(
            file = %self.file_path.display(),
            duration_s = format_args!("{:.2}", audio.len() as f64 / self.sample_rate as f64),
            sample_rate = self.sample_rate,
            "file source started"
        );

        self.audio = Some(audio);
        self.position = 0;
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) {
        if !self.active && self.audio.is_none() {
            return;
        }
        self.active = false;
        self.audio = None;
        self.position = 0;
        info!("file source stopped");
    }

    fn read(&mut self, _timeout: Duration) -> Option<AudioChunk> {
        let audio = self.audio.as_ref()?;
        if self.position >= audio.len() {
            self.active = false;
            return None;
        }

        let end = (self.position + self.chunk_size).min(audio.len());
        let mut samples = audio[self.position..end].to_vec();
        self.position = end;

        // Realtime simulation only applies to full chunks.
        if self.realtime && samples.len() == self.chunk_size {
            std::thread::sleep(Duration::from_millis(self.chunk_ms as u64));
        }

        if samples.len() < self.chunk_size {
            samples.resize(self.chunk_size, 0.0);
        }

        Some(AudioChunk::new(samples, self.sample_rate))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn chunk_ms(&self) -> u32 {
        self.chunk_ms
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, samples: &[f32], sample_rate: u32, channels: u16) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn missing_file_is_a_source_open_error() {
        let mut src = FileSource::new("/nonexistent/audio.wav", 16_000, 100);
        match src.start() {
            Err(LivecapError::SourceOpen(_)) => {}
            other => panic!("expected SourceOpen, got {other:?}"),
        }
    }

    #[test]
    fn reads_exact_chunks_and_pads_the_last() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        // 0.25 s at 16 kHz = 4000 samples = 2.5 chunks of 100 ms
        write_wav(&path, &vec![0.5f32; 4000], 16_000, 1);

        let mut src = FileSource::new(&path, 16_000, 100);
        src.start().unwrap();

        let a = src.read(Duration::ZERO).unwrap();
        let b = src.read(Duration::ZERO).unwrap();
        let c = src.read(Duration::ZERO).unwrap();
        assert_eq!(a.samples.len(), 1600);
        assert_eq!(b.samples.len(), 1600);
        assert_eq!(c.samples.len(), 1600);
        // Last chunk: 800 real samples + 800 zeros
        assert!(c.samples[..800].iter().all(|&s| s == 0.5));
        assert!(c.samples[800..].iter().all(|&s| s == 0.0));

        assert!(src.read(Duration::ZERO).is_none());
        assert!(!src.is_active());
    }

    #[test]
    fn stereo_is_downmixed_by_averaging() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        // L = 0.2, R = 0.6 → mono 0.4
        let interleaved: Vec<f32> = (0..3200).map(|i| if i % 2 == 0 { 0.2 } else { 0.6 }).collect();
        write_wav(&path, &interleaved, 16_000, 2);

        let mut src = FileSource::new(&path, 16_000, 100);
        src.start().unwrap();
        let chunk = src.read(Duration::ZERO).unwrap();
        for &s in &chunk.samples {
            assert!((s - 0.4).abs() < 1e-6, "sample {s}");
        }
    }

    #[test]
    fn file_rate_is_resampled_to_requested_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("48k.wav");
        // 0.5 s at 48 kHz
        write_wav(&path, &vec![0.1f32; 24_000], 48_000, 1);

        let mut src = FileSource::new(&path, 16_000, 100);
        src.start().unwrap();
        assert_eq!(src.file_sample_rate(), 48_000);
        assert!((src.duration() - 0.5).abs() < 0.01, "duration {}", src.duration());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_wav(&path, &vec![0.0f32; 1600], 16_000, 1);

        let mut src = FileSource::new(&path, 16_000, 100);
        src.start().unwrap();
        src.start().unwrap();
        assert!(src.is_active());
        src.stop();
        src.stop();
        assert!(!src.is_active());
        assert!(src.read(Duration::ZERO).is_none());
    }

    #[test]
    fn rewind_replays_from_the_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.wav");
        write_wav(&path, &vec![0.3f32; 1600], 16_000, 1);

        let mut src = FileSource::new(&path, 16_000, 100);
        src.start().unwrap();
        let first = src.read(Duration::ZERO).unwrap();
        assert!(src.read(Duration::ZERO).is_none());

        src.rewind();
        assert!(src.is_active());
        let again = src.read(Duration::ZERO).unwrap();
        assert_eq!(first.samples, again.samples);
    }
}
