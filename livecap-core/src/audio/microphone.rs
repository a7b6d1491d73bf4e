//! Microphone capture via cpal.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not block on the consumer. Captured audio is assembled into
//! fixed-duration chunks and pushed onto a **bounded** channel; when the
//! consumer falls behind, the oldest chunk is dropped and counted, so
//! backpressure is visible in the logs instead of growing an unbounded
//! queue.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS). The stream is therefore created and dropped on a dedicated
//! capture thread; `start()` blocks until that thread reports the open
//! result back over a channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{error, info, warn};

use crate::audio::{device::list_input_devices, AudioChunk, AudioSource, DeviceInfo};
use crate::error::{LivecapError, Result};

/// Chunks buffered between the capture thread and `read` before the
/// drop-oldest policy kicks in. At 100 ms chunks this is ~3.2 s of audio.
const QUEUE_CAPACITY: usize = 32;

/// Captures mono f32 chunks from a system input device.
pub struct MicrophoneSource {
    device_name: Option<String>,
    chunk_ms: u32,

    sample_rate: u32,
    chunk_rx: Option<Receiver<Vec<f32>>>,
    stop_tx: Option<Sender<()>>,
    capture_thread: Option<std::thread::JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
    active: bool,
}

impl MicrophoneSource {
    /// Capture from the device whose name matches `device_name`, or the
    /// system default when `None`. The declared sample rate is the device's
    /// native rate, known after [`AudioSource::start`].
    pub fn new(device_name: Option<String>, chunk_ms: u32) -> Self {
        Self {
            device_name,
            chunk_ms,
            sample_rate: 0,
            chunk_rx: None,
            stop_tx: None,
            capture_thread: None,
            dropped: Arc::new(AtomicU64::new(0)),
            active: false,
        }
    }

    /// List input-capable devices on the default host.
    pub fn list_devices() -> Vec<DeviceInfo> {
        list_input_devices()
    }

    /// Chunks dropped so far because the consumer fell behind.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Assembles mono samples into fixed-size chunks and enqueues them with a
/// drop-oldest overflow policy.
struct ChunkAssembler {
    acc: Vec<f32>,
    chunk_size: usize,
    tx: Sender<Vec<f32>>,
    // Receiver clone held by the producer purely to pop the oldest chunk
    // when the queue is full (crossbeam channels are MPMC).
    drain_rx: Receiver<Vec<f32>>,
    dropped: Arc<AtomicU64>,
}

impl ChunkAssembler {
    fn push(&mut self, mono: &[f32]) {
        self.acc.extend_from_slice(mono);
        while self.acc.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.acc.drain(..self.chunk_size).collect();
            if let Err(full) = self.tx.try_send(chunk) {
                // Queue full: drop the oldest chunk to make room.
                let _ = self.drain_rx.try_recv();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let _ = self.tx.try_send(full.into_inner());
            }
        }
    }
}

/// Average interleaved frames down to mono, via `convert` per sample.
fn downmix_into(out: &mut Vec<f32>, data_len: usize, channels: usize, sample_at: impl Fn(usize) -> f32) {
    let frames = data_len / channels;
    out.clear();
    out.reserve(frames);
    for f in 0..frames {
        let base = f * channels;
        let mut sum = 0f32;
        for c in 0..channels {
            sum += sample_at(base + c);
        }
        out.push(sum / channels as f32);
    }
}

impl AudioSource for MicrophoneSource {
    fn start(&mut self) -> Result<()> {
        if self.active {
            return Ok(());
        }

        self.dropped.store(0, Ordering::Relaxed);

        let (chunk_tx, chunk_rx) = bounded::<Vec<f32>>(QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        // Sync channel: capture thread reports the open result (device rate).
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let device_name = self.device_name.clone();
        let chunk_ms = self.chunk_ms;
        let dropped = Arc::clone(&self.dropped);
        let drain_rx = chunk_rx.clone();

        let capture_thread = std::thread::Builder::new()
            .name("livecap-mic-capture".into())
            .spawn(move || {
                // The stream must be created and dropped on this thread.
                let stream = match open_stream(
                    device_name.as_deref(),
                    chunk_ms,
                    chunk_tx,
                    drain_rx,
                    dropped,
                ) {
                    Ok((stream, rate)) => {
                        let _ = open_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                // Park until stop is requested or the source is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| LivecapError::SourceOpen(format!("capture thread spawn: {e}")))?;

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                self.sample_rate = rate;
                self.chunk_rx = Some(chunk_rx);
                self.stop_tx = Some(stop_tx);
                self.capture_thread = Some(capture_thread);
                self.active = true;
                info!(
                    sample_rate = rate,
                    chunk_ms = self.chunk_ms,
                    "microphone source started"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = capture_thread.join();
                Err(e)
            }
            Err(_) => Err(LivecapError::SourceOpen(
                "capture thread died before reporting".into(),
            )),
        }
    }

    fn stop(&mut self) {
        if !self.active && self.capture_thread.is_none() {
            return;
        }
        self.active = false;

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
        // Drain buffered chunks so a restart begins clean.
        if let Some(rx) = self.chunk_rx.take() {
            while rx.try_recv().is_ok() {}
        }

        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!(dropped, "microphone source dropped chunks under backpressure");
        }
        info!("microphone source stopped");
    }

    fn read(&mut self, timeout: Duration) -> Option<AudioChunk> {
        if !self.active {
            return None;
        }
        let rx = self.chunk_rx.as_ref()?;
        match rx.recv_timeout(timeout) {
            Ok(samples) => Some(AudioChunk::new(samples, self.sample_rate)),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                // Driver fault already logged on the capture thread.
                self.active = false;
                None
            }
        }
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

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the requested (or default) input device and start the stream.
///
/// Returns the live stream and the device's native sample rate.
fn open_stream(
    device_name: Option<&str>,
    chunk_ms: u32,
    chunk_tx: Sender<Vec<f32>>,
    drain_rx: Receiver<Vec<f32>>,
    dropped: Arc<AtomicU64>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let device = match device_name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| LivecapError::SourceOpen(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| LivecapError::SourceOpen(format!("input device '{wanted}' not found")))?,
        None => host
            .default_input_device()
            .ok_or(LivecapError::NoInputDevice)?,
    };

    let supported = device
        .default_input_config()
        .map_err(|e| LivecapError::SourceOpen(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let ch = channels as usize;
    let chunk_size = crate::audio::chunk_size(sample_rate, chunk_ms);

    info!(
        device = device.name().as_deref().unwrap_or("unknown"),
        sample_rate,
        channels,
        "opening input device"
    );

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err| error!("audio stream error: {err}");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            let mut assembler = ChunkAssembler {
                acc: Vec::new(),
                chunk_size,
                tx: chunk_tx,
                drain_rx,
                dropped,
            };
            let mut mix_buf: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if ch == 1 {
                        assembler.push(data);
                    } else {
                        downmix_into(&mut mix_buf, data.len(), ch, |i| data[i]);
                        assembler.push(&mix_buf);
                    }
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let mut assembler = ChunkAssembler {
                acc: Vec::new(),
                chunk_size,
                tx: chunk_tx,
                drain_rx,
                dropped,
            };
            let mut mix_buf: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    downmix_into(&mut mix_buf, data.len(), ch, |i| data[i] as f32 / 32768.0);
                    assembler.push(&mix_buf);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U8 => {
            let mut assembler = ChunkAssembler {
                acc: Vec::new(),
                chunk_size,
                tx: chunk_tx,
                drain_rx,
                dropped,
            };
            let mut mix_buf: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[u8], _info| {
                    downmix_into(&mut mix_buf, data.len(), ch, |i| {
                        (data[i] as f32 - 128.0) / 128.0
                    });
                    assembler.push(&mix_buf);
                },
                err_fn,
                None,
            )
        }
        fmt => {
            return Err(LivecapError::SourceOpen(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| LivecapError::SourceOpen(e.to_string()))?;

    stream
        .play()
        .map_err(|e| LivecapError::SourceOpen(e.to_string()))?;

    Ok((stream, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_emits_fixed_chunks() {
        let (tx, rx) = bounded(8);
        let mut assembler = ChunkAssembler {
            acc: Vec::new(),
            chunk_size: 4,
            tx,
            drain_rx: rx.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
        };

        assembler.push(&[0.1, 0.2, 0.3]);
        assert!(rx.try_recv().is_err(), "partial chunk must not be emitted");

        assembler.push(&[0.4, 0.5]);
        let chunk = rx.try_recv().unwrap();
        assert_eq!(chunk, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(assembler.acc, vec![0.5]);
    }

    #[test]
    fn assembler_drops_oldest_when_full() {
        let (tx, rx) = bounded(2);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut assembler = ChunkAssembler {
            acc: Vec::new(),
            chunk_size: 2,
            tx,
            drain_rx: rx.clone(),
            dropped: Arc::clone(&dropped),
        };

        assembler.push(&[1.0, 1.0]); // chunk A
        assembler.push(&[2.0, 2.0]); // chunk B — queue now full
        assembler.push(&[3.0, 3.0]); // chunk C — A is dropped

        assert_eq!(dropped.load(Ordering::Relaxed), 1);
        assert_eq!(rx.try_recv().unwrap(), vec![2.0, 2.0]);
        assert_eq!(rx.try_recv().unwrap(), vec![3.0, 3.0]);
    }

    #[test]
    fn downmix_averages_channels() {
        let data = [0.2f32, 0.6, 0.4, 0.8];
        let mut out = Vec::new();
        downmix_into(&mut out, data.len(), 2, |i| data[i]);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.4).abs() < 1e-6);
        assert!((out[1] - 0.6).abs() < 1e-6);
    }
}
