//! Shared test fixtures: a fake [`DeviceHost`]/[`DeviceAdapter`] pair that
//! drives the device callback from a background thread instead of talking to
//! real hardware, plus a deterministic sine-wave [`Decoder`].

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use audio_engine::{AudioConfig, DecodedChunk, Decoder, EngineError, Result};

use audio_engine::device::{DeviceAdapter, DeviceCallback, DeviceDescriptor, DeviceHost, StreamErrorCallback};

/// Drives the wrapped callback on a dedicated thread at a fast, fixed
/// cadence, standing in for a real sound card during tests.
pub struct FakeAdapter {
    channels: u32,
    sample_rate: u32,
    frames_per_buffer: u32,
    callback: Option<DeviceCallback>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceAdapter for FakeAdapter {
    fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        let mut callback = self
            .callback
            .take()
            .expect("start() called twice without a fresh callback");
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Release);
        let frame_len = self.frames_per_buffer as usize * self.channels as usize;
        let frames_per_buffer = self.frames_per_buffer as usize;

        let handle = thread::Builder::new()
            .name("fake-device-callback".into())
            .spawn(move || {
                let input = vec![0.0f32; frame_len];
                let mut output = vec![0.0f32; frame_len];
                while running.load(Ordering::Acquire) {
                    callback(&input, &mut output, frames_per_buffer);
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .expect("failed to spawn fake device thread");
        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn negotiated_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn negotiated_channels(&self) -> u32 {
        self.channels
    }
}

pub struct FakeHost;

impl DeviceHost for FakeHost {
    type Adapter = FakeAdapter;

    fn open(
        &self,
        config: &AudioConfig,
        callback: DeviceCallback,
        _on_stream_error: StreamErrorCallback,
    ) -> Result<Self::Adapter> {
        if !config.enable_output {
            return Err(EngineError::ConfigInvalid("fake host requires enable_output".into()));
        }
        Ok(FakeAdapter {
            channels: config.channels,
            sample_rate: config.sample_rate,
            frames_per_buffer: config.frames_per_buffer,
            callback: Some(callback),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    fn enumerate_outputs(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(vec![DeviceDescriptor {
            id: "fake".into(),
            name: "Fake Output".into(),
            is_default: true,
            max_channels: 2,
        }])
    }

    fn enumerate_inputs(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(Vec::new())
    }
}

/// Deterministic decoder producing a sine wave, handed out in fixed-size
/// chunks like a real codec would.
pub struct SineDecoder {
    frequency_hz: f32,
    amplitude: f32,
    sample_rate: u32,
    channels: u32,
    frames_emitted: u64,
    total_frames: u64,
    chunk_frames: usize,
}

impl SineDecoder {
    pub fn new(frequency_hz: f32, amplitude: f32, sample_rate: u32, channels: u32, duration_secs: f64) -> Self {
        Self {
            frequency_hz,
            amplitude,
            sample_rate,
            channels,
            frames_emitted: 0,
            total_frames: (duration_secs * sample_rate as f64).round() as u64,
            chunk_frames: (sample_rate / 10).max(1) as usize,
        }
    }
}

impl Decoder for SineDecoder {
    fn next_chunk(&mut self) -> Result<DecodedChunk> {
        let remaining = self.total_frames.saturating_sub(self.frames_emitted);
        let frames = (remaining as usize).min(self.chunk_frames);
        let mut samples = Vec::with_capacity(frames * self.channels as usize);
        for i in 0..frames {
            let t = (self.frames_emitted + i as u64) as f32 / self.sample_rate as f32;
            let value = (2.0 * PI * self.frequency_hz * t).sin() * self.amplitude;
            for _ in 0..self.channels {
                samples.push(value);
            }
        }
        self.frames_emitted += frames as u64;
        Ok(DecodedChunk {
            samples,
            end_of_stream: self.frames_emitted >= self.total_frames,
        })
    }

    fn seek(&mut self, frame_position: u64) -> Result<()> {
        self.frames_emitted = frame_position.min(self.total_frames);
        Ok(())
    }

    fn duration_frames(&self) -> Option<u64> {
        Some(self.total_frames)
    }
}

/// Silent decoder that never ends; used where the test only cares about
/// source-count accounting, not audible output.
pub struct SilentDecoder;

impl Decoder for SilentDecoder {
    fn next_chunk(&mut self) -> Result<DecodedChunk> {
        Ok(DecodedChunk {
            samples: vec![0.0; 256],
            end_of_stream: false,
        })
    }

    fn seek(&mut self, _frame_position: u64) -> Result<()> {
        Ok(())
    }

    fn duration_frames(&self) -> Option<u64> {
        None
    }
}

pub fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) {
    let start = std::time::Instant::now();
    while !cond() {
        if start.elapsed() > timeout {
            panic!("condition never became true within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(5));
    }
}
