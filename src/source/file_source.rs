//! File-backed clock-bound source (§4.5).
//!
//! `Decoder` is the external-collaborator contract: decoders themselves are
//! explicitly out of scope (§1 Non-goals), so this is a thin trait a caller
//! supplies an implementation of (e.g. wrapping `symphonia` or any other
//! decode library), not an implementation of any particular codec.
//!
//! `FileSource` owns a background decode-ahead thread that fills a
//! [`DecodeAheadBuffer`], pausing when the buffer nears capacity and
//! resuming past the resume-hysteresis threshold, mirroring the teacher's
//! `playout_ring_buffer` pause/resume protocol generalized to position
//! addressing (§4.5.1).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use super::decode_buffer::{
    default_capacity_samples, default_headroom_samples, default_resume_hysteresis_samples,
    DecodeAheadBuffer,
};
use super::{AudioSource, ClockBoundSource, ReadResult, SourceState};
use crate::error::Result;

/// One chunk of decoded audio, or the terminal end-of-stream marker.
pub struct DecodedChunk {
    /// Interleaved samples, `frames * channels` long.
    pub samples: Vec<f32>,
    pub end_of_stream: bool,
}

/// External decoder collaborator. Implementations are expected to decode
/// roughly one second at a time per call, matching the teacher's ~1s chunk
/// cadence, though the exact chunk size is an implementation detail.
pub trait Decoder: Send {
    /// Produce the next chunk of interleaved samples, or signal EOF via
    /// `end_of_stream = true` (with `samples` possibly non-empty, for the
    /// final partial chunk).
    fn next_chunk(&mut self) -> Result<DecodedChunk>;

    /// Seek the decoder so the next `next_chunk` starts at `sample_position`
    /// (in the source's own timeline, i.e. frame index, not sample index).
    fn seek(&mut self, frame_position: u64) -> Result<()>;

    /// Total duration in frames, if known ahead of decode completion.
    fn duration_frames(&self) -> Option<u64>;
}

fn state_to_u8(state: SourceState) -> u8 {
    match state {
        SourceState::Created => 0,
        SourceState::Playing => 1,
        SourceState::Paused => 2,
        SourceState::Stopped => 3,
        SourceState::EndOfStream => 4,
    }
}

fn state_from_u8(v: u8) -> SourceState {
    match v {
        1 => SourceState::Playing,
        2 => SourceState::Paused,
        3 => SourceState::Stopped,
        4 => SourceState::EndOfStream,
        _ => SourceState::Created,
    }
}

/// Canonical clock-bound source: decodes a file ahead of the read cursor on
/// a background thread and serves `read_at` out of the resulting buffer.
pub struct FileSource {
    id: Uuid,
    channels: u32,
    sample_rate: u32,
    state: AtomicU8,
    volume_bits: AtomicU32,
    start_offset_bits: AtomicU64,
    last_observed_session: AtomicU64,
    sequential_cursor: AtomicU64,
    buffer: Arc<DecodeAheadBuffer>,
    stop_flag: Arc<AtomicBool>,
    decode_thread: Option<JoinHandle<()>>,
}

impl FileSource {
    /// Spawn the decode-ahead background thread and return a ready source.
    pub fn open(sample_rate: u32, channels: u32, mut decoder: Box<dyn Decoder>) -> Self {
        let id = Uuid::new_v4();
        let buffer = Arc::new(DecodeAheadBuffer::new(
            default_capacity_samples(sample_rate, channels),
            default_headroom_samples(sample_rate, channels),
            default_resume_hysteresis_samples(sample_rate, channels),
            0,
        ));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let thread_buffer = Arc::clone(&buffer);
        let thread_stop = Arc::clone(&stop_flag);
        let decode_thread = thread::Builder::new()
            .name(format!("decode-ahead-{id}"))
            .spawn(move || {
                decode_ahead_loop(&mut *decoder, &thread_buffer, &thread_stop);
            })
            .expect("failed to spawn decode-ahead thread");

        info!("file source {id} opened, decode-ahead thread started");

        Self {
            id,
            channels,
            sample_rate,
            state: AtomicU8::new(state_to_u8(SourceState::Created)),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            start_offset_bits: AtomicU64::new(0.0f64.to_bits()),
            last_observed_session: AtomicU64::new(0),
            sequential_cursor: AtomicU64::new(0),
            buffer,
            stop_flag,
            decode_thread: Some(decode_thread),
        }
    }
}

fn decode_ahead_loop(decoder: &mut dyn Decoder, buffer: &DecodeAheadBuffer, stop_flag: &AtomicBool) {
    while !stop_flag.load(Ordering::Relaxed) {
        if buffer.should_pause() {
            thread::sleep(Duration::from_millis(20));
            continue;
        }
        match decoder.next_chunk() {
            Ok(chunk) => {
                if !chunk.samples.is_empty() {
                    buffer.push(&chunk.samples);
                }
                if chunk.end_of_stream {
                    buffer.mark_decode_complete();
                    debug!("decode-ahead thread reached end of stream");
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("decode-ahead thread error, stopping: {e}");
                buffer.mark_decode_complete();
                return;
            }
        }
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.decode_thread.take() {
            let _ = handle.join();
        }
    }
}

impl AudioSource for FileSource {
    fn id(&self) -> Uuid {
        self.id
    }

    fn state(&self) -> SourceState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    fn play(&self) -> Result<()> {
        if self.state() != SourceState::EndOfStream {
            self.state.store(state_to_u8(SourceState::Playing), Ordering::Release);
        }
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        if self.state() == SourceState::Playing {
            self.state.store(state_to_u8(SourceState::Paused), Ordering::Release);
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.state.store(state_to_u8(SourceState::Stopped), Ordering::Release);
        Ok(())
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    /// Raw gain in `[0, 20]` (§3): values above 1.0 are legal for input
    /// monitoring, unlike the master volume which is clamped to `[0, 1]`.
    fn set_volume(&self, volume: f32) {
        self.volume_bits.store(volume.clamp(0.0, 20.0).to_bits(), Ordering::Relaxed);
    }

    /// Sequential pull, independent of the master clock: reads from the same
    /// decode-ahead buffer starting at an internally tracked cursor.
    fn read(&self, buf: &mut [f32], frames: usize) -> Result<usize> {
        let len = frames * self.channels as usize;
        let dst = &mut buf[..len.min(buf.len())];
        let cursor = self.sequential_cursor.load(Ordering::Relaxed);
        let outcome = self.buffer.read_at(cursor, dst);
        self.sequential_cursor.fetch_add(outcome.copied as u64, Ordering::Relaxed);
        Ok(outcome.copied / self.channels.max(1) as usize)
    }
}

impl ClockBoundSource for FileSource {
    fn start_offset(&self) -> f64 {
        f64::from_bits(self.start_offset_bits.load(Ordering::Relaxed))
    }

    fn set_start_offset(&self, seconds: f64) {
        self.start_offset_bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    fn last_observed_session(&self) -> u64 {
        self.last_observed_session.load(Ordering::Relaxed)
    }

    fn read_at(&self, timestamp: f64, session: u64, buf: &mut [f32], frames: usize) -> ReadResult {
        if session != self.last_observed_session.swap(session, Ordering::AcqRel) {
            let target_frame = ((timestamp + self.start_offset()) * self.sample_rate as f64).round().max(0.0) as u64;
            let target_position = target_frame * self.channels as u64;
            self.buffer.invalidate(target_position);
        }

        let target_frame = ((timestamp + self.start_offset()) * self.sample_rate as f64).round().max(0.0) as u64;
        let target_position = target_frame * self.channels as u64;

        let len = frames * self.channels as usize;
        let dst = &mut buf[..len.min(buf.len())];
        let outcome = self.buffer.read_at(target_position, dst);

        if outcome.precedes_minimum {
            return ReadResult::truncated();
        }
        if outcome.end_of_stream {
            self.state.store(state_to_u8(SourceState::EndOfStream), Ordering::Release);
            return ReadResult::end_of_stream(outcome.copied / self.channels.max(1) as usize);
        }
        if outcome.underrun {
            return ReadResult::underrun(frames, outcome.copied / self.channels.max(1) as usize);
        }
        ReadResult::full(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct CountingDecoder {
        remaining_frames: u64,
        channels: u32,
    }

    impl Decoder for CountingDecoder {
        fn next_chunk(&mut self) -> Result<DecodedChunk> {
            let frames = self.remaining_frames.min(480) as usize;
            self.remaining_frames -= frames as u64;
            let samples = vec![0.5f32; frames * self.channels as usize];
            Ok(DecodedChunk {
                samples,
                end_of_stream: self.remaining_frames == 0,
            })
        }

        fn seek(&mut self, _frame_position: u64) -> Result<()> {
            Ok(())
        }

        fn duration_frames(&self) -> Option<u64> {
            Some(self.remaining_frames)
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while !cond() {
            if start.elapsed() > Duration::from_secs(2) {
                panic!("condition never became true");
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn read_at_zero_returns_samples_once_decoded() {
        let decoder = CountingDecoder {
            remaining_frames: 4800,
            channels: 2,
        };
        let source = FileSource::open(48_000, 2, Box::new(decoder));
        wait_until(|| source.buffer.occupied() >= 960);

        let mut buf = [0.0f32; 960];
        let result = source.read_at(0.0, 0, &mut buf, 480);
        assert_eq!(result.frames_read, 480);
        assert!(result.completed);
    }

    #[test]
    fn read_at_ahead_of_decode_progress_reports_underrun() {
        let decoder = CountingDecoder {
            remaining_frames: 48_000,
            channels: 1,
        };
        let source = FileSource::open(48_000, 1, Box::new(decoder));

        let mut buf = [0.0f32; 480];
        let result = source.read_at(100.0, 0, &mut buf, 480);
        assert!(!result.completed);
        assert_eq!(result.error.as_deref(), Some("underrun"));
        assert_eq!(result.copied_frames, 0);
    }

    #[test]
    fn session_change_invalidates_buffer() {
        let decoder = CountingDecoder {
            remaining_frames: 48_000,
            channels: 1,
        };
        let source = FileSource::open(48_000, 1, Box::new(decoder));
        wait_until(|| source.buffer.occupied() >= 480);

        let mut buf = [0.0f32; 480];
        let _ = source.read_at(0.0, 0, &mut buf, 480);
        assert_eq!(source.last_observed_session(), 0);

        // Seeking forward bumps the session; the source must re-anchor.
        let result = source.read_at(10.0, 1, &mut buf, 480);
        assert_eq!(source.last_observed_session(), 1);
        assert!(!result.completed);
    }
}
