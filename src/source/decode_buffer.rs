//! Decode-ahead buffer for clock-bound file sources (§4.5, §4.5.1).
//!
//! Grounded on the teacher's `playback::playout_ring_buffer::PlayoutRingBuffer`
//! (capacity/headroom/resume-hysteresis pause protocol, `is_exhausted`,
//! `BufferStatistics`), but reshaped from a plain FIFO ring into a buffer
//! indexed by absolute source-timeline sample position: `read_at` addresses
//! samples by position rather than pulling the next value, so random-access
//! lookup (and dropping the buffer on a clock discontinuity) needs a
//! position-aware structure rather than `ringbuf`'s SPSC ring. A short mutex
//! hold per decode chunk / per mix-buffer read is acceptable here because,
//! unlike the device-facing ring (§4.1), neither side of this buffer is the
//! realtime device-callback thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::trace;

/// Default capacity: 15 seconds of audio at the source's sample rate and
/// channel count, mirroring the teacher's ~15s default playout buffer.
pub fn default_capacity_samples(sample_rate: u32, channels: u32) -> usize {
    sample_rate as usize * channels as usize * 15
}

/// Default headroom: 0.1s worth of samples, mirroring the teacher's default.
pub fn default_headroom_samples(sample_rate: u32, channels: u32) -> usize {
    sample_rate as usize * channels as usize / 10
}

/// Default resume hysteresis: 1s worth of samples, mirroring the teacher's default.
pub fn default_resume_hysteresis_samples(sample_rate: u32, channels: u32) -> usize {
    sample_rate as usize * channels as usize
}

struct Inner {
    samples: VecDeque<f32>,
    /// Absolute sample-timeline index of `samples[0]`.
    base_position: u64,
    decode_complete: bool,
}

/// Bounded decode-ahead buffer addressed by absolute source-timeline sample
/// position.
pub struct DecodeAheadBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    headroom: usize,
    resume_hysteresis: usize,
    decoder_should_pause: AtomicBool,
}

impl DecodeAheadBuffer {
    pub fn new(capacity: usize, headroom: usize, resume_hysteresis: usize, start_position: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::with_capacity(capacity.min(1 << 20)),
                base_position: start_position,
                decode_complete: false,
            }),
            capacity,
            headroom,
            resume_hysteresis,
            decoder_should_pause: AtomicBool::new(false),
        }
    }

    /// Called by the decode-ahead thread with the next contiguous chunk of
    /// decoded samples. Appends unconditionally; the decoder is expected to
    /// consult [`Self::should_pause`] between chunks rather than being
    /// force-blocked here.
    pub fn push(&self, samples: &[f32]) {
        let mut inner = self.inner.lock().unwrap();
        inner.samples.extend(samples.iter().copied());
        let occupied = inner.samples.len();
        let free = self.capacity.saturating_sub(occupied);
        if free <= self.headroom && !self.decoder_should_pause.load(Ordering::Relaxed) {
            self.decoder_should_pause.store(true, Ordering::Release);
            trace!("decode-ahead buffer reached pause threshold: {occupied}/{}", self.capacity);
        }
    }

    pub fn mark_decode_complete(&self) {
        self.inner.lock().unwrap().decode_complete = true;
    }

    /// True once the decoder should stop producing until drained past the
    /// resume hysteresis (§4.5.1).
    pub fn should_pause(&self) -> bool {
        self.decoder_should_pause.load(Ordering::Acquire)
    }

    /// Copy `frames` samples starting at absolute `position` into `dst`.
    /// Returns `(copied, underrun, end_of_stream, precedes_minimum)`:
    /// - `underrun`: the decoder has not yet produced samples that far ahead.
    /// - `end_of_stream`: decode is complete and `position` is at or past the
    ///   last produced sample.
    /// - `precedes_minimum`: `position` is older than the buffer's retained
    ///   window (truncated from behind).
    pub fn read_at(&self, position: u64, dst: &mut [f32]) -> ReadOutcome {
        let mut inner = self.inner.lock().unwrap();

        if position < inner.base_position {
            dst.fill(0.0);
            return ReadOutcome {
                copied: 0,
                underrun: false,
                end_of_stream: false,
                precedes_minimum: true,
            };
        }

        let offset = (position - inner.base_position) as usize;
        let available = inner.samples.len().saturating_sub(offset);

        if available == 0 {
            dst.fill(0.0);
            return ReadOutcome {
                copied: 0,
                underrun: !inner.decode_complete,
                end_of_stream: inner.decode_complete,
                precedes_minimum: false,
            };
        }

        let to_copy = available.min(dst.len());
        for (i, slot) in dst.iter_mut().take(to_copy).enumerate() {
            *slot = inner.samples[offset + i];
        }
        if to_copy < dst.len() {
            dst[to_copy..].fill(0.0);
        }

        // Advance the retained window: drop samples the read cursor has
        // fully passed so the VecDeque doesn't grow unbounded.
        let consumed_through = offset + to_copy;
        if consumed_through > 0 {
            inner.samples.drain(0..consumed_through);
            inner.base_position += consumed_through as u64;

            let occupied = inner.samples.len();
            let free = self.capacity.saturating_sub(occupied);
            let resume_threshold = self.resume_hysteresis.saturating_add(self.headroom);
            if free >= resume_threshold && self.decoder_should_pause.load(Ordering::Relaxed) {
                self.decoder_should_pause.store(false, Ordering::Release);
            }
        }

        let end_of_stream = to_copy < dst.len() && inner.decode_complete;
        ReadOutcome {
            copied: to_copy,
            underrun: to_copy < dst.len() && !inner.decode_complete,
            end_of_stream,
            precedes_minimum: false,
        }
    }

    /// Drop all buffered-ahead data and re-anchor to `new_position`, used
    /// when a master-clock seek invalidates what has been decoded so far
    /// (§4.4, §4.5).
    pub fn invalidate(&self, new_position: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.samples.clear();
        inner.base_position = new_position;
        inner.decode_complete = false;
        self.decoder_should_pause.store(false, Ordering::Release);
    }

    pub fn occupied(&self) -> usize {
        self.inner.lock().unwrap().samples.len()
    }
}

/// Outcome of a [`DecodeAheadBuffer::read_at`] call.
#[derive(Debug, Clone, Copy)]
pub struct ReadOutcome {
    pub copied: usize,
    pub underrun: bool,
    pub end_of_stream: bool,
    pub precedes_minimum: bool,
}
