//! Lock-free single-producer/single-consumer ring buffer of interleaved
//! float samples (§4.1).
//!
//! Generalized from the teacher's `playback::ring_buffer::AudioRingBuffer`
//! (which rings fixed 2-channel `AudioFrame`s) down to a ring of raw
//! interleaved `f32` samples, since this spec's device-facing rings must
//! carry an arbitrary channel count and arbitrary-length spans per `write`/
//! `read` call rather than one frame at a time. The underrun/overrun
//! counters and log-every-Nth discipline are kept as-is.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Minimum multiple of one buffer's worth of samples the ring must hold, so
/// scheduling jitter between producer and consumer threads doesn't starve
/// either side (§4.1).
pub const MIN_CAPACITY_BUFFERS: usize = 4;

/// Create a ring sized for `frames_per_buffer * channels`, with the
/// capacity-in-buffers multiplier from §4.1.
pub fn sized_for(frames_per_buffer: u32, channels: u32) -> RingBuffer {
    let capacity = frames_per_buffer as usize * channels as usize * MIN_CAPACITY_BUFFERS;
    RingBuffer::new(capacity)
}

/// Lock-free SPSC ring buffer of interleaved `f32` samples.
pub struct RingBuffer {
    buffer: HeapRb<f32>,
}

impl RingBuffer {
    /// Allocate the backing storage for `capacity_samples` samples.
    pub fn new(capacity_samples: usize) -> Self {
        Self {
            buffer: HeapRb::new(capacity_samples.max(1)),
        }
    }

    /// Split into producer and consumer halves, each movable to its own thread.
    pub fn split(self) -> (RingProducer, RingConsumer) {
        let (prod, cons) = self.buffer.split();
        let overruns = Arc::new(AtomicU64::new(0));
        let underruns = Arc::new(AtomicU64::new(0));
        (
            RingProducer {
                producer: prod,
                overruns: Arc::clone(&overruns),
            },
            RingConsumer {
                consumer: cons,
                underruns: Arc::clone(&underruns),
            },
        )
    }
}

/// Producer half of a [`RingBuffer`].
pub struct RingProducer {
    producer: HeapProd<f32>,
    overruns: Arc<AtomicU64>,
}

impl RingProducer {
    /// Copy up to `available_write` samples from `src`; never blocks, never
    /// allocates. Returns the count actually written. A short write means
    /// the ring was full; callers account this as overflow.
    pub fn write(&mut self, src: &[f32]) -> usize {
        let written = self.producer.push_slice(src);
        if written < src.len() {
            let count = self.overruns.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 1000 == 0 {
                warn!(
                    "ring buffer overflow: wrote {}/{} samples (total overflows: {})",
                    written,
                    src.len(),
                    count
                );
            }
        }
        written
    }

    pub fn available_write(&self) -> usize {
        self.producer.vacant_len()
    }

    pub fn available_read(&self) -> usize {
        self.producer.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity().get()
    }

    pub fn overrun_count(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Consumer half of a [`RingBuffer`].
pub struct RingConsumer {
    consumer: HeapCons<f32>,
    underruns: Arc<AtomicU64>,
}

impl RingConsumer {
    /// Copy up to `available_read` samples into `dst`; never blocks, never
    /// allocates. Returns the count actually read. A short read means the
    /// ring was empty; callers account this as underrun.
    pub fn read(&mut self, dst: &mut [f32]) -> usize {
        let read = self.consumer.pop_slice(dst);
        if read < dst.len() {
            let count = self.underruns.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 1000 == 0 {
                trace!(
                    "ring buffer underrun: read {}/{} samples (total underruns: {})",
                    read,
                    dst.len(),
                    count
                );
            }
        }
        read
    }

    pub fn available_read(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn available_write(&self) -> usize {
        self.consumer.vacant_len()
    }

    pub fn capacity(&self) -> usize {
        self.consumer.capacity().get()
    }

    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Consumer-side clear, used after measurement passes or abrupt stops.
    pub fn clear(&mut self) {
        self.consumer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let ring = RingBuffer::new(16);
        let (mut prod, mut cons) = ring.split();

        let src = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(prod.write(&src), 4);

        let mut dst = [0.0; 4];
        assert_eq!(cons.read(&mut dst), 4);
        assert_eq!(dst, src);
    }

    #[test]
    fn short_write_reports_available_space_only() {
        let ring = RingBuffer::new(4);
        let (mut prod, _cons) = ring.split();

        let src = [1.0; 8];
        let written = prod.write(&src);
        assert!(written <= 4);
        assert_eq!(prod.overrun_count(), 1);
    }

    #[test]
    fn short_read_on_empty_ring_counts_underrun() {
        let ring = RingBuffer::new(8);
        let (_prod, mut cons) = ring.split();

        let mut dst = [0.0; 4];
        assert_eq!(cons.read(&mut dst), 0);
        assert_eq!(cons.underrun_count(), 1);
    }

    #[test]
    fn interleaved_writes_and_reads_preserve_order() {
        let ring = RingBuffer::new(32);
        let (mut prod, mut cons) = ring.split();

        let mut total_written = 0usize;
        let mut expected = Vec::new();
        let mut observed = Vec::new();

        for batch in 0..5 {
            let src: Vec<f32> = (0..4).map(|i| (batch * 4 + i) as f32).collect();
            total_written += prod.write(&src);
            expected.extend_from_slice(&src);

            let mut dst = [0.0; 4];
            let n = cons.read(&mut dst);
            observed.extend_from_slice(&dst[..n]);
        }

        assert_eq!(total_written, expected.len());
        assert_eq!(observed, expected);
    }

    #[test]
    fn sized_for_applies_min_capacity_multiplier() {
        let ring = sized_for(512, 2);
        let (prod, _cons) = ring.split();
        assert_eq!(prod.capacity(), 512 * 2 * MIN_CAPACITY_BUFFERS);
    }
}
