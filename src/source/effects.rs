//! Effect chains (§4.6 SourceWithEffects, §4.7 master effect chain).
//!
//! The teacher has no direct analogue for an effect chain, but its atomic
//! dirty-flag/threshold discipline in `playback::playout_ring_buffer`
//! (`decoder_should_pause` set under one ordering, observed under another,
//! with the mutation itself confined to a short critical section) is the
//! same shape §4.7 asks for: mutate a list under a mutex, flip a "changed"
//! boolean, and let the hot path refresh an `Arc` snapshot only when it
//! observes the flag, rather than locking on every buffer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::{AudioSource, ClockBoundSource, ReadResult, SourceState};
use crate::error::{EffectError, Result};

/// One in-place audio effect. Implementations process `buf` (interleaved,
/// `channels` wide) in place.
pub trait EffectProcessor: Send + Sync {
    fn name(&self) -> &str;
    fn process(&self, buf: &mut [f32], channels: u32) -> Result<()>;
}

struct Slot {
    effect: Arc<dyn EffectProcessor>,
    enabled: AtomicBool,
    /// Wet/dry mix in `[0, 1]`, stored as bits for lock-free reads.
    wet_mix_bits: AtomicU32,
}

impl Slot {
    fn new(effect: Arc<dyn EffectProcessor>) -> Self {
        Self {
            effect,
            enabled: AtomicBool::new(true),
            wet_mix_bits: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    fn wet_mix(&self) -> f32 {
        f32::from_bits(self.wet_mix_bits.load(Ordering::Relaxed))
    }
}

/// Ordered effect list behind a mutex for structural mutation; the hot path
/// reads a cached `Arc` snapshot refreshed only when a "changed" flag is
/// observed (§4.7).
pub struct EffectChain {
    slots: Mutex<Vec<Arc<Slot>>>,
    changed: AtomicBool,
    snapshot: Mutex<Arc<Vec<Arc<Slot>>>>,
    /// Preallocated dry-signal scratch for wet/dry blending, reused across
    /// `process` calls so a partial wet mix never allocates on the hot path
    /// (§3 "process never allocates"; §9).
    dry_scratch: Mutex<Vec<f32>>,
}

impl EffectChain {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            changed: AtomicBool::new(false),
            snapshot: Mutex::new(Arc::new(Vec::new())),
            dry_scratch: Mutex::new(Vec::new()),
        }
    }

    /// Add an effect at the end of the chain. Safe to call while the mix
    /// thread is processing; the new effect is observed on the mix thread's
    /// next snapshot refresh.
    pub fn add(&self, effect: Arc<dyn EffectProcessor>) {
        let mut slots = self.slots.lock().unwrap();
        slots.push(Arc::new(Slot::new(effect)));
        self.changed.store(true, Ordering::Release);
    }

    pub fn remove_by_name(&self, name: &str) {
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|s| s.effect.name() != name);
        self.changed.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap();
        slots.clear();
        self.changed.store(true, Ordering::Release);
    }

    /// Toggle an effect's enabled flag without touching the snapshot; reads
    /// of `enabled` are a relaxed atomic (§4.7).
    pub fn set_enabled(&self, name: &str, enabled: bool) {
        let slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter().find(|s| s.effect.name() == name) {
            slot.enabled.store(enabled, Ordering::Relaxed);
        }
    }

    pub fn set_wet_mix(&self, name: &str, wet_mix: f32) {
        let slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter().find(|s| s.effect.name() == name) {
            slot.wet_mix_bits.store(wet_mix.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        }
    }

    /// Called once per mix cycle by the hot path. Refreshes the cached
    /// snapshot under the mutex only if `changed` was observed with acquire
    /// ordering, then processes `buf` in place with the (possibly stale by
    /// one cycle, per §4.7) snapshot.
    pub fn process(&self, buf: &mut [f32], channels: u32) {
        if self.changed.swap(false, Ordering::AcqRel) {
            let fresh = { self.slots.lock().unwrap().clone() };
            *self.snapshot.lock().unwrap() = Arc::new(fresh);
        }

        let snapshot = self.snapshot.lock().unwrap().clone();
        for slot in snapshot.iter() {
            if !slot.enabled.load(Ordering::Relaxed) {
                continue;
            }
            let wet = slot.wet_mix();
            if wet >= 1.0 {
                if let Err(e) = slot.effect.process(buf, channels) {
                    tracing::warn!("effect '{}' failed: {e}", slot.effect.name());
                }
                continue;
            }
            let mut dry = self.dry_scratch.lock().unwrap();
            if dry.len() < buf.len() {
                dry.resize(buf.len(), 0.0);
            }
            let dry = &mut dry[..buf.len()];
            dry.copy_from_slice(buf);

            if let Err(e) = slot.effect.process(buf, channels) {
                tracing::warn!("effect '{}' failed: {e}", slot.effect.name());
                buf.copy_from_slice(dry);
                continue;
            }
            for (wet_sample, dry_sample) in buf.iter_mut().zip(dry.iter()) {
                *wet_sample = *wet_sample * wet + *dry_sample * (1.0 - wet);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EffectChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Decorator that forwards `read`/`read_at` to an inner source, then runs
/// the wrapped [`EffectChain`] on the returned samples (§4.6).
pub struct SourceWithEffects<S> {
    pub inner: S,
    pub chain: EffectChain,
    channels: u32,
}

impl<S> SourceWithEffects<S> {
    pub fn new(inner: S, channels: u32) -> Self {
        Self {
            inner,
            chain: EffectChain::new(),
            channels,
        }
    }
}

impl<S: AudioSource> AudioSource for SourceWithEffects<S> {
    fn id(&self) -> Uuid {
        self.inner.id()
    }

    fn state(&self) -> SourceState {
        self.inner.state()
    }

    fn play(&self) -> Result<()> {
        self.inner.play()
    }

    fn pause(&self) -> Result<()> {
        self.inner.pause()
    }

    fn stop(&self) -> Result<()> {
        self.inner.stop()
    }

    fn volume(&self) -> f32 {
        self.inner.volume()
    }

    fn set_volume(&self, volume: f32) {
        self.inner.set_volume(volume)
    }

    fn read(&self, buf: &mut [f32], frames: usize) -> Result<usize> {
        let frames_read = self.inner.read(buf, frames)?;
        let len = (frames_read * self.channels as usize).min(buf.len());
        self.chain.process(&mut buf[..len], self.channels);
        Ok(frames_read)
    }
}

impl<S: ClockBoundSource> ClockBoundSource for SourceWithEffects<S> {
    fn start_offset(&self) -> f64 {
        self.inner.start_offset()
    }

    fn set_start_offset(&self, seconds: f64) {
        self.inner.set_start_offset(seconds)
    }

    fn last_observed_session(&self) -> u64 {
        self.inner.last_observed_session()
    }

    fn read_at(&self, timestamp: f64, session: u64, buf: &mut [f32], frames: usize) -> ReadResult {
        let result = self.inner.read_at(timestamp, session, buf, frames);
        let len = (frames * self.channels as usize).min(buf.len());
        self.chain.process(&mut buf[..len], self.channels);
        result
    }
}
