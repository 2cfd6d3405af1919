//! Master clock (§4.4).
//!
//! Defines the single timeline all clock-bound sources render against: at a
//! given mix-buffer boundary every source sees the same `current_timestamp`.
//! Conceptually informed by the teacher's `playback::song_timeline`'s habit
//! of keeping a cached monotonic position plus a small amount of extra state
//! for discontinuity detection, though the sync-group/timeline concept
//! itself is superseded here by the simpler clock + per-source `start_offset`
//! design (§9).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Rendering mode, consulted by the mix engine to choose between
/// non-blocking dropout semantics (Realtime) and blocking wait-for-source
/// semantics (Offline) (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    Realtime,
    Offline,
}

/// Monotonically advancing sample counter shared by all synchronized
/// sources.
///
/// `current_sample_position`, the `session` seek counter, and `mode` are
/// plain atomics: readers (sources, on their own threads) never block the
/// mix thread that owns `advance`/`seek_to`.
pub struct MasterClock {
    sample_rate: u32,
    current_sample_position: AtomicU64,
    /// Incremented on every `seek_to`; sources compare it to their own
    /// last-observed value to detect a timeline discontinuity (§4.4 invariant).
    session: AtomicU64,
    mode: AtomicU32,
}

const MODE_REALTIME: u32 = 0;
const MODE_OFFLINE: u32 = 1;

impl MasterClock {
    pub fn new(sample_rate: u32, mode: ClockMode) -> Self {
        Self {
            sample_rate,
            current_sample_position: AtomicU64::new(0),
            session: AtomicU64::new(0),
            mode: AtomicU32::new(mode_to_u32(mode)),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn current_sample_position(&self) -> u64 {
        self.current_sample_position.load(Ordering::Acquire)
    }

    /// `current_sample_position / sample_rate`, exactly as the rational form
    /// the spec calls for, computed here in f64 (fine for all practical
    /// session lengths; the authoritative value remains the integer sample
    /// position).
    pub fn current_timestamp(&self) -> f64 {
        self.current_sample_position() as f64 / self.sample_rate as f64
    }

    pub fn mode(&self) -> ClockMode {
        u32_to_mode(self.mode.load(Ordering::Acquire))
    }

    pub fn set_mode(&self, mode: ClockMode) {
        self.mode.store(mode_to_u32(mode), Ordering::Release);
    }

    /// Monotonic seek-session counter; bump on every `seek_to`.
    pub fn session(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    /// Called by the mix engine exactly once per output buffer, after
    /// samples have been pushed to the pump.
    pub fn advance(&self, frames: u64) {
        self.current_sample_position
            .fetch_add(frames, Ordering::AcqRel);
    }

    /// Update `current_sample_position` to `round(seconds * sample_rate)`
    /// and bump the session counter so clock-bound sources invalidate any
    /// buffered-ahead data on their next `read_at`.
    pub fn seek_to(&self, seconds: f64) {
        let position = (seconds * self.sample_rate as f64).round().max(0.0) as u64;
        self.current_sample_position
            .store(position, Ordering::Release);
        self.session.fetch_add(1, Ordering::AcqRel);
    }
}

fn mode_to_u32(mode: ClockMode) -> u32 {
    match mode {
        ClockMode::Realtime => MODE_REALTIME,
        ClockMode::Offline => MODE_OFFLINE,
    }
}

fn u32_to_mode(value: u32) -> ClockMode {
    if value == MODE_OFFLINE {
        ClockMode::Offline
    } else {
        ClockMode::Realtime
    }
}
