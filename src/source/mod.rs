//! Audio source contracts (§4.5).
//!
//! `AudioSource` is the base contract every source implements; a clock-bound
//! source additionally implements [`ClockBoundSource::read_at`] against the
//! master timeline. Grounded on the teacher's `playback` source/state idioms
//! (state machine, volume as an atomic f32, per-source id), generalized from
//! the teacher's two concrete source kinds to the trait-object shape the mix
//! engine (§4.8) needs to hold N heterogeneous sources.

pub mod decode_buffer;
pub mod effects;
pub mod file_source;

use uuid::Uuid;

use crate::error::Result;

/// Lifecycle state of a source (§4.5, §9 decision on `EndOfStream`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Created,
    Playing,
    Paused,
    Stopped,
    /// Terminal substate reached when a clock-bound source's position
    /// equals or exceeds its duration. The only exit is a clock seek to a
    /// position before the source's duration (§9 decision); `play()` alone
    /// does not leave this state.
    EndOfStream,
}

/// Result of a clock-bound `read_at` call (§4.5).
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub frames_read: usize,
    pub completed: bool,
    pub error: Option<String>,
    /// Frames actually copied from real decoded data, as opposed to the
    /// silence substituted for the rest of `frames_read` on a dropout.
    /// `frames_read - copied_frames` is the number of silent frames written
    /// (§8 "missed_frames equals the number of silent samples written
    /// relative to requested").
    pub copied_frames: usize,
}

impl ReadResult {
    pub fn full(frames_read: usize) -> Self {
        Self {
            frames_read,
            completed: true,
            error: None,
            copied_frames: frames_read,
        }
    }

    pub fn underrun(requested: usize, copied_frames: usize) -> Self {
        Self {
            frames_read: requested,
            completed: false,
            error: Some("underrun".to_string()),
            copied_frames,
        }
    }

    pub fn end_of_stream(frames_read: usize) -> Self {
        Self {
            frames_read,
            completed: true,
            error: None,
            copied_frames: frames_read,
        }
    }

    pub fn truncated() -> Self {
        Self {
            frames_read: 0,
            completed: false,
            error: None,
            copied_frames: 0,
        }
    }
}

/// Base contract every audio source implements (§4.5, §6).
pub trait AudioSource: Send {
    fn id(&self) -> Uuid;
    fn state(&self) -> SourceState;

    fn play(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;

    /// Raw gain in `[0, 20]` (§3); values above 1.0 are legal for input
    /// monitoring.
    fn volume(&self) -> f32;
    fn set_volume(&self, volume: f32);

    /// Pull-based read for sources not attached to the master clock. Returns
    /// the number of interleaved samples written into `buf`, which must hold
    /// at least `frames * channels` samples.
    fn read(&self, buf: &mut [f32], frames: usize) -> Result<usize>;
}

/// A source whose samples are addressed by master-timeline position rather
/// than pulled sequentially (§4.4, §4.5).
pub trait ClockBoundSource: AudioSource {
    /// Offset, in seconds, added to the requested master timestamp before
    /// translating into the source's own timeline.
    fn start_offset(&self) -> f64;
    fn set_start_offset(&self, seconds: f64);

    /// Current seek-session counter last observed by this source, used to
    /// detect a master-clock discontinuity (§4.4 invariant).
    fn last_observed_session(&self) -> u64;

    /// Read `frames` interleaved samples starting at
    /// `round(timestamp * sample_rate) + round(start_offset * sample_rate)`
    /// in the source's own timeline (§4.5).
    fn read_at(&self, timestamp: f64, session: u64, buf: &mut [f32], frames: usize) -> ReadResult;
}
