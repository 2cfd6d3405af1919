//! Error types for the audio engine.
//!
//! Layered `thiserror` enums: a top-level [`EngineError`] wraps narrower
//! sub-errors for each subsystem named in the error taxonomy (device, source,
//! effect, recording). Per-buffer errors never unwind the mix loop; they are
//! isolated, logged, and surfaced as events (see [`crate::events`]).

use thiserror::Error;
use uuid::Uuid;

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Audio config rejected at engine construction.
    #[error("invalid audio config: {0}")]
    ConfigInvalid(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Effect(#[from] EffectError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    /// `add_source` called past `MaxAudioSources`.
    #[error("source limit exceeded: {max} sources already registered")]
    LimitExceeded { max: usize },

    /// Any API call made after the engine was disposed.
    #[error("engine has been disposed")]
    Disposed,
}

/// Errors raised by the device driver adapter (§4.2).
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no matching audio device available")]
    Unavailable,

    #[error("audio device is busy")]
    Busy,

    #[error("permission denied opening audio device")]
    Permission,

    #[error("device does not support the requested format: {0}")]
    Format(String),

    /// Mid-stream backend error; fatal to the running engine.
    #[error("fatal device error: {0}")]
    Fatal(String),

    #[error("internal device adapter error: {0}")]
    Internal(String),
}

/// Errors isolated to a single source for a single mix buffer (§4.5, §4.8).
#[derive(Debug, Error)]
pub enum SourceError {
    /// Source could not satisfy `read`/`read_at` for this buffer.
    #[error("source {source_id} read failed: {reason}")]
    Read { source_id: Uuid, reason: String },

    /// Clock-bound source failed to deliver in time.
    #[error("source {source_id} dropout at sample {sample_position}: {missed_frames} frames missed")]
    Dropout {
        source_id: Uuid,
        sample_position: u64,
        missed_frames: u32,
    },

    #[error("failed to open decoder for source {source_id}: {reason}")]
    DecoderOpen { source_id: Uuid, reason: String },

    #[error("decoder I/O error for source {source_id}: {reason}")]
    DecoderIo { source_id: Uuid, reason: String },

    #[error("decoder seek failed for source {source_id}: {reason}")]
    DecoderSeek { source_id: Uuid, reason: String },

    /// Offline-mode per-buffer wait exceeded the deterministic timeout.
    #[error("source {source_id} offline wait timed out after {timeout_secs}s")]
    OfflineTimeout { source_id: Uuid, timeout_secs: f64 },
}

/// Errors isolated to a single effect for a single mix buffer (§4.6, §4.7).
#[derive(Debug, Error)]
pub enum EffectError {
    #[error("effect '{name}' failed to process: {reason}")]
    Process { name: String, reason: String },
}

/// Errors from the WAV mixdown writer (§4.9).
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("failed to create mixdown file: {0}")]
    Create(#[from] std::io::Error),

    #[error("failed to write mixdown samples: {0}")]
    Write(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Recommended handling for an [`EngineError`], mirroring the taxonomy's
/// fatal/non-fatal classification (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Retry the operation (e.g. reopening a busy device).
    Retry { max_attempts: u32 },
    /// Skip this buffer/source/effect and continue.
    Skip,
    /// Log and continue; no corrective action needed.
    LogAndContinue,
    /// Tear down the engine.
    Fatal,
}

impl EngineError {
    /// Get the recommended recovery strategy for this error.
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            EngineError::Device(DeviceError::Busy) => RecoveryStrategy::Retry { max_attempts: 3 },
            EngineError::Device(DeviceError::Fatal(_)) => RecoveryStrategy::Fatal,
            EngineError::Device(_) => RecoveryStrategy::LogAndContinue,
            EngineError::Source(SourceError::Dropout { .. }) => RecoveryStrategy::LogAndContinue,
            EngineError::Source(SourceError::OfflineTimeout { .. }) => RecoveryStrategy::Fatal,
            EngineError::Source(_) => RecoveryStrategy::Skip,
            EngineError::Effect(_) => RecoveryStrategy::Skip,
            EngineError::Recording(_) => RecoveryStrategy::LogAndContinue,
            EngineError::ConfigInvalid(_) => RecoveryStrategy::Fatal,
            EngineError::LimitExceeded { .. } => RecoveryStrategy::LogAndContinue,
            EngineError::Disposed => RecoveryStrategy::LogAndContinue,
        }
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Device(DeviceError::Unavailable) => {
                "No matching audio output device was found".to_string()
            }
            EngineError::Device(DeviceError::Fatal(_)) => {
                "The audio device stopped responding".to_string()
            }
            EngineError::Source(SourceError::Dropout { .. }) => {
                "Audio source could not keep up and was muted for a moment".to_string()
            }
            EngineError::LimitExceeded { max } => {
                format!("Cannot add another source: limit of {max} reached")
            }
            _ => "An error occurred in the audio engine".to_string(),
        }
    }

    /// Get a stable error code for logging/telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::ConfigInvalid(_) => "AE_CFG_001",
            EngineError::Device(e) => match e {
                DeviceError::Unavailable => "AE_DEV_001",
                DeviceError::Busy => "AE_DEV_002",
                DeviceError::Permission => "AE_DEV_003",
                DeviceError::Format(_) => "AE_DEV_004",
                DeviceError::Fatal(_) => "AE_DEV_005",
                DeviceError::Internal(_) => "AE_DEV_006",
            },
            EngineError::Source(e) => match e {
                SourceError::Read { .. } => "AE_SRC_001",
                SourceError::Dropout { .. } => "AE_SRC_002",
                SourceError::DecoderOpen { .. } => "AE_SRC_003",
                SourceError::DecoderIo { .. } => "AE_SRC_004",
                SourceError::DecoderSeek { .. } => "AE_SRC_005",
                SourceError::OfflineTimeout { .. } => "AE_SRC_006",
            },
            EngineError::Effect(_) => "AE_FX_001",
            EngineError::Recording(e) => match e {
                RecordingError::Create(_) => "AE_REC_001",
                RecordingError::Write(_) => "AE_REC_002",
            },
            EngineError::LimitExceeded { .. } => "AE_LIM_001",
            EngineError::Disposed => "AE_DSP_001",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn error_codes_are_unique() {
        let errors = vec![
            EngineError::ConfigInvalid("bad".into()),
            EngineError::Device(DeviceError::Busy),
            EngineError::Source(SourceError::Dropout {
                source_id: Uuid::new_v4(),
                sample_position: 0,
                missed_frames: 10,
            }),
            EngineError::LimitExceeded { max: 22 },
            EngineError::Disposed,
        ];
        let codes: HashSet<_> = errors.iter().map(|e| e.error_code()).collect();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn device_fatal_is_fatal() {
        let err = EngineError::Device(DeviceError::Fatal("lost".into()));
        assert_eq!(err.recovery_strategy(), RecoveryStrategy::Fatal);
    }

    #[test]
    fn dropout_is_log_and_continue() {
        let err = EngineError::Source(SourceError::Dropout {
            source_id: Uuid::new_v4(),
            sample_position: 0,
            missed_frames: 5,
        });
        assert_eq!(err.recovery_strategy(), RecoveryStrategy::LogAndContinue);
    }
}
