//! Device driver adapter (§4.2).
//!
//! A thin abstraction over a host audio backend. `cpal` already multiplexes
//! WASAPI/CoreAudio/ALSA/ASIO/AAudio behind one API, so [`cpal_adapter`]
//! implements this trait once over `cpal` rather than once per backend; a
//! non-cpal backend could implement [`DeviceAdapter`] the same way.

pub mod cpal_adapter;

use crate::config::AudioConfig;
use crate::error::{DeviceError, Result};

/// One enumerated device (§4.2 `enumerate_outputs`/`enumerate_inputs`).
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub max_channels: u32,
}

/// Callback invoked once per hardware buffer. Runs on a realtime-priority
/// thread owned by the host: MUST NOT block, allocate, or lock (§4.2).
pub type DeviceCallback = Box<dyn FnMut(&[f32], &mut [f32], usize) + Send + 'static>;

/// A backend-agnostic stream error, delivered off the realtime thread.
pub type StreamErrorCallback = Box<dyn Fn(String) + Send + 'static>;

/// Opened but not necessarily started duplex/half-duplex audio stream.
pub trait DeviceAdapter: Send {
    /// Idempotent; returns only after the callback has been invoked at least
    /// once or a short timeout elapses.
    fn start(&mut self) -> Result<()>;

    /// Idempotent.
    fn stop(&mut self) -> Result<()>;

    fn negotiated_sample_rate(&self) -> u32;
    fn negotiated_channels(&self) -> u32;
}

/// Opens streams and enumerates devices for one host backend.
pub trait DeviceHost {
    type Adapter: DeviceAdapter;

    /// May fail with `DeviceError::{Unavailable, Format, Busy, Permission, Internal}`.
    fn open(
        &self,
        config: &AudioConfig,
        callback: DeviceCallback,
        on_stream_error: StreamErrorCallback,
    ) -> Result<Self::Adapter>;

    fn enumerate_outputs(&self) -> Result<Vec<DeviceDescriptor>>;
    fn enumerate_inputs(&self) -> Result<Vec<DeviceDescriptor>>;
}

pub(crate) fn unsupported_format(msg: impl Into<String>) -> crate::error::EngineError {
    DeviceError::Format(msg.into()).into()
}
