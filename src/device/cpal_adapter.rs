//! `cpal`-backed [`DeviceHost`]/[`DeviceAdapter`] implementation.
//!
//! Grounded on the teacher's `audio::output::AudioOutput` (cpal host/device
//! selection, `supported_output_configs` search, format-specific
//! `build_output_stream` closures, `Drop` stops the stream), generalized
//! from a hardcoded stereo-f32-preferred single-output device to the
//! arbitrary sample-rate/channel-count/duplex contract §4.2 specifies, and
//! reshaped behind the [`DeviceHost`]/[`DeviceAdapter`] traits so the engine
//! pump does not depend on `cpal` types directly.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{DeviceAdapter, DeviceCallback, DeviceDescriptor, DeviceHost, StreamErrorCallback};
use crate::config::AudioConfig;
use crate::error::{DeviceError, EngineError, Result};
use crate::ring_buffer::{sized_for, RingConsumer};

/// Default host backend selected by `cpal` for this platform.
pub struct CpalHost {
    host: cpal::Host,
}

impl CpalHost {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }
}

impl Default for CpalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceHost for CpalHost {
    type Adapter = CpalAdapter;

    fn open(
        &self,
        config: &AudioConfig,
        callback: DeviceCallback,
        on_stream_error: StreamErrorCallback,
    ) -> Result<Self::Adapter> {
        if !config.enable_output {
            return Err(EngineError::Device(DeviceError::Internal(
                "cpal adapter requires enable_output = true".into(),
            )));
        }

        let device = select_output_device(&self.host, config.output_device_id.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        info!("opening cpal output device: {device_name}");

        let (stream_config, sample_format) = negotiate_config(&device, config)?;
        debug!(
            "negotiated cpal config: sample_rate={}, channels={}, format={:?}",
            stream_config.sample_rate.0, stream_config.channels, sample_format
        );

        let input = if config.enable_input {
            let input_device = select_input_device(&self.host, config.input_device_id.as_deref())?;
            let input_device_name = input_device.name().unwrap_or_else(|_| "unknown".to_string());
            info!("opening cpal input device: {input_device_name}");

            let (input_stream_config, input_sample_format) = negotiate_input_config(&input_device, config)?;
            debug!(
                "negotiated cpal input config: sample_rate={}, channels={}, format={:?}",
                input_stream_config.sample_rate.0, input_stream_config.channels, input_sample_format
            );
            Some((input_device, input_stream_config, input_sample_format))
        } else {
            None
        };

        Ok(CpalAdapter {
            device,
            stream_config,
            sample_format,
            frames_per_buffer: config.frames_per_buffer,
            input,
            callback: Some(callback),
            on_stream_error: Some(on_stream_error),
            stream: None,
            input_stream: None,
            last_callback_at: None,
        })
    }

    fn enumerate_outputs(&self) -> Result<Vec<DeviceDescriptor>> {
        enumerate(&self.host, true)
    }

    fn enumerate_inputs(&self) -> Result<Vec<DeviceDescriptor>> {
        enumerate(&self.host, false)
    }
}

fn enumerate(host: &cpal::Host, outputs: bool) -> Result<Vec<DeviceDescriptor>> {
    let default_name = if outputs {
        host.default_output_device().and_then(|d| d.name().ok())
    } else {
        host.default_input_device().and_then(|d| d.name().ok())
    };

    let devices = if outputs {
        host.output_devices()
    } else {
        host.input_devices()
    }
    .map_err(|e| EngineError::Device(DeviceError::Internal(format!("enumerate failed: {e}"))))?;

    let mut out = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else {
            continue;
        };
        let max_channels = if outputs {
            device
                .supported_output_configs()
                .ok()
                .and_then(|mut c| c.next())
                .map(|c| c.channels() as u32)
                .unwrap_or(0)
        } else {
            device
                .supported_input_configs()
                .ok()
                .and_then(|mut c| c.next())
                .map(|c| c.channels() as u32)
                .unwrap_or(0)
        };
        let is_default = default_name.as_deref() == Some(name.as_str());
        out.push(DeviceDescriptor {
            id: name.clone(),
            name,
            is_default,
            max_channels,
        });
    }
    Ok(out)
}

fn select_output_device(host: &cpal::Host, device_id: Option<&str>) -> Result<Device> {
    if let Some(name) = device_id {
        let mut devices = host.output_devices().map_err(|e| {
            EngineError::Device(DeviceError::Internal(format!("enumerate failed: {e}")))
        })?;
        return devices
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| EngineError::Device(DeviceError::Unavailable));
    }
    host.default_output_device()
        .ok_or_else(|| EngineError::Device(DeviceError::Unavailable))
}

fn select_input_device(host: &cpal::Host, device_id: Option<&str>) -> Result<Device> {
    if let Some(name) = device_id {
        let mut devices = host.input_devices().map_err(|e| {
            EngineError::Device(DeviceError::Internal(format!("enumerate failed: {e}")))
        })?;
        return devices
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| EngineError::Device(DeviceError::Unavailable));
    }
    host.default_input_device()
        .ok_or_else(|| EngineError::Device(DeviceError::Unavailable))
}

fn negotiate_input_config(device: &Device, config: &AudioConfig) -> Result<(StreamConfig, SampleFormat)> {
    let mut supported = device.supported_input_configs().map_err(|e| {
        EngineError::Device(DeviceError::Internal(format!(
            "failed to enumerate device input configs: {e}"
        )))
    })?;

    let requested_rate = config.sample_rate;
    let requested_channels = config.channels as u16;

    let matching = supported.find(|c| {
        c.channels() == requested_channels
            && c.min_sample_rate().0 <= requested_rate
            && c.max_sample_rate().0 >= requested_rate
            && c.sample_format() == SampleFormat::F32
    });

    if let Some(supported_config) = matching {
        let sample_format = supported_config.sample_format();
        let stream_config = supported_config
            .with_sample_rate(cpal::SampleRate(requested_rate))
            .config();
        return Ok((stream_config, sample_format));
    }

    Err(EngineError::Device(DeviceError::Format(format!(
        "no input config matches {}Hz x{}ch f32",
        requested_rate, requested_channels
    ))))
}

fn negotiate_config(device: &Device, config: &AudioConfig) -> Result<(StreamConfig, SampleFormat)> {
    let mut supported = device.supported_output_configs().map_err(|e| {
        EngineError::Device(DeviceError::Internal(format!(
            "failed to enumerate device configs: {e}"
        )))
    })?;

    let requested_rate = config.sample_rate;
    let requested_channels = config.channels as u16;

    let matching = supported.find(|c| {
        c.channels() == requested_channels
            && c.min_sample_rate().0 <= requested_rate
            && c.max_sample_rate().0 >= requested_rate
            && c.sample_format() == SampleFormat::F32
    });

    if let Some(supported_config) = matching {
        let sample_format = supported_config.sample_format();
        let stream_config = supported_config
            .with_sample_rate(cpal::SampleRate(requested_rate))
            .config();
        return Ok((stream_config, sample_format));
    }

    Err(EngineError::Device(DeviceError::Format(format!(
        "no output config matches {}Hz x{}ch f32",
        requested_rate, requested_channels
    ))))
}

/// An opened (but possibly not yet started) cpal output stream, optionally
/// paired with an input stream whose captured samples are bridged into the
/// output callback through an internal ring buffer (§4.2 duplex open).
pub struct CpalAdapter {
    device: Device,
    stream_config: StreamConfig,
    sample_format: SampleFormat,
    frames_per_buffer: u32,
    input: Option<(Device, StreamConfig, SampleFormat)>,
    callback: Option<DeviceCallback>,
    on_stream_error: Option<StreamErrorCallback>,
    stream: Option<Stream>,
    input_stream: Option<Stream>,
    last_callback_at: Option<Instant>,
}

impl DeviceAdapter for CpalAdapter {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let mut callback = self
            .callback
            .take()
            .expect("start() called more than once without a fresh callback");
        let on_error = self
            .on_stream_error
            .take()
            .expect("start() called more than once without a fresh error handler");

        let channels = self.stream_config.channels as usize;
        let err_channels = channels;

        // Input capture runs on its own cpal-driven thread with its own
        // callback cadence; bridge it into the output callback through the
        // same lock-free SPSC ring the pump uses for the device-facing rings
        // (§4.1), rather than trying to synchronize two independent hardware
        // clocks directly.
        let mut input_bridge: Option<(RingConsumer, Vec<f32>)> = None;
        let input_stream = match &self.input {
            Some((input_device, input_stream_config, input_sample_format)) => {
                let ring = sized_for(self.frames_per_buffer, input_stream_config.channels as u32);
                let (mut producer, consumer) = ring.split();
                let scratch = vec![0.0f32; self.frames_per_buffer as usize * input_stream_config.channels as usize];
                input_bridge = Some((consumer, scratch));

                let input_err_channels = input_stream_config.channels;
                let stream = match input_sample_format {
                    SampleFormat::F32 => input_device
                        .build_input_stream(
                            input_stream_config,
                            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                                producer.write(data);
                            },
                            move |err| {
                                warn!("cpal input stream error ({input_err_channels}ch): {err}");
                            },
                            None,
                        )
                        .map_err(|e| {
                            EngineError::Device(DeviceError::Internal(format!(
                                "failed to build input stream: {e}"
                            )))
                        })?,
                    other => {
                        return Err(EngineError::Device(DeviceError::Format(format!(
                            "unsupported input sample format: {other:?}"
                        ))))
                    }
                };
                stream.play().map_err(|e| {
                    EngineError::Device(DeviceError::Internal(format!(
                        "failed to start input stream: {e}"
                    )))
                })?;
                Some(stream)
            }
            None => None,
        };

        let stream = match self.sample_format {
            SampleFormat::F32 => self
                .device
                .build_output_stream(
                    &self.stream_config,
                    move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                        let frame_count = data.len() / channels.max(1);
                        match input_bridge.as_mut() {
                            Some((consumer, scratch)) => {
                                let read = consumer.read(scratch);
                                if read < scratch.len() {
                                    scratch[read..].fill(0.0);
                                }
                                callback(scratch, data, frame_count);
                            }
                            None => callback(&[], data, frame_count),
                        }
                    },
                    move |err| on_error(format!("cpal stream error ({err_channels}ch): {err}")),
                    None,
                )
                .map_err(|e| {
                    EngineError::Device(DeviceError::Internal(format!(
                        "failed to build output stream: {e}"
                    )))
                })?,
            other => {
                return Err(EngineError::Device(DeviceError::Format(format!(
                    "unsupported sample format: {other:?}"
                ))))
            }
        };

        stream.play().map_err(|e| {
            EngineError::Device(DeviceError::Internal(format!(
                "failed to start stream: {e}"
            )))
        })?;

        self.last_callback_at = Some(Instant::now());
        self.stream = Some(stream);
        self.input_stream = input_stream;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.input_stream.take() {
            stream.pause().map_err(|e| {
                EngineError::Device(DeviceError::Internal(format!(
                    "failed to pause input stream: {e}"
                )))
            })?;
        }
        if let Some(stream) = self.stream.take() {
            stream.pause().map_err(|e| {
                EngineError::Device(DeviceError::Internal(format!(
                    "failed to pause stream: {e}"
                )))
            })?;
        }
        Ok(())
    }

    fn negotiated_sample_rate(&self) -> u32 {
        self.stream_config.sample_rate.0
    }

    fn negotiated_channels(&self) -> u32 {
        self.stream_config.channels as u32
    }
}

impl Drop for CpalAdapter {
    fn drop(&mut self) {
        if let Some(stream) = self.input_stream.take() {
            let _ = stream.pause();
        }
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
    }
}

/// Measures the wall-clock interval between successive calls and reports
/// whether it exceeds the expected per-buffer period by more than `factor`,
/// grounding the `CallbackIrregular` event of §4.2/§6.
pub struct CallbackIntervalMonitor {
    expected: Duration,
    factor: f64,
    last: Option<Instant>,
}

impl CallbackIntervalMonitor {
    pub fn new(frames_per_buffer: u32, sample_rate: u32, factor: f64) -> Self {
        let expected_secs = frames_per_buffer as f64 / sample_rate as f64;
        Self {
            expected: Duration::from_secs_f64(expected_secs),
            factor,
            last: None,
        }
    }

    /// Expected steady-state interval between callbacks, in milliseconds.
    pub fn expected_ms(&self) -> f64 {
        self.expected.as_secs_f64() * 1000.0
    }

    /// Call once per device callback invocation. Returns `Some(observed)` if
    /// this interval was irregular.
    pub fn observe(&mut self) -> Option<Duration> {
        let now = Instant::now();
        let previous = self.last.replace(now);
        match previous {
            Some(prev) => {
                let observed = now.duration_since(prev);
                if observed.as_secs_f64() > self.expected.as_secs_f64() * self.factor {
                    warn!(
                        "device callback interval irregular: expected ~{:?}, observed {:?}",
                        self.expected, observed
                    );
                    Some(observed)
                } else {
                    None
                }
            }
            None => None,
        }
    }
}
