//! Engine pump (§4.3).
//!
//! Bridges the device callback (realtime thread) to the mix engine
//! (near-realtime thread) via the two rings from §4.1. Owns no sources or
//! decoders. Grounded on the teacher's habit (`playback::ring_buffer`) of
//! pairing a ring with atomic overrun/underrun counters, generalized to the
//! device-adapter-owning bridge object §4.3 describes, which the teacher
//! does not have a direct analogue for.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::AudioConfig;
use crate::device::cpal_adapter::CallbackIntervalMonitor;
use crate::device::{DeviceAdapter, DeviceHost};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::ring_buffer::{sized_for, RingConsumer, RingProducer};

/// Total span of short sleeps `send` performs before giving up on a full
/// output ring and dropping the remainder of the span (§9 decision).
const SEND_BOUNDED_WAIT: Duration = Duration::from_millis(20);
const SEND_RETRY_INTERVAL: Duration = Duration::from_millis(1);

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;
const STATE_DISPOSED: u8 = 3;

/// Pump lifecycle (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Created,
    Running,
    Stopped,
    Disposed,
}

fn state_from_u8(v: u8) -> PumpState {
    match v {
        STATE_RUNNING => PumpState::Running,
        STATE_STOPPED => PumpState::Stopped,
        STATE_DISPOSED => PumpState::Disposed,
        _ => PumpState::Created,
    }
}

/// Bridges the device callback thread to the mix thread through the output
/// and input rings; owns the opened device adapter.
pub struct EnginePump<H: DeviceHost> {
    // Wrapped in a mutex (rather than a bare field) purely so `EnginePump`'s
    // Send/Sync auto-derivation doesn't depend on the host backend type's
    // own Send/Sync status; `open()` is only ever called once, from
    // `start()`.
    host: Mutex<H>,
    config: AudioConfig,
    events: Arc<EventBus>,
    state: AtomicU8,

    adapter: Mutex<Option<H::Adapter>>,

    // Mix-thread side of the output ring (silence -> device).
    output_producer: Mutex<RingProducer>,
    // Taken by `start()` and moved into the device callback closure.
    output_consumer: Mutex<Option<RingConsumer>>,

    // Mix-thread side of the input ring (device -> recorded/metered input).
    input_consumer: Mutex<RingConsumer>,
    input_producer: Mutex<Option<RingProducer>>,

    prebuffer_threshold: usize,
    primed: Arc<AtomicBool>,

    total_pumped_frames: Arc<AtomicU64>,
    total_underruns: Arc<AtomicU64>,
    total_overflows: Arc<AtomicU64>,
}

impl<H: DeviceHost> EnginePump<H> {
    pub fn new(host: H, config: AudioConfig, events: Arc<EventBus>) -> Self {
        let output_ring = sized_for(config.frames_per_buffer, config.channels);
        let input_ring = sized_for(config.frames_per_buffer, config.channels);
        let (output_producer, output_consumer) = output_ring.split();
        let (input_producer, input_consumer) = input_ring.split();

        Self {
            host: Mutex::new(host),
            prebuffer_threshold: config.frames_per_buffer as usize * config.channels as usize * 2,
            config,
            events,
            state: AtomicU8::new(STATE_CREATED),
            adapter: Mutex::new(None),
            output_producer: Mutex::new(output_producer),
            output_consumer: Mutex::new(Some(output_consumer)),
            input_consumer: Mutex::new(input_consumer),
            input_producer: Mutex::new(Some(input_producer)),
            primed: Arc::new(AtomicBool::new(false)),
            total_pumped_frames: Arc::new(AtomicU64::new(0)),
            total_underruns: Arc::new(AtomicU64::new(0)),
            total_overflows: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> PumpState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn total_pumped_frames(&self) -> u64 {
        self.total_pumped_frames.load(Ordering::Relaxed)
    }

    pub fn total_underruns(&self) -> u64 {
        self.total_underruns.load(Ordering::Relaxed)
    }

    pub fn total_overflows(&self) -> u64 {
        self.total_overflows.load(Ordering::Relaxed)
    }

    /// Open the device if not already open, prime the output ring with one
    /// buffer of silence, and transition to `Running`.
    pub fn start(&self) -> Result<()> {
        if self.state() == PumpState::Running {
            return Ok(());
        }
        if self.state() == PumpState::Disposed {
            return Err(EngineError::Disposed);
        }

        {
            let mut producer = self.output_producer.lock().unwrap();
            let silence = vec![0.0f32; self.config.frames_per_buffer as usize * self.config.channels as usize];
            producer.write(&silence);
        }
        self.primed.store(false, Ordering::Release);

        let output_consumer = self
            .output_consumer
            .lock()
            .unwrap()
            .take()
            .expect("pump started twice without a fresh output consumer");
        let input_producer = self
            .input_producer
            .lock()
            .unwrap()
            .take()
            .expect("pump started twice without a fresh input producer");

        let adapter = self.build_adapter(output_consumer, input_producer)?;

        let mut adapter_slot = self.adapter.lock().unwrap();
        *adapter_slot = Some(adapter);
        adapter_slot.as_mut().unwrap().start()?;

        self.state.store(STATE_RUNNING, Ordering::Release);
        info!("engine pump started");
        Ok(())
    }

    fn build_adapter(
        &self,
        mut output_consumer: RingConsumer,
        mut input_producer: RingProducer,
    ) -> Result<H::Adapter> {
        let channels = self.config.channels as usize;
        let prebuffer_threshold = self.prebuffer_threshold;
        let primed = Arc::clone(&self.primed);
        let total_pumped_frames = Arc::clone(&self.total_pumped_frames);
        let total_underruns = Arc::clone(&self.total_underruns);
        let events_for_callback = Arc::clone(&self.events);
        let mut interval_monitor = CallbackIntervalMonitor::new(
            self.config.frames_per_buffer,
            self.config.sample_rate,
            4.0,
        );

        let callback = Box::new(move |input: &[f32], output: &mut [f32], _frame_count: usize| {
            if let Some(observed) = interval_monitor.observe() {
                events_for_callback.emit(EngineEvent::CallbackIrregular {
                    expected_ms: interval_monitor.expected_ms(),
                    observed_ms: observed.as_secs_f64() * 1000.0,
                });
            }

            if !input.is_empty() {
                input_producer.write(input);
            }

            if !primed.load(Ordering::Acquire) {
                if output_consumer.available_read() >= prebuffer_threshold {
                    primed.store(true, Ordering::Release);
                } else {
                    output.fill(0.0);
                    return;
                }
            }

            let read = output_consumer.read(output);
            if read < output.len() {
                output[read..].fill(0.0);
                let missing = (output.len() - read) as u32;
                total_underruns.fetch_add(1, Ordering::Relaxed);
                events_for_callback.emit(EngineEvent::DeviceUnderrun {
                    missing_frames: missing / channels.max(1) as u32,
                });
            }
            total_pumped_frames.fetch_add((read / channels.max(1)) as u64, Ordering::Relaxed);
        });

        let events_for_error = Arc::clone(&self.events);
        let on_stream_error = Box::new(move |reason: String| {
            warn!("device stream error: {reason}");
            events_for_error.emit(EngineEvent::DeviceLost { reason });
        });

        self.host
            .lock()
            .unwrap()
            .open(&self.config, callback, on_stream_error)
    }

    /// Blocking producer: write `samples` into the output ring. If the ring
    /// is full, sleep for a short interval and retry, up to a bounded total
    /// wait, then drop the remainder and emit `RingOverflow`.
    pub fn send(&self, samples: &[f32]) {
        let mut producer = self.output_producer.lock().unwrap();
        let mut offset = 0;
        let mut waited = Duration::ZERO;

        loop {
            let written = producer.write(&samples[offset..]);
            offset += written;
            if offset >= samples.len() {
                return;
            }
            if waited >= SEND_BOUNDED_WAIT {
                let dropped = (samples.len() - offset) as u32;
                self.total_overflows.fetch_add(1, Ordering::Relaxed);
                self.events.emit(EngineEvent::RingOverflow {
                    dropped_frames: dropped,
                });
                self.events.emit(EngineEvent::BufferUnderrunLegacyAlias {
                    dropped_frames: dropped,
                });
                return;
            }
            drop(producer);
            thread::sleep(SEND_RETRY_INTERVAL);
            waited += SEND_RETRY_INTERVAL;
            producer = self.output_producer.lock().unwrap();
        }
    }

    /// Nonblocking consumer of the input ring; returns silence of
    /// `frames_per_buffer * channels` after a short wait if no data is
    /// available.
    pub fn receive(&self) -> Vec<f32> {
        let frame_len = self.config.frames_per_buffer as usize * self.config.channels as usize;
        let mut buf = vec![0.0f32; frame_len];
        let mut consumer = self.input_consumer.lock().unwrap();
        if consumer.available_read() == 0 {
            drop(consumer);
            thread::sleep(Duration::from_micros(500));
            consumer = self.input_consumer.lock().unwrap();
        }
        consumer.read(&mut buf);
        buf
    }

    /// Consumer-side clear of the output ring; used after measurement passes
    /// or abrupt stops.
    pub fn clear_output_buffer(&self) {
        // Can't clear the consumer half directly once moved into the device
        // callback; instead we drain what the producer can see as occupied
        // by writing silence is not correct, so this is only meaningful
        // before `start()` or after `stop()` reclaims the consumer.
        if let Some(consumer) = self.output_consumer.lock().unwrap().as_mut() {
            consumer.clear();
        }
    }

    pub fn stop(&self) -> Result<()> {
        if self.state() != PumpState::Running {
            return Ok(());
        }
        if let Some(adapter) = self.adapter.lock().unwrap().as_mut() {
            adapter.stop()?;
        }
        self.state.store(STATE_STOPPED, Ordering::Release);
        info!("engine pump stopped");
        Ok(())
    }

    pub fn dispose(&self) {
        let _ = self.stop();
        self.state.store(STATE_DISPOSED, Ordering::Release);
    }
}
