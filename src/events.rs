//! Event system for the audio engine.
//!
//! Per §9 Design Notes, events/delegates are a small set of typed callback
//! slots stored on the engine rather than a general pub/sub bus: subscription
//! is register/unregister by handle. Unlike a raw synchronous callback,
//! `emit` never runs listener code on the emitting thread directly — it
//! pushes onto a bounded channel drained by a dedicated, non-realtime
//! dispatch thread, so a slow listener can never stall the mix thread or the
//! device callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use uuid::Uuid;

/// Events emitted by the engine (§6, §9).
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The pump could not place samples into the output ring within its
    /// bounded wait; samples were dropped. Named distinctly from
    /// `DeviceUnderrun` per the §9 open question on naming.
    RingOverflow { dropped_frames: u32 },

    /// Deprecated alias of `RingOverflow`, emitted alongside it for callers
    /// still expecting the source repository's historical event name.
    BufferUnderrunLegacyAlias { dropped_frames: u32 },

    /// The device callback found fewer samples in the output ring than it
    /// needed and substituted silence.
    DeviceUnderrun { missing_frames: u32 },

    /// A clock-bound source could not satisfy `read_at` for this buffer.
    TrackDropout {
        source_id: Uuid,
        source_kind_name: &'static str,
        master_timestamp: f64,
        master_sample_position: u64,
        missed_frames: u32,
        reason: String,
    },

    /// Any other source read failure, isolated to one buffer.
    SourceError { source_id: Uuid, reason: String },

    /// An effect failed to process; the effect was skipped for one buffer.
    EffectError { effect_name: String, reason: String },

    /// The output device was lost mid-stream (host error callback fired).
    DeviceLost { reason: String },

    /// A later reopen on the same config succeeded after `DeviceLost`.
    DeviceRestored,

    /// Measured interval between device callbacks exceeded the expected
    /// period by a wide margin, suggesting host scheduling pressure.
    CallbackIrregular { expected_ms: f64, observed_ms: f64 },

    /// Writing the mixdown file failed; recording was stopped.
    RecordingError { reason: String },

    /// Unrecoverable device-adapter failure; the engine transitioned to Stopped.
    EngineFatal { reason: String },
}

/// Opaque handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

type Listener = Box<dyn Fn(&EngineEvent) + Send + 'static>;

struct Subscriber {
    handle: SubscriptionHandle,
    listener: Listener,
}

/// Central event bus: a bounded mpsc channel fed by `emit`/`emit_lossy`, with
/// a dedicated thread draining it and fanning out to registered listeners.
///
/// Grounded on the teacher's `wkmp_common::events::EventBus` (a thin wrapper
/// around a channel exposing `subscribe`/`emit`/`emit_lossy`/`subscriber_count`),
/// reshaped from a multi-consumer broadcast bus into a register-by-handle
/// callback registry dispatched off a single background thread, matching the
/// "dispatching from a non-realtime thread" requirement of §9.
pub struct EventBus {
    tx: Sender<EngineEvent>,
    next_handle: Arc<AtomicU64>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    _dispatch_thread: JoinHandle<()>,
}

impl EventBus {
    /// Spawn the bus and its dispatch thread.
    pub fn new() -> Self {
        let (tx, rx): (Sender<EngineEvent>, Receiver<EngineEvent>) = mpsc::channel();
        let subscribers: Arc<Mutex<Vec<Subscriber>>> = Arc::new(Mutex::new(Vec::new()));
        let dispatch_subscribers = Arc::clone(&subscribers);

        let dispatch_thread = std::thread::Builder::new()
            .name("audio-engine-events".into())
            .spawn(move || loop {
                match rx.recv() {
                    Ok(event) => {
                        let subs = dispatch_subscribers.lock().unwrap();
                        for sub in subs.iter() {
                            (sub.listener)(&event);
                        }
                    }
                    Err(_) => break, // all senders dropped
                }
            })
            .expect("failed to spawn event dispatch thread");

        Self {
            tx,
            next_handle: Arc::new(AtomicU64::new(1)),
            subscribers,
            _dispatch_thread: dispatch_thread,
        }
    }

    /// Register a listener; returns a handle usable with [`Self::unsubscribe`].
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&EngineEvent) + Send + 'static,
    {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().unwrap().push(Subscriber {
            handle,
            listener: Box::new(listener),
        });
        handle
    }

    /// Remove a previously registered listener. No-op if already removed.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscribers.lock().unwrap().retain(|s| s.handle != handle);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Emit an event. Never blocks the caller on listener execution; the
    /// event is handed off to the dispatch thread's queue.
    ///
    /// Callable from the mix thread or the device callback: the channel send
    /// itself only allocates a queue node and signals the dispatch thread, it
    /// does not run listener code inline.
    pub fn emit(&self, event: EngineEvent) {
        // An error here means the dispatch thread has exited (engine
        // disposed); dropping the event is correct at that point.
        let _ = self.tx.send(event);
    }

    /// Alias of `emit` kept for symmetry with the teacher's `emit_lossy`; this
    /// bus is always lossy from the emitter's point of view once queued.
    pub fn emit_lossy(&self, event: EngineEvent) {
        self.emit(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
