//! Mix engine (§4.8).
//!
//! The orchestrator thread: reads sources against the master clock, sums
//! them, applies master volume, runs master effects, records, pushes to the
//! pump, advances the clock. Grounded on the teacher's `playback::mixer`
//! (dedicated mix thread, `MixerState` enum, position-marker/event
//! scheduling) for the thread-and-state-machine shape, generalized from the
//! teacher's fixed two-stream crossfade pipeline to an arbitrary-N
//! heterogeneous source set per §4.8's loop contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{ClockMode, MasterClock};
use crate::config::AudioConfig;
use crate::device::DeviceHost;
use crate::error::{EngineError, Result, SourceError};
use crate::events::{EngineEvent, EventBus};
use crate::pump::EnginePump;
use crate::source::effects::EffectChain;
use crate::source::{AudioSource, ClockBoundSource, SourceState};
use crate::wav_writer::WaveFileWriter;

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_PAUSED: u8 = 2;
const STATE_STOPPED: u8 = 3;
const STATE_DISPOSED: u8 = 4;

/// Additive mix-into-buffer and scalar-gain hot paths (§9 "SIMD hot paths").
/// Both are embarrassingly elementwise, so the `simd` feature path and the
/// scalar fallback are required to be bit-identical modulo float rounding.
/// Per-channel peak tracking stays scalar in both builds: it needs a
/// per-lane stride keyed off `channels`, which doesn't map onto a fixed-width
/// SIMD vector without deinterleaving into a scratch buffer, and the mix
/// loop's hot path is zero-allocation (§5).
#[cfg(feature = "simd")]
mod hot_path {
    use std::simd::f32x8;

    const LANES: usize = 8;

    pub fn accumulate(mix_buffer: &mut [f32], scratch: &[f32]) {
        let chunks = mix_buffer.len() / LANES;
        for i in 0..chunks {
            let base = i * LANES;
            let m = f32x8::from_slice(&mix_buffer[base..base + LANES]);
            let s = f32x8::from_slice(&scratch[base..base + LANES]);
            (m + s).copy_to_slice(&mut mix_buffer[base..base + LANES]);
        }
        for i in (chunks * LANES)..mix_buffer.len() {
            mix_buffer[i] += scratch[i];
        }
    }

    pub fn scale(buf: &mut [f32], volume: f32) {
        let chunks = buf.len() / LANES;
        let v = f32x8::splat(volume);
        for i in 0..chunks {
            let base = i * LANES;
            let b = f32x8::from_slice(&buf[base..base + LANES]);
            (b * v).copy_to_slice(&mut buf[base..base + LANES]);
        }
        for i in (chunks * LANES)..buf.len() {
            buf[i] *= volume;
        }
    }
}

#[cfg(not(feature = "simd"))]
mod hot_path {
    pub fn accumulate(mix_buffer: &mut [f32], scratch: &[f32]) {
        for (m, s) in mix_buffer.iter_mut().zip(scratch.iter()) {
            *m += *s;
        }
    }

    pub fn scale(buf: &mut [f32], volume: f32) {
        for s in buf.iter_mut() {
            *s *= volume;
        }
    }
}

/// Mix-engine lifecycle (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerLifecycle {
    Created,
    Running,
    Paused,
    Stopped,
    Disposed,
}

fn lifecycle_from_u8(v: u8) -> MixerLifecycle {
    match v {
        STATE_RUNNING => MixerLifecycle::Running,
        STATE_PAUSED => MixerLifecycle::Paused,
        STATE_STOPPED => MixerLifecycle::Stopped,
        STATE_DISPOSED => MixerLifecycle::Disposed,
        _ => MixerLifecycle::Created,
    }
}

enum RegisteredSource {
    Clock(Arc<dyn ClockBoundSource>),
    Legacy(Arc<dyn AudioSource>),
}

impl RegisteredSource {
    fn id(&self) -> Uuid {
        match self {
            RegisteredSource::Clock(s) => s.id(),
            RegisteredSource::Legacy(s) => s.id(),
        }
    }

    fn state(&self) -> SourceState {
        match self {
            RegisteredSource::Clock(s) => s.state(),
            RegisteredSource::Legacy(s) => s.state(),
        }
    }
}

struct SourceSet {
    sources: Mutex<HashMap<Uuid, RegisteredSource>>,
    /// Insertion order, preserved for the bit-reproducibility guarantee of
    /// §4.8 ("this pins the iteration order per session to the insertion
    /// order of the snapshot").
    order: Mutex<Vec<Uuid>>,
    dirty: AtomicBool,
    snapshot: Mutex<Arc<Vec<Uuid>>>,
}

impl SourceSet {
    fn new() -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            dirty: AtomicBool::new(false),
            snapshot: Mutex::new(Arc::new(Vec::new())),
        }
    }

    fn len(&self) -> usize {
        self.sources.lock().unwrap().len()
    }

    fn insert(&self, source: RegisteredSource, max_sources: usize) -> Result<()> {
        let mut sources = self.sources.lock().unwrap();
        if sources.len() >= max_sources {
            return Err(EngineError::LimitExceeded { max: max_sources });
        }
        let id = source.id();
        sources.insert(id, source);
        self.order.lock().unwrap().push(id);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn remove(&self, id: Uuid) {
        self.sources.lock().unwrap().remove(&id);
        self.order.lock().unwrap().retain(|existing| *existing != id);
        self.dirty.store(true, Ordering::Release);
    }

    fn clear(&self) {
        self.sources.lock().unwrap().clear();
        self.order.lock().unwrap().clear();
        self.dirty.store(true, Ordering::Release);
    }

    fn refresh_snapshot_if_dirty(&self) -> Arc<Vec<Uuid>> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            let fresh = self.order.lock().unwrap().clone();
            let arc = Arc::new(fresh);
            *self.snapshot.lock().unwrap() = Arc::clone(&arc);
            arc
        } else {
            self.snapshot.lock().unwrap().clone()
        }
    }
}

/// Aggregate mixer counters and peaks (§3 `MixerState`), exposed read-only.
pub struct MixerStats {
    pub total_mixed_frames: AtomicU64,
    pub total_underruns: AtomicU64,
    left_peak_bits: AtomicU32,
    right_peak_bits: AtomicU32,
}

impl MixerStats {
    fn new() -> Self {
        Self {
            total_mixed_frames: AtomicU64::new(0),
            total_underruns: AtomicU64::new(0),
            left_peak_bits: AtomicU32::new(0),
            right_peak_bits: AtomicU32::new(0),
        }
    }

    pub fn left_peak(&self) -> f32 {
        f32::from_bits(self.left_peak_bits.load(Ordering::Relaxed))
    }

    pub fn right_peak(&self) -> f32 {
        f32::from_bits(self.right_peak_bits.load(Ordering::Relaxed))
    }
}

struct PauseGate {
    paused: Mutex<bool>,
    condvar: Condvar,
}

impl PauseGate {
    fn new() -> Self {
        Self {
            paused: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn set_paused(&self, paused: bool) {
        *self.paused.lock().unwrap() = paused;
        if !paused {
            self.condvar.notify_all();
        }
    }

    fn wait_while_paused(&self, stop: &AtomicBool) {
        let mut guard = self.paused.lock().unwrap();
        while *guard && !stop.load(Ordering::Relaxed) {
            let (next, _) = self
                .condvar
                .wait_timeout(guard, Duration::from_millis(100))
                .unwrap();
            guard = next;
        }
    }
}

/// The mix engine (§4.8): owns the master clock, master effect chain,
/// recorder handle, and strong references to all registered sources.
pub struct Mixer<H: DeviceHost + Send + 'static>
where
    H::Adapter: 'static,
{
    pump: Arc<EnginePump<H>>,
    clock: Arc<MasterClock>,
    events: Arc<EventBus>,
    config: AudioConfig,

    sources: Arc<SourceSet>,
    master_chain: Arc<EffectChain>,
    master_volume_bits: Arc<AtomicU32>,
    stats: Arc<MixerStats>,

    recorder: Arc<Mutex<Option<WaveFileWriter>>>,

    state: Arc<AtomicU8>,
    pause_gate: Arc<PauseGate>,
    stop_flag: Arc<AtomicBool>,
    mix_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<H: DeviceHost + Send + 'static> Mixer<H>
where
    H::Adapter: 'static,
{
    pub fn new(pump: Arc<EnginePump<H>>, clock: Arc<MasterClock>, events: Arc<EventBus>, config: AudioConfig) -> Self {
        Self {
            pump,
            clock,
            events,
            config,
            sources: Arc::new(SourceSet::new()),
            master_chain: Arc::new(EffectChain::new()),
            master_volume_bits: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            stats: Arc::new(MixerStats::new()),
            recorder: Arc::new(Mutex::new(None)),
            state: Arc::new(AtomicU8::new(STATE_CREATED)),
            pause_gate: Arc::new(PauseGate::new()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            mix_thread: Mutex::new(None),
        }
    }

    pub fn state(&self) -> MixerLifecycle {
        lifecycle_from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn add_clock_bound_source(&self, source: Arc<dyn ClockBoundSource>) -> Result<()> {
        self.sources
            .insert(RegisteredSource::Clock(source), self.config.max_audio_sources)
    }

    pub fn add_legacy_source(&self, source: Arc<dyn AudioSource>) -> Result<()> {
        self.sources
            .insert(RegisteredSource::Legacy(source), self.config.max_audio_sources)
    }

    pub fn remove_source(&self, id: Uuid) {
        self.sources.remove(id);
    }

    pub fn clear_sources(&self) {
        self.sources.clear();
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn master_effects(&self) -> &EffectChain {
        &self.master_chain
    }

    pub fn master_volume(&self) -> f32 {
        f32::from_bits(self.master_volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.master_volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn left_peak(&self) -> f32 {
        self.stats.left_peak()
    }

    pub fn right_peak(&self) -> f32 {
        self.stats.right_peak()
    }

    pub fn total_mixed_frames(&self) -> u64 {
        self.stats.total_mixed_frames.load(Ordering::Relaxed)
    }

    pub fn total_underruns(&self) -> u64 {
        self.stats.total_underruns.load(Ordering::Relaxed)
    }

    pub fn master_clock(&self) -> &Arc<MasterClock> {
        &self.clock
    }

    pub fn start_recording(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let writer = WaveFileWriter::create(path, self.config.sample_rate, self.config.channels)?;
        *self.recorder.lock().unwrap() = Some(writer);
        Ok(())
    }

    /// Closes the writer even if it must drop in-flight writes (§5).
    pub fn stop_recording(&self) -> Result<()> {
        if let Some(writer) = self.recorder.lock().unwrap().take() {
            writer.close()?;
        }
        Ok(())
    }

    /// Spawn the dedicated mix thread and transition to `Running`.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.state() == MixerLifecycle::Running {
            return Ok(());
        }
        self.pump.start()?;
        self.stop_flag.store(false, Ordering::Relaxed);
        self.pause_gate.set_paused(false);

        let mixer = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("audio-engine-mix".into())
            .spawn(move || mixer.mix_loop())
            .expect("failed to spawn mix thread");
        *self.mix_thread.lock().unwrap() = Some(handle);

        self.state.store(STATE_RUNNING, Ordering::Release);
        info!("mix engine started");
        Ok(())
    }

    pub fn pause(&self) {
        self.pause_gate.set_paused(true);
        self.state.store(STATE_PAUSED, Ordering::Release);
    }

    pub fn resume(&self) {
        self.pause_gate.set_paused(false);
        self.state.store(STATE_RUNNING, Ordering::Release);
    }

    /// Joins the mix thread within a bounded timeout (~2s) and stops all
    /// registered sources best-effort (§4.8).
    pub fn stop(&self) -> Result<()> {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.pause_gate.set_paused(false);

        if let Some(handle) = self.mix_thread.lock().unwrap().take() {
            let (tx, rx) = std::sync::mpsc::channel();
            thread::spawn(move || {
                let _ = handle.join();
                let _ = tx.send(());
            });
            if rx.recv_timeout(Duration::from_secs(2)).is_err() {
                warn!("mix thread did not exit within 2s; abandoning join");
            }
        }

        for (_, source) in self.sources.sources.lock().unwrap().iter() {
            let _ = match source {
                RegisteredSource::Clock(s) => s.stop(),
                RegisteredSource::Legacy(s) => s.stop(),
            };
        }

        self.pump.stop()?;
        self.state.store(STATE_STOPPED, Ordering::Release);
        info!("mix engine stopped");
        Ok(())
    }

    pub fn dispose(&self) {
        let _ = self.stop();
        self.state.store(STATE_DISPOSED, Ordering::Release);
        self.pump.dispose();
    }

    fn mix_loop(&self) {
        let frames_per_buffer = self.config.frames_per_buffer as usize;
        let channels = self.config.channels as usize;
        let mix_buffer_len = frames_per_buffer * channels;
        let mut mix_buffer = vec![0.0f32; mix_buffer_len];
        let mut scratch = vec![0.0f32; mix_buffer_len];

        while !self.stop_flag.load(Ordering::Relaxed) {
            self.pause_gate.wait_while_paused(&self.stop_flag);
            if self.stop_flag.load(Ordering::Relaxed) {
                break;
            }

            let snapshot = self.sources.refresh_snapshot_if_dirty();
            let offline = self.clock.mode() == ClockMode::Offline;

            mix_buffer.iter_mut().for_each(|s| *s = 0.0);
            let timestamp = self.clock.current_timestamp();
            let session = self.clock.session();
            let mut any_produced = false;
            let mut fatal_timeout = false;

            let sources = self.sources.sources.lock().unwrap();
            for id in snapshot.iter() {
                if fatal_timeout {
                    break;
                }
                let Some(source) = sources.get(id) else {
                    continue;
                };
                if source.state() != SourceState::Playing {
                    continue;
                }

                scratch.iter_mut().for_each(|s| *s = 0.0);

                match source {
                    RegisteredSource::Clock(clock_source) => {
                        let mut result = clock_source.read_at(timestamp, session, &mut scratch, frames_per_buffer);

                        // Offline mode trades the realtime non-blocking
                        // dropout rule for a bounded blocking wait: keep
                        // re-polling the source until it catches up or the
                        // per-source timeout elapses, at which point the
                        // buffer is a hard error (§4.4, §4.5, §9).
                        if offline && !result.completed && result.error.as_deref() == Some("underrun") {
                            let wait_start = Instant::now();
                            let timeout = Duration::from_secs_f64(self.config.offline_source_timeout_secs);
                            loop {
                                if wait_start.elapsed() >= timeout {
                                    let err = EngineError::Source(SourceError::OfflineTimeout {
                                        source_id: clock_source.id(),
                                        timeout_secs: self.config.offline_source_timeout_secs,
                                    });
                                    warn!("offline-mode source wait timed out: {err}");
                                    self.events.emit(EngineEvent::EngineFatal { reason: err.to_string() });
                                    fatal_timeout = true;
                                    break;
                                }
                                thread::sleep(Duration::from_millis(5));
                                scratch.iter_mut().for_each(|s| *s = 0.0);
                                result = clock_source.read_at(timestamp, session, &mut scratch, frames_per_buffer);
                                if result.completed || result.error.as_deref() != Some("underrun") {
                                    break;
                                }
                            }
                        }

                        if fatal_timeout {
                            break;
                        }

                        any_produced = true;
                        hot_path::accumulate(&mut mix_buffer, &scratch);
                        if !result.completed {
                            self.events.emit(EngineEvent::TrackDropout {
                                source_id: clock_source.id(),
                                source_kind_name: "ClockBoundSource",
                                master_timestamp: timestamp,
                                master_sample_position: self.clock.current_sample_position(),
                                missed_frames: (frames_per_buffer - result.copied_frames) as u32,
                                reason: result.error.unwrap_or_default(),
                            });
                        }
                    }
                    RegisteredSource::Legacy(legacy_source) => match legacy_source.read(&mut scratch, frames_per_buffer) {
                        Ok(read) => {
                            any_produced = true;
                            let n = (read * channels).min(mix_buffer.len());
                            hot_path::accumulate(&mut mix_buffer[..n], &scratch[..n]);
                        }
                        Err(e) => {
                            self.events.emit(EngineEvent::SourceError {
                                source_id: legacy_source.id(),
                                reason: e.to_string(),
                            });
                        }
                    },
                }
            }
            drop(sources);

            if fatal_timeout {
                self.state.store(STATE_STOPPED, Ordering::Release);
                self.stop_flag.store(true, Ordering::Relaxed);
                break;
            }

            if any_produced {
                let volume = self.master_volume();
                if (volume - 1.0).abs() >= 1e-3 {
                    hot_path::scale(&mut mix_buffer, volume);
                }

                self.master_chain.process(&mut mix_buffer, self.config.channels);

                let mut left_peak = 0.0f32;
                let mut right_peak = 0.0f32;
                for (i, sample) in mix_buffer.iter().enumerate() {
                    let abs = sample.abs();
                    if channels >= 2 && i % channels == 1 {
                        right_peak = right_peak.max(abs);
                    } else {
                        left_peak = left_peak.max(abs);
                    }
                }
                self.stats.left_peak_bits.store(left_peak.to_bits(), Ordering::Relaxed);
                self.stats.right_peak_bits.store(right_peak.to_bits(), Ordering::Relaxed);

                let mut recorder = self.recorder.lock().unwrap();
                if let Some(writer) = recorder.as_mut() {
                    if let Err(e) = writer.write_samples(&mix_buffer) {
                        warn!("mixdown write failed, stopping recording: {e}");
                        self.events.emit(EngineEvent::RecordingError { reason: e.to_string() });
                        *recorder = None;
                    }
                }
            }

            self.pump.send(&mix_buffer);
            self.clock.advance(frames_per_buffer as u64);
            self.stats
                .total_mixed_frames
                .fetch_add(frames_per_buffer as u64, Ordering::Relaxed);
            self.stats
                .total_underruns
                .store(self.pump.total_underruns(), Ordering::Relaxed);
        }
    }
}
