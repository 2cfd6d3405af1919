//! End-to-end seed scenarios (spec §8).

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use audio_engine::{AudioConfig, ClockMode, EngineEvent, EventBus, FileSource, MasterClock, Mixer};
use audio_engine::{AudioSource, ClockBoundSource, EnginePump};

use common::{wait_until, FakeHost, SilentDecoder, SineDecoder};

fn test_config() -> AudioConfig {
    AudioConfig {
        sample_rate: 48_000,
        channels: 2,
        frames_per_buffer: 512,
        enable_input: false,
        enable_output: true,
        output_device_id: None,
        input_device_id: None,
        max_audio_sources: 32,
        offline_source_timeout_secs: 5.0,
    }
}

fn build_mixer(config: AudioConfig) -> Arc<Mixer<FakeHost>> {
    build_mixer_with_events(config).0
}

fn build_mixer_with_events(config: AudioConfig) -> (Arc<Mixer<FakeHost>>, Arc<EventBus>) {
    let events = Arc::new(EventBus::new());
    let clock = Arc::new(MasterClock::new(config.sample_rate, ClockMode::Realtime));
    let pump = Arc::new(EnginePump::new(FakeHost, config.clone(), Arc::clone(&events)));
    let mixer = Arc::new(Mixer::new(pump, clock, Arc::clone(&events), config));
    (mixer, events)
}

/// Scenario 1: single clock-bound sine source, peak amplitude preserved.
#[test]
fn single_source_playback_peak_matches_amplitude() {
    let config = test_config();
    let mixer = build_mixer(config.clone());

    let decoder = SineDecoder::new(440.0, 0.5, config.sample_rate, config.channels, 1.0);
    let source = Arc::new(FileSource::open(config.sample_rate, config.channels, Box::new(decoder)));
    source.play().unwrap();
    mixer.add_clock_bound_source(source).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("single_source.wav");
    mixer.start_recording(&path).unwrap();
    mixer.start().unwrap();

    wait_until(|| mixer.total_mixed_frames() >= 48_000, Duration::from_secs(10));

    mixer.stop().unwrap();
    mixer.stop_recording().unwrap();

    assert!(mixer.total_mixed_frames() >= 48_000);

    let mut reader = hound::WavReader::open(&path).unwrap();
    let peak = reader
        .samples::<f32>()
        .map(|s| s.unwrap().abs())
        .fold(0.0f32, f32::max);
    assert!((peak - 0.5).abs() < 0.05, "peak was {peak}");
}

/// Scenario 5: source overrun past `max_audio_sources`.
#[test]
fn source_overrun_rejects_past_cap() {
    let mut config = test_config();
    config.max_audio_sources = 22;
    let mixer = build_mixer(config.clone());

    let mut sources = Vec::new();
    for _ in 0..22 {
        let source = Arc::new(FileSource::open(
            config.sample_rate,
            config.channels,
            Box::new(SilentDecoder),
        ));
        source.play().unwrap();
        mixer.add_clock_bound_source(Arc::clone(&source) as Arc<dyn ClockBoundSource>).unwrap();
        sources.push(source);
    }
    assert_eq!(mixer.source_count(), 22);

    let extra = Arc::new(FileSource::open(config.sample_rate, config.channels, Box::new(SilentDecoder)));
    let result = mixer.add_clock_bound_source(extra);
    assert!(result.is_err());
    assert_eq!(mixer.source_count(), 22, "rejected source must not be registered");

    mixer.start().unwrap();
    wait_until(|| mixer.total_mixed_frames() >= 4_096, Duration::from_secs(5));
    mixer.stop().unwrap();
}

/// Scenario 3 (simplified): disabling then enabling a master gain effect at
/// runtime changes the recorded peak amplitude without crashing the mix loop.
#[test]
fn master_effect_toggle_changes_output_gain() {
    struct HalfGain;
    impl audio_engine::EffectProcessor for HalfGain {
        fn name(&self) -> &str {
            "half-gain"
        }
        fn process(&self, buf: &mut [f32], _channels: u32) -> audio_engine::Result<()> {
            for s in buf.iter_mut() {
                *s *= 0.5;
            }
            Ok(())
        }
    }

    let config = test_config();
    let mixer = build_mixer(config.clone());

    let decoder = SineDecoder::new(220.0, 0.8, config.sample_rate, config.channels, 2.0);
    let source = Arc::new(FileSource::open(config.sample_rate, config.channels, Box::new(decoder)));
    source.play().unwrap();
    mixer.add_clock_bound_source(source).unwrap();

    mixer.master_effects().add(Arc::new(HalfGain));
    mixer.master_effects().set_enabled("half-gain", false);

    mixer.start().unwrap();
    wait_until(|| mixer.total_mixed_frames() >= 10_000, Duration::from_secs(10));
    let peak_disabled = mixer.left_peak().max(mixer.right_peak());

    mixer.master_effects().set_enabled("half-gain", true);
    wait_until(|| mixer.total_mixed_frames() >= 30_000, Duration::from_secs(10));
    let peak_enabled = mixer.left_peak().max(mixer.right_peak());

    mixer.stop().unwrap();

    assert!(peak_disabled > 0.3, "expected near-full-amplitude peak, got {peak_disabled}");
    assert!(peak_enabled < peak_disabled, "enabling half-gain should lower the peak");
}

/// Scenario 6 (simplified): pausing freezes the master clock's sample
/// position; resuming lets it advance again.
#[test]
fn pause_freezes_master_clock_position() {
    let config = test_config();
    let mixer = build_mixer(config.clone());

    let decoder = SineDecoder::new(330.0, 0.3, config.sample_rate, config.channels, 5.0);
    let source = Arc::new(FileSource::open(config.sample_rate, config.channels, Box::new(decoder)));
    source.play().unwrap();
    mixer.add_clock_bound_source(source).unwrap();

    mixer.start().unwrap();
    wait_until(|| mixer.total_mixed_frames() >= 4_096, Duration::from_secs(10));

    mixer.pause();
    let frozen = mixer.master_clock().current_sample_position();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(mixer.master_clock().current_sample_position(), frozen);

    mixer.resume();
    wait_until(
        || mixer.master_clock().current_sample_position() > frozen,
        Duration::from_secs(5),
    );

    mixer.stop().unwrap();
}

/// Scenario 4 (simplified): seeking the master clock backwards doesn't panic
/// and bumps the seek-session counter clock-bound sources key off of.
#[test]
fn seek_invalidates_clock_bound_sources_without_panicking() {
    let config = test_config();
    let mixer = build_mixer(config.clone());

    let decoder = SineDecoder::new(523.0, 0.4, config.sample_rate, config.channels, 10.0);
    let source = Arc::new(FileSource::open(config.sample_rate, config.channels, Box::new(decoder)));
    source.play().unwrap();
    mixer.add_clock_bound_source(source).unwrap();

    mixer.start().unwrap();
    wait_until(|| mixer.total_mixed_frames() >= 96_000, Duration::from_secs(10));

    let session_before = mixer.master_clock().session();
    mixer.master_clock().seek_to(5.0);
    assert_eq!(mixer.master_clock().session(), session_before + 1);

    wait_until(|| mixer.total_mixed_frames() >= 192_000, Duration::from_secs(10));
    mixer.stop().unwrap();
}

/// A source that never produces enough samples forces a `TrackDropout`
/// event, observed through the mixer's own event bus.
#[test]
fn track_dropout_event_reaches_subscriber() {
    let config = test_config();
    let (mixer, events) = build_mixer_with_events(config.clone());

    let dropouts = Arc::new(AtomicUsize::new(0));
    let dropouts_clone = Arc::clone(&dropouts);
    let nonzero_missed = Arc::new(AtomicUsize::new(0));
    let nonzero_missed_clone = Arc::clone(&nonzero_missed);
    events.subscribe(move |event| {
        if let EngineEvent::TrackDropout { missed_frames, .. } = event {
            dropouts_clone.fetch_add(1, Ordering::SeqCst);
            if *missed_frames > 0 {
                nonzero_missed_clone.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    // A decoder that always underruns: decode-ahead never keeps pace because
    // it sleeps far longer than the mix loop's read cadence.
    struct StallingDecoder;
    impl audio_engine::Decoder for StallingDecoder {
        fn next_chunk(&mut self) -> audio_engine::Result<audio_engine::DecodedChunk> {
            std::thread::sleep(Duration::from_secs(1));
            Ok(audio_engine::DecodedChunk {
                samples: vec![0.0; 8],
                end_of_stream: false,
            })
        }
        fn seek(&mut self, _frame_position: u64) -> audio_engine::Result<()> {
            Ok(())
        }
        fn duration_frames(&self) -> Option<u64> {
            None
        }
    }

    let source = Arc::new(FileSource::open(config.sample_rate, config.channels, Box::new(StallingDecoder)));
    source.play().unwrap();
    mixer.add_clock_bound_source(source).unwrap();

    mixer.start().unwrap();
    wait_until(|| dropouts.load(Ordering::SeqCst) > 0, Duration::from_secs(10));
    mixer.stop().unwrap();

    // Scenario 2: "any dropout produces an event with missed_frames > 0".
    assert!(nonzero_missed.load(Ordering::SeqCst) > 0);
}
