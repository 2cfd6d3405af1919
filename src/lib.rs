//! # Audio Engine
//!
//! Realtime audio playback and mixing engine: decode-ahead clock-bound
//! sources, master-clock-synchronized mixing, a master effect chain, and an
//! optional live WAV mixdown recording, driven off a cross-platform device
//! backend (`cpal`).
//!
//! **Architecture:** device callback thread (realtime) <-> lock-free rings
//! (§4.1) <-> mix thread (near-realtime, §4.8) <-> per-source decode-ahead
//! threads (§4.5.1).
//!
//! **Traceability:** implements the module breakdown in `SPEC_FULL.md`.

#![cfg_attr(feature = "simd", feature(portable_simd))]

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod mixer;
pub mod pump;
pub mod ring_buffer;
pub mod source;
pub mod wav_writer;

pub use clock::{ClockMode, MasterClock};
pub use config::AudioConfig;
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventBus, SubscriptionHandle};
pub use mixer::{Mixer, MixerLifecycle, MixerStats};
pub use pump::{EnginePump, PumpState};
pub use source::decode_buffer::DecodeAheadBuffer;
pub use source::effects::{EffectChain, EffectProcessor, SourceWithEffects};
pub use source::file_source::{Decoder, DecodedChunk, FileSource};
pub use source::{AudioSource, ClockBoundSource, ReadResult, SourceState};
