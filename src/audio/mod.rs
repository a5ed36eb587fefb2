//! Audio engine for MIDI synthesis, playback and bouncing.
//!
//! This module provides:
//! - Instrument banks (SoundFont via rustysynth, or the built-in set)
//! - A stateful synthesis engine with seeking and variable rate
//! - The realtime [`Player`] with audio output via rodio
//! - Offline bouncing to WAV

mod bank;
mod bounce;
mod builtin;
mod engine;
mod output;
mod player;
pub mod speed;
mod synth;

pub use bank::Bank;
pub use bounce::{
    BounceConfig, BounceHandle, BounceRequest, Bouncer, CancelToken, SampleFormat,
};
pub use builtin::BuiltinSynth;
pub use engine::{ChannelState, EngineSettings, SampleBuffer, SynthEngine, SAMPLE_RATE};
pub use output::{AudioOutput, EngineSource, HeadlessOutput, RodioOutput};
pub use player::{PlaybackState, Player, PlayerConfig, PlayerId, MAX_RATE, MIN_RATE};
pub use synth::{Synth, MAX_VOICES};
