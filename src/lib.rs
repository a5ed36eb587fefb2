//! minimidi - a minimal MIDI file player.
//!
//! Loads Standard MIDI Files with an optional SoundFont, plays them with
//! transport controls and variable speed, and bounces them to WAV.

pub mod app;
pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod midi;
pub mod nowplaying;

// Re-export commonly used types
pub use app::{App, Command};
pub use audio::{Bank, BounceConfig, PlaybackState, Player, PlayerConfig, SynthEngine};
pub use config::Settings;
pub use error::{PlayerError, Result};
pub use events::{BounceEvent, BounceOutcome, PlayerEvent};
pub use midi::Sequence;
pub use nowplaying::{NowPlayingRegistry, RemoteCommand};
