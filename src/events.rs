//! Events published by the player and the bouncer.
//!
//! Both are delivered over crossbeam channels, so the consumer may live on
//! any thread and decides itself when to drain them.

use crate::error::PlayerError;
use std::path::PathBuf;

/// Notifications from a [`crate::audio::Player`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// A MIDI file (and optional SoundFont) finished loading.
    FilesLoaded {
        midi: PathBuf,
        soundfont: Option<PathBuf>,
    },
    /// `play()` was accepted; the output is about to start.
    PlaybackWillStart { first_time: bool },
    /// Audio is running. `first_time` is true only for the first start
    /// after a load.
    PlaybackStarted { first_time: bool },
    /// Playback halted. `paused` distinguishes pause from stop.
    PlaybackStopped { paused: bool },
    /// The end of the sequence was reached.
    PlaybackEnded,
    /// Periodic or seek-driven position report, both in seconds.
    PositionChanged { position: f64, duration: f64 },
    /// The playback rate changed.
    SpeedChanged { speed: f64 },
    /// The output failed; playback has been stopped.
    PlaybackError(PlayerError),
}

/// Notifications from a running bounce.
#[derive(Debug, Clone, PartialEq)]
pub enum BounceEvent {
    /// `progress` is in `[0, 1]` of the sequence; `current_time` is the
    /// wall-clock length of audio rendered so far, in seconds at the bounce
    /// rate (it ends at `duration / rate`).
    Progress { progress: f64, current_time: f64 },
    /// Terminal: the render finished or was cancelled. The output file is
    /// finalised either way.
    Completed { cancelled: bool },
    /// Terminal: the render failed.
    Error(PlayerError),
}

impl BounceEvent {
    /// True for the single event that ends a bounce.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BounceEvent::Progress { .. })
    }

    /// The outcome a terminal event stands for.
    pub fn outcome(&self) -> Option<BounceOutcome> {
        match self {
            BounceEvent::Progress { .. } => None,
            BounceEvent::Completed { cancelled: false } => Some(BounceOutcome::Completed),
            BounceEvent::Completed { cancelled: true } => Some(BounceOutcome::Cancelled),
            BounceEvent::Error(e) => Some(BounceOutcome::Failed(e.clone())),
        }
    }
}

/// How a bounce ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BounceOutcome {
    Completed,
    Cancelled,
    Failed(PlayerError),
}
