//! Error types shared by the loader, bank, engine, player and bouncer.

use std::path::{Path, PathBuf};

/// Errors produced by the playback and bounce engine.
///
/// Variants carry owned strings rather than source errors so they can be
/// cloned into [`crate::events::PlayerEvent`] and
/// [`crate::events::BounceEvent`] values and sent across threads.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlayerError {
    /// A MIDI or SoundFont file does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The file exists but its structure is malformed.
    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    /// The file is well-formed but not something we can play.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The audio output device could not be acquired or failed while running.
    #[error("audio device error: {0}")]
    Device(String),

    /// Any other I/O failure (permissions, disk full, ...).
    #[error("I/O error: {0}")]
    Io(String),

    /// The synthesizer rejected its configuration.
    #[error("synthesizer error: {0}")]
    Synth(String),

    /// A bounce was cancelled. A normal outcome rather than a failure.
    #[error("cancelled by user")]
    Cancelled,

    /// An operation was requested in a state that does not allow it.
    #[error("invalid state: {0}")]
    InternalState(String),

    /// Loading a MIDI/SoundFont pair failed; wraps the first error hit.
    #[error("failed to load files: {0}")]
    Load(Box<PlayerError>),
}

impl PlayerError {
    /// Maps an I/O error on `path`, keeping "not found" distinct.
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            PlayerError::FileNotFound(path.to_path_buf())
        } else {
            PlayerError::Io(format!("{}: {}", path.display(), err))
        }
    }

    /// Wraps a loader or bank error for the player's `load` contract.
    pub fn load(inner: PlayerError) -> Self {
        match inner {
            already @ PlayerError::Load(_) => already,
            other => PlayerError::Load(Box::new(other)),
        }
    }

    /// Returns the innermost error for `Load`, otherwise `self`.
    pub fn root(&self) -> &PlayerError {
        match self {
            PlayerError::Load(inner) => inner.root(),
            other => other,
        }
    }
}

impl From<hound::Error> for PlayerError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => PlayerError::Io(io.to_string()),
            other => PlayerError::Io(other.to_string()),
        }
    }
}

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, PlayerError>;
