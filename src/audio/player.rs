//! Realtime MIDI player.
//!
//! A [`Player`] owns one playback session at a time: the loaded sequence and
//! bank, a [`SynthEngine`] shared with the output's audio thread, and the
//! transport state. The output source is the clock; it reports positions and
//! detects the end. All notifications go out as [`PlayerEvent`]s on a
//! channel returned by [`Player::events`].
//!
//! The player also owns at most one offline bounce of its current files.

use super::bank::Bank;
use super::bounce::{BounceConfig, BounceHandle, BounceRequest, Bouncer};
use super::engine::{EngineSettings, SynthEngine, SAMPLE_RATE};
use super::output::{AudioOutput, EngineSource, RodioOutput};
use crate::error::{PlayerError, Result};
use crate::events::{BounceEvent, BounceOutcome, PlayerEvent};
use crate::midi;
use crate::nowplaying::{CommandStatus, RemoteCommand};
use crossbeam_channel::{Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Slowest accepted playback rate.
pub const MIN_RATE: f64 = 0.25;
/// Fastest accepted playback rate.
pub const MAX_RATE: f64 = 2.0;

/// Transport state of a [`Player`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing loaded.
    Idle,
    /// Files loaded, never started.
    Loaded,
    Playing,
    /// Halted, position kept.
    Paused,
    /// Halted and rewound.
    Stopped,
    /// Reached the end of the sequence.
    Ended,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Loaded,
            2 => PlaybackState::Playing,
            3 => PlaybackState::Paused,
            4 => PlaybackState::Stopped,
            5 => PlaybackState::Ended,
            _ => PlaybackState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PlaybackState::Idle => 0,
            PlaybackState::Loaded => 1,
            PlaybackState::Playing => 2,
            PlaybackState::Paused => 3,
            PlaybackState::Stopped => 4,
            PlaybackState::Ended => 5,
        }
    }
}

/// Transport state shared between the player and the audio thread.
/// Uses an atomic for lock-free access from the audio thread.
#[derive(Debug)]
pub(crate) struct SharedState {
    state: AtomicU8,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(PlaybackState::Idle.as_u8()),
        }
    }

    pub(crate) fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: PlaybackState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Atomically moves `from` to `Ended`. Only the caller that wins gets
    /// `true`, which makes the end transition happen exactly once.
    pub(crate) fn finish_from(&self, from: PlaybackState) -> bool {
        self.state
            .compare_exchange(
                from.as_u8(),
                PlaybackState::Ended.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Moves any loaded, not yet ended state to `Ended`.
    fn finish(&self) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                match PlaybackState::from_u8(current) {
                    PlaybackState::Idle | PlaybackState::Ended => None,
                    _ => Some(PlaybackState::Ended.as_u8()),
                }
            })
            .is_ok()
    }
}

/// Identity of a player, used by the now-playing registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayerId(Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Player tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerConfig {
    pub sample_rate: u32,
    /// Frames rendered per output buffer.
    pub buffer_frames: usize,
    /// Rendered audio between position reports.
    pub position_interval: Duration,
    pub min_rate: f64,
    pub max_rate: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            buffer_frames: 512,
            position_interval: Duration::from_millis(50),
            min_rate: MIN_RATE,
            max_rate: MAX_RATE,
        }
    }
}

/// The loaded files and their engine.
struct Session {
    midi: PathBuf,
    soundfont: Option<PathBuf>,
    bank: Arc<Bank>,
    engine: Arc<Mutex<SynthEngine>>,
    /// Whether playback has started since the load.
    started: bool,
}

impl Session {
    fn engine(&self) -> Result<MutexGuard<'_, SynthEngine>> {
        self.engine
            .lock()
            .map_err(|_| PlayerError::InternalState("engine lock poisoned".to_string()))
    }
}

/// A MIDI player with transport controls, variable rate and bouncing.
pub struct Player<O: AudioOutput = RodioOutput> {
    id: PlayerId,
    config: PlayerConfig,
    output: O,
    shared: Arc<SharedState>,
    /// Liveness of the last source handed to the output.
    source_alive: Arc<AtomicBool>,
    session: Option<Session>,
    rate: f64,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
    bounce: Option<BounceHandle>,
}

impl Player<RodioOutput> {
    /// Creates a player on the default audio device.
    pub fn new() -> Self {
        Self::with_output(RodioOutput::new(), PlayerConfig::default())
    }
}

impl Default for Player<RodioOutput> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: AudioOutput> Player<O> {
    /// Creates a player that plays through `output`.
    pub fn with_output(output: O, config: PlayerConfig) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            id: PlayerId::new(),
            config,
            output,
            shared: Arc::new(SharedState::new()),
            source_alive: Arc::new(AtomicBool::new(false)),
            session: None,
            rate: 1.0,
            events_tx,
            events_rx,
            bounce: None,
        }
    }

    /// Loads a MIDI file and an optional SoundFont, replacing any current
    /// session.
    ///
    /// # Errors
    ///
    /// [`PlayerError::Load`] wrapping the loader, bank or synthesizer error.
    /// The current session is untouched on failure.
    pub fn load(&mut self, midi_path: &Path, soundfont: Option<&Path>) -> Result<()> {
        let sequence = midi::load(midi_path).map_err(PlayerError::load)?;
        let bank = Bank::load(soundfont).map_err(PlayerError::load)?;
        let engine = SynthEngine::new(
            Arc::new(sequence),
            Arc::clone(&bank),
            EngineSettings {
                sample_rate: self.config.sample_rate,
                rate: self.rate,
            },
        )
        .map_err(PlayerError::load)?;

        let was_playing = self.shared.state() == PlaybackState::Playing;
        self.output.stop();
        if was_playing {
            self.emit(PlayerEvent::PlaybackStopped { paused: false });
        }

        tracing::info!(
            "Loaded {:?} with {} ({:.2}s)",
            midi_path,
            bank.name(),
            engine.duration()
        );

        self.session = Some(Session {
            midi: midi_path.to_path_buf(),
            soundfont: soundfont.map(Path::to_path_buf),
            bank,
            engine: Arc::new(Mutex::new(engine)),
            started: false,
        });
        self.shared.set(PlaybackState::Loaded);

        self.emit(PlayerEvent::FilesLoaded {
            midi: midi_path.to_path_buf(),
            soundfont: soundfont.map(Path::to_path_buf),
        });
        Ok(())
    }

    /// Starts or resumes playback.
    ///
    /// From `Ended` (or any state positioned at the end) playback restarts
    /// from the beginning.
    pub fn play(&mut self) -> Result<()> {
        let state = self.shared.state();
        let Some(session) = self.session.as_mut() else {
            return Err(PlayerError::InternalState(
                "play requested with nothing loaded".to_string(),
            ));
        };
        if state == PlaybackState::Playing {
            return Ok(());
        }

        {
            let mut engine = session.engine()?;
            if state == PlaybackState::Ended || engine.is_finished() {
                engine.seek(0.0);
            }
        }

        let first_time = !session.started;
        let _ = self
            .events_tx
            .send(PlayerEvent::PlaybackWillStart { first_time });

        // A source that ended on its own must be replaced even if the
        // output still reports itself running
        let resumable = state == PlaybackState::Paused
            && self.output.is_running()
            && self.source_alive.load(Ordering::SeqCst);
        if !resumable {
            let source = EngineSource::new(
                Arc::clone(&session.engine),
                Arc::clone(&self.shared),
                self.events_tx.clone(),
                self.config.buffer_frames,
                self.config.position_interval,
            );
            self.source_alive = source.alive();
            if let Err(e) = self.output.start(source) {
                tracing::error!("Failed to start playback: {}", e);
                self.output.stop();
                self.shared.set(PlaybackState::Stopped);
                let _ = self.events_tx.send(PlayerEvent::PlaybackError(e.clone()));
                return Err(e);
            }
        }

        session.started = true;
        let _ = self
            .events_tx
            .send(PlayerEvent::PlaybackStarted { first_time });
        self.shared.set(PlaybackState::Playing);

        tracing::info!("Playback started (first_time: {})", first_time);
        Ok(())
    }

    /// Pauses playback, keeping the position. Sounding notes are released.
    pub fn pause(&mut self) -> Result<()> {
        let session = self.session()?;
        {
            let mut engine = session.engine()?;
            if self.shared.state() != PlaybackState::Playing {
                return Ok(());
            }
            self.shared.set(PlaybackState::Paused);
            engine.all_notes_off(false);
        }

        tracing::info!("Playback paused");
        self.emit(PlayerEvent::PlaybackStopped { paused: true });
        Ok(())
    }

    /// Stops playback, closes the output and rewinds to the start.
    ///
    /// From `Loaded` or `Stopped` nothing was playing, so no
    /// `PlaybackStopped` is emitted; a rewind is still reported as a
    /// position change.
    pub fn stop(&mut self) -> Result<()> {
        self.session()?;
        self.output.stop();

        let previous = self.shared.state();
        let (moved, duration) = {
            let mut engine = self.session()?.engine()?;
            let moved = engine.position() > 0.0;
            engine.seek(0.0);
            (moved, engine.duration())
        };
        self.shared.set(PlaybackState::Stopped);

        match previous {
            PlaybackState::Loaded | PlaybackState::Stopped => {
                if moved {
                    self.emit(PlayerEvent::PositionChanged {
                        position: 0.0,
                        duration,
                    });
                }
            }
            _ => {
                tracing::info!("Playback stopped");
                self.emit(PlayerEvent::PlaybackStopped { paused: false });
            }
        }
        Ok(())
    }

    /// Pauses when playing, plays otherwise.
    pub fn toggle_play_pause(&mut self) -> Result<()> {
        if self.is_playing() {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Moves the playback position, clamped to `[0, duration]`.
    ///
    /// Does not change play/pause state, except that moving away from the
    /// end while `Ended` leaves the player `Paused`.
    pub fn set_position(&mut self, seconds: f64) -> Result<()> {
        let session = self.session()?;
        let (position, duration) = {
            let mut engine = session.engine()?;
            let duration = engine.duration();
            let target = if seconds.is_finite() {
                seconds.clamp(0.0, duration)
            } else {
                0.0
            };
            engine.seek(target);

            if target < duration {
                let _ = self.shared.state.compare_exchange(
                    PlaybackState::Ended.as_u8(),
                    PlaybackState::Paused.as_u8(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
            }
            (target, duration)
        };

        self.emit(PlayerEvent::PositionChanged { position, duration });
        Ok(())
    }

    /// Skips back by `seconds`, stopping at the start.
    pub fn rewind(&mut self, seconds: f64) -> Result<()> {
        let current = self.current_position();
        self.set_position(current - seconds.max(0.0))
    }

    /// Skips forward by `seconds`. Reaching the end ends playback.
    pub fn fast_forward(&mut self, seconds: f64) -> Result<()> {
        let session = self.session()?;
        let duration = session.engine()?.duration();
        let target = self.current_position() + seconds.max(0.0);

        if target < duration {
            return self.set_position(target);
        }

        let ended = {
            let mut engine = self.session()?.engine()?;
            engine.seek(duration);
            self.shared.finish()
        };

        if ended {
            self.output.stop();
            tracing::info!("Fast-forwarded to the end ({:.3}s)", duration);
            self.emit(PlayerEvent::PositionChanged {
                position: duration,
                duration,
            });
            self.emit(PlayerEvent::PlaybackEnded);
        }
        Ok(())
    }

    /// Sets the playback rate, clamped to the configured range. Returns the
    /// rate applied. Playing continues uninterrupted.
    pub fn set_rate(&mut self, rate: f64) -> f64 {
        let rate = if rate.is_finite() {
            rate.clamp(self.config.min_rate, self.config.max_rate)
        } else {
            1.0
        };
        self.rate = rate;

        if let Some(session) = &self.session {
            if let Ok(mut engine) = session.engine() {
                engine.set_rate(rate);
            }
        }

        tracing::debug!("Playback rate set to {:.2}", rate);
        self.emit(PlayerEvent::SpeedChanged { speed: rate });
        rate
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// True when the position sits at the end of the sequence.
    pub fn is_at_end_of_track(&self) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.engine().ok())
            .is_some_and(|engine| engine.is_finished())
    }

    /// Position on the sequence timeline in seconds.
    pub fn current_position(&self) -> f64 {
        self.session
            .as_ref()
            .and_then(|s| s.engine().ok())
            .map(|engine| engine.position().min(engine.duration()))
            .unwrap_or(0.0)
    }

    /// Length of the sequence in seconds at rate 1.0.
    pub fn duration(&self) -> f64 {
        self.session
            .as_ref()
            .and_then(|s| s.engine().ok())
            .map(|engine| engine.duration())
            .unwrap_or(0.0)
    }

    /// Wall-clock length at the current rate.
    pub fn real_duration(&self) -> f64 {
        self.duration() / self.rate
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn current_midi(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.midi.as_path())
    }

    pub fn current_soundfont(&self) -> Option<&Path> {
        self.session.as_ref().and_then(|s| s.soundfont.as_deref())
    }

    pub fn bank(&self) -> Option<&Arc<Bank>> {
        self.session.as_ref().map(|s| &s.bank)
    }

    /// Receiver for this player's events. Clone it to consume elsewhere.
    pub fn events(&self) -> &Receiver<PlayerEvent> {
        &self.events_rx
    }

    /// Media keys are ignored while a bounce runs.
    pub fn accepts_remote_commands(&self) -> bool {
        !self.is_bouncing()
    }

    /// Executes a remote (media key) command.
    pub fn handle_remote_command(&mut self, command: RemoteCommand) -> CommandStatus {
        if self.session.is_none() || !self.accepts_remote_commands() {
            return CommandStatus::NoActionableItem;
        }

        tracing::debug!("Remote command {:?}", command);
        let result = match command {
            RemoteCommand::Play => self.play(),
            RemoteCommand::Pause => self.pause(),
            RemoteCommand::Stop => self.stop(),
            RemoteCommand::TogglePlayPause => self.toggle_play_pause(),
            RemoteCommand::ChangePosition(seconds) => self.set_position(seconds),
            RemoteCommand::PreviousTrack => self.restart(),
        };

        match result {
            Ok(()) => CommandStatus::Success,
            Err(e) => {
                tracing::warn!("Remote command {:?} failed: {}", command, e);
                CommandStatus::Failed
            }
        }
    }

    /// Pauses playback and starts bouncing the current files at the current
    /// rate to `destination`.
    pub fn start_bounce(&mut self, destination: &Path, config: BounceConfig) -> Result<()> {
        if self.is_bouncing() {
            return Err(PlayerError::InternalState(
                "a bounce is already running".to_string(),
            ));
        }
        let session = self.session()?;
        let request = BounceRequest {
            midi: session.midi.clone(),
            soundfont: session.soundfont.clone(),
            destination: destination.to_path_buf(),
            rate: self.rate,
            config,
        };

        self.pause()?;
        self.bounce = Some(Bouncer::new(request).start()?);
        Ok(())
    }

    /// Requests cancellation of the running bounce, if any.
    pub fn cancel_bounce(&self) {
        if let Some(bounce) = &self.bounce {
            bounce.cancel();
        }
    }

    /// True while a bounce thread is alive.
    pub fn is_bouncing(&self) -> bool {
        self.bounce.as_ref().is_some_and(|b| !b.is_finished())
    }

    /// Events of the current or last bounce.
    pub fn bounce_events(&self) -> Option<Receiver<BounceEvent>> {
        self.bounce.as_ref().map(|b| b.events().clone())
    }

    /// Reaps a finished bounce. Returns its outcome once, `None` while it
    /// is still running or when there is none.
    pub fn poll_bounce(&mut self) -> Option<BounceOutcome> {
        if self.bounce.as_ref().is_some_and(|b| b.is_finished()) {
            self.bounce.take().map(BounceHandle::wait)
        } else {
            None
        }
    }

    /// Blocks until the current bounce finishes.
    pub fn wait_for_bounce(&mut self) -> Option<BounceOutcome> {
        self.bounce.take().map(BounceHandle::wait)
    }

    /// Cancels any bounce, stops playback and joins the bounce thread.
    pub fn close(&mut self) {
        self.cancel_bounce();
        if self.session.is_some() {
            let _ = self.stop();
        }
        self.output.stop();
        if let Some(outcome) = self.wait_for_bounce() {
            tracing::debug!("Bounce finished on close: {:?}", outcome);
        }
    }

    /// Stop, back to the start, play.
    fn restart(&mut self) -> Result<()> {
        self.stop()?;
        self.set_position(0.0)?;
        self.play()
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| PlayerError::InternalState("nothing loaded".to_string()))
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events_tx.send(event);
    }
}

impl<O: AudioOutput> Drop for Player<O> {
    fn drop(&mut self) {
        self.close();
    }
}
