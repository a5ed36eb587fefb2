//! Application controller for the terminal player.
//!
//! Maps user commands onto a [`Player`], reacts to its events, keeps the
//! settings and now-playing registry current, and renders a one-line
//! status display.

use crate::audio::{speed, AudioOutput, BounceConfig, PlaybackState, Player, RodioOutput};
use crate::config::Settings;
use crate::events::{BounceEvent, PlayerEvent};
use crate::midi::format_time;
use crate::nowplaying::{CommandStatus, NowPlayingInfo, NowPlayingRegistry, RemoteCommand};
use anyhow::{Context, Result};
use crossterm::event::{KeyCode, KeyModifiers};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Seconds skipped by rewind / fast-forward.
pub const SKIP_SECONDS: f64 = 10.0;
/// Seconds skipped with shift held.
pub const FINE_SKIP_SECONDS: f64 = 5.0;

/// How long a status message stays visible.
const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// A user action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    TogglePlayPause,
    Stop,
    /// Skip back; `fine` uses the shorter skip.
    Rewind { fine: bool },
    /// Skip forward; `fine` uses the shorter skip.
    FastForward { fine: bool },
    SpeedUp,
    SpeedDown,
    /// Bounce the current file next to itself as WAV.
    Bounce,
    CancelBounce,
    /// Switch between elapsed and remaining time.
    ToggleCountdown,
    Quit,
}

impl Command {
    /// Key bindings of the `play` screen.
    pub fn from_key(code: KeyCode, modifiers: KeyModifiers) -> Option<Self> {
        let fine = modifiers.contains(KeyModifiers::SHIFT);
        match code {
            KeyCode::Char(' ') => Some(Command::TogglePlayPause),
            KeyCode::Left => Some(Command::Rewind { fine }),
            KeyCode::Right => Some(Command::FastForward { fine }),
            KeyCode::Up => Some(Command::SpeedUp),
            KeyCode::Down => Some(Command::SpeedDown),
            KeyCode::Char('s') => Some(Command::Stop),
            KeyCode::Char('b') => Some(Command::Bounce),
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Command::Quit)
            }
            KeyCode::Char('c') => Some(Command::CancelBounce),
            KeyCode::Char('t') => Some(Command::ToggleCountdown),
            KeyCode::Char('q') | KeyCode::Esc => Some(Command::Quit),
            _ => None,
        }
    }
}

/// Main application state.
pub struct App<O: AudioOutput = RodioOutput> {
    player: Player<O>,
    settings: Settings,
    /// Where settings are saved; `None` keeps them in memory only.
    settings_path: Option<PathBuf>,
    registry: NowPlayingRegistry,
    /// Last reported position and duration, in seconds.
    position: f64,
    duration: f64,
    /// Show remaining instead of elapsed time.
    pub show_countdown: bool,
    /// Latest bounce progress in `[0, 1]` while a bounce runs.
    bounce_progress: Option<f64>,
    /// Status message to display.
    pub status_message: Option<(String, Instant)>,
    should_quit: bool,
}

impl<O: AudioOutput> App<O> {
    pub fn new(player: Player<O>, settings: Settings, settings_path: Option<PathBuf>) -> Self {
        let mut registry = NowPlayingRegistry::new(settings.cacophony_mode);
        registry.make_active(player.id());

        Self {
            player,
            settings,
            settings_path,
            registry,
            position: 0.0,
            duration: 0.0,
            show_countdown: false,
            bounce_progress: None,
            status_message: None,
            should_quit: false,
        }
    }

    pub fn player(&self) -> &Player<O> {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut Player<O> {
        &mut self.player
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &NowPlayingRegistry {
        &self.registry
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Opens a MIDI file with an optional SoundFont.
    pub fn open(&mut self, midi: &Path, soundfont: Option<&Path>) -> Result<()> {
        self.player
            .load(midi, soundfont)
            .with_context(|| format!("Failed to open {}", midi.display()))?;
        self.registry.make_active(self.player.id());
        Ok(())
    }

    /// Sets a status message to display temporarily.
    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some((message.into(), Instant::now()));
    }

    /// Clears expired status messages.
    pub fn clear_expired_status(&mut self) {
        if let Some((_, time)) = &self.status_message {
            if time.elapsed() > STATUS_TIMEOUT {
                self.status_message = None;
            }
        }
    }

    /// Executes a user command. Failures end up in the status line.
    pub fn handle(&mut self, command: Command) {
        if let Err(e) = self.execute(command) {
            tracing::warn!("{:?} failed: {:#}", command, e);
            self.set_status(format!("{:#}", e));
        }
    }

    fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::TogglePlayPause => self.player.toggle_play_pause()?,
            Command::Stop => self.player.stop()?,
            Command::Rewind { fine } => self.player.rewind(skip_amount(fine))?,
            Command::FastForward { fine } => self.player.fast_forward(skip_amount(fine))?,
            Command::SpeedUp => {
                self.player.set_rate(speed::step_up(self.player.rate()));
            }
            Command::SpeedDown => {
                self.player.set_rate(speed::step_down(self.player.rate()));
            }
            Command::Bounce => {
                let destination = self
                    .bounce_destination()
                    .context("Nothing to bounce")?;
                self.player
                    .start_bounce(&destination, BounceConfig::default())
                    .context("Failed to start bounce")?;
                self.bounce_progress = Some(0.0);
                self.set_status(format!("Bouncing to {}", destination.display()));
            }
            Command::CancelBounce => {
                if self.player.is_bouncing() {
                    self.player.cancel_bounce();
                    self.set_status("Cancelling bounce");
                }
            }
            Command::ToggleCountdown => self.show_countdown = !self.show_countdown,
            Command::Quit => self.should_quit = true,
        }
        Ok(())
    }

    /// Routes a remote (media key) command through the registry.
    pub fn remote(&mut self, command: RemoteCommand) -> CommandStatus {
        match self.registry.route(command) {
            Some(id) if id == self.player.id() => self.player.handle_remote_command(command),
            _ => CommandStatus::NoActionableItem,
        }
    }

    /// `<midi dir>/<midi stem>.wav`.
    pub fn bounce_destination(&self) -> Option<PathBuf> {
        let midi = self.player.current_midi()?;
        Some(midi.with_extension("wav"))
    }

    /// Drains player and bounce events and updates the display state.
    pub fn pump_events(&mut self) {
        let events: Vec<PlayerEvent> = self.player.events().try_iter().collect();
        for event in events {
            self.on_player_event(event);
        }

        // Checked before draining so a finished bounce's terminal event is
        // already queued when the handle is reaped
        let bounce_done = !self.player.is_bouncing();
        if let Some(bounce_events) = self.player.bounce_events() {
            for event in bounce_events.try_iter() {
                self.on_bounce_event(event);
            }
        }
        if bounce_done {
            self.player.poll_bounce();
        }

        self.clear_expired_status();
    }

    fn on_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::FilesLoaded { midi, soundfont } => {
                self.position = 0.0;
                self.duration = self.player.duration();
                if let Some(soundfont) = &soundfont {
                    self.settings.add_recent_soundfont(soundfont);
                    self.save_settings();
                }
                if let Some(info) = NowPlayingInfo::for_player(&self.player) {
                    self.registry.publish(self.player.id(), info);
                }
                self.set_status(format!("Loaded {}", midi.display()));

                if self.settings.autoplay {
                    if let Err(e) = self.player.play() {
                        self.set_status(format!("Cannot play: {}", e));
                    }
                }
            }
            PlayerEvent::PlaybackWillStart { .. } => {}
            PlayerEvent::PlaybackStarted { .. } => self.set_status("Playing"),
            PlayerEvent::PlaybackStopped { paused } => {
                if !paused {
                    self.position = 0.0;
                }
                self.set_status(if paused { "Paused" } else { "Stopped" });
            }
            PlayerEvent::PlaybackEnded => {
                tracing::info!("Playback reached the end ({:.3}s)", self.duration);
                self.set_status("End of track");
            }
            PlayerEvent::PositionChanged { position, duration } => {
                self.position = position;
                self.duration = duration;
            }
            PlayerEvent::SpeedChanged { speed } => {
                self.set_status(format!("Speed {}", speed::format_speed(speed)));
            }
            PlayerEvent::PlaybackError(e) => {
                tracing::error!("Playback error: {}", e);
                self.set_status(format!("Playback error: {}", e));
            }
        }

        self.registry
            .update(self.position, self.player.rate(), self.player.state());
    }

    fn on_bounce_event(&mut self, event: BounceEvent) {
        match event {
            BounceEvent::Progress { progress, .. } => self.bounce_progress = Some(progress),
            BounceEvent::Completed { cancelled } => {
                self.bounce_progress = None;
                self.set_status(if cancelled {
                    "Bounce cancelled"
                } else {
                    "Bounce complete"
                });
            }
            BounceEvent::Error(e) => {
                self.bounce_progress = None;
                self.set_status(format!("Bounce failed: {}", e));
            }
        }
    }

    /// Renders the status line.
    pub fn status_line(&self) -> String {
        let icon = match self.player.state() {
            PlaybackState::Playing => "▶",
            PlaybackState::Paused => "⏸",
            PlaybackState::Idle => " ",
            PlaybackState::Loaded | PlaybackState::Stopped | PlaybackState::Ended => "■",
        };

        // Displayed times are wall-clock at the current rate
        let rate = self.player.rate();
        let elapsed = self.position / rate;
        let total = self.duration / rate;
        let time = if self.show_countdown {
            format!("-{}", format_time(total - elapsed))
        } else {
            format_time(elapsed)
        };

        let mut line = format!(
            "{} {} / {}  {}",
            icon,
            time,
            format_time(total),
            speed::format_speed(rate)
        );
        if let Some(progress) = self.bounce_progress {
            line.push_str(&format!("  [bouncing {:.0}%]", progress * 100.0));
        }
        if let Some((message, _)) = &self.status_message {
            line.push_str("  ");
            line.push_str(message);
        }
        line
    }

    fn save_settings(&self) {
        if let Some(path) = &self.settings_path {
            if let Err(e) = self.settings.save_to(path) {
                tracing::warn!("Failed to save settings to {:?}: {}", path, e);
            }
        }
    }

    /// Cancels any bounce, stops playback and waits for the bounce thread.
    pub fn close(&mut self) {
        self.player.close();
        self.registry.remove(self.player.id());
        self.save_settings();
    }
}

fn skip_amount(fine: bool) -> f64 {
    if fine {
        FINE_SKIP_SECONDS
    } else {
        SKIP_SECONDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{HeadlessOutput, PlayerConfig};
    use crate::midi::fixtures::Fixture;
    use tempfile::TempDir;

    fn app(settings: Settings) -> (TempDir, PathBuf, App<HeadlessOutput>) {
        let dir = tempfile::tempdir().unwrap();
        let midi = Fixture::steady(90).save(dir.path(), "tune.mid");
        let player = Player::with_output(HeadlessOutput::new(1.0), PlayerConfig::default());
        let settings_path = dir.path().join("settings.json");
        (dir, midi, App::new(player, settings, Some(settings_path)))
    }

    #[test]
    fn test_key_bindings() {
        let none = KeyModifiers::NONE;
        assert_eq!(
            Command::from_key(KeyCode::Char(' '), none),
            Some(Command::TogglePlayPause)
        );
        assert_eq!(
            Command::from_key(KeyCode::Left, KeyModifiers::SHIFT),
            Some(Command::Rewind { fine: true })
        );
        assert_eq!(
            Command::from_key(KeyCode::Right, none),
            Some(Command::FastForward { fine: false })
        );
        assert_eq!(
            Command::from_key(KeyCode::Char('c'), none),
            Some(Command::CancelBounce)
        );
        assert_eq!(
            Command::from_key(KeyCode::Char('c'), KeyModifiers::CONTROL),
            Some(Command::Quit)
        );
        assert_eq!(Command::from_key(KeyCode::Char('x'), none), None);
    }

    #[test]
    fn test_open_and_transport() {
        let (_dir, midi, mut app) = app(Settings::default());
        app.open(&midi, None).unwrap();
        app.pump_events();
        assert_eq!(app.player().state(), PlaybackState::Loaded);

        app.handle(Command::FastForward { fine: false });
        app.handle(Command::FastForward { fine: true });
        assert_eq!(app.player().current_position(), 15.0);
        app.handle(Command::Rewind { fine: false });
        assert_eq!(app.player().current_position(), 5.0);

        app.handle(Command::TogglePlayPause);
        assert!(app.player().is_playing());
        app.handle(Command::Stop);
        app.pump_events();
        assert_eq!(app.player().state(), PlaybackState::Stopped);
        assert!(app.status_line().contains("Stopped"));
    }

    #[test]
    fn test_autoplay() {
        let settings = Settings {
            autoplay: true,
            ..Settings::default()
        };
        let (_dir, midi, mut app) = app(settings);
        app.open(&midi, None).unwrap();
        assert!(!app.player().is_playing());

        app.pump_events();
        assert!(app.player().is_playing());
    }

    #[test]
    fn test_open_missing_file_reports_context() {
        let (dir, _midi, mut app) = app(Settings::default());
        let err = app.open(&dir.path().join("nope.mid"), None).unwrap_err();
        assert!(format!("{:#}", err).contains("nope.mid"));
    }

    #[test]
    fn test_speed_steps() {
        let (_dir, midi, mut app) = app(Settings::default());
        app.open(&midi, None).unwrap();

        app.handle(Command::SpeedUp);
        assert_eq!(app.player().rate(), 1.1);
        app.handle(Command::SpeedDown);
        app.handle(Command::SpeedDown);
        assert_eq!(app.player().rate(), 0.9);

        app.pump_events();
        assert!(app.status_line().contains("0.90×"));
    }

    #[test]
    fn test_status_line_countdown() {
        let (_dir, midi, mut app) = app(Settings::default());
        app.open(&midi, None).unwrap();
        app.player_mut().set_position(30.0).unwrap();
        app.pump_events();

        assert!(app.status_line().starts_with("■ 0:30 / 1:30  1.00×"));
        app.handle(Command::ToggleCountdown);
        assert!(app.status_line().starts_with("■ -1:00 / 1:30"));

        // Times follow the playback rate
        app.player_mut().set_rate(2.0);
        app.pump_events();
        assert!(app.status_line().starts_with("■ -0:30 / 0:45  2.00×"));
    }

    #[test]
    fn test_bounce_and_cancel() {
        let (dir, midi, mut app) = app(Settings::default());
        app.open(&midi, None).unwrap();
        app.handle(Command::TogglePlayPause);

        app.handle(Command::Bounce);
        assert!(app.player().is_bouncing());
        assert_eq!(app.player().state(), PlaybackState::Paused);
        assert_eq!(app.bounce_destination(), Some(dir.path().join("tune.wav")));
        assert_eq!(
            app.remote(RemoteCommand::Play),
            CommandStatus::NoActionableItem
        );

        app.handle(Command::CancelBounce);
        for _ in 0..3000 {
            app.pump_events();
            if app.player().bounce_events().is_none() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!app.player().is_bouncing());
        assert!(app.status_line().contains("Bounce cancelled"));
        assert!(!app.status_line().contains("bouncing"));
    }

    #[test]
    fn test_remote_commands_follow_cacophony_mode() {
        let (_dir, midi, mut app) = app(Settings::default());
        app.open(&midi, None).unwrap();
        assert_eq!(app.remote(RemoteCommand::Play), CommandStatus::Success);
        assert!(app.player().is_playing());

        let settings = Settings {
            cacophony_mode: true,
            ..Settings::default()
        };
        let (_dir, midi, mut app) = self::app(settings);
        app.open(&midi, None).unwrap();
        assert_eq!(
            app.remote(RemoteCommand::Play),
            CommandStatus::NoActionableItem
        );
        assert!(!app.player().is_playing());
    }

    #[test]
    fn test_now_playing_info_published() {
        let (_dir, midi, mut app) = app(Settings::default());
        app.open(&midi, None).unwrap();
        app.pump_events();

        let info = app.registry().info().unwrap();
        assert_eq!(info.title, "tune");
        assert_eq!(info.duration, 90.0);
        assert_eq!(info.playback_state, PlaybackState::Loaded);
    }

    #[test]
    fn test_close_unregisters() {
        let (_dir, midi, mut app) = app(Settings::default());
        app.open(&midi, None).unwrap();
        app.close();
        assert_eq!(app.registry().active(), None);
        assert_eq!(app.player().state(), PlaybackState::Stopped);
    }
}
