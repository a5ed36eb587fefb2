//! Now-playing registry and remote command routing.
//!
//! Media keys and similar remote controls act on one player at a time: the
//! most recently activated one. The registry keeps that order and the
//! metadata an OS media session would display. It is owned by the
//! application rather than being a global; registering it with an OS media
//! session is left to the embedder.

use crate::audio::{AudioOutput, PlaybackState, Player, PlayerId};
use std::path::Path;

/// Artist shown for every track.
pub const ARTIST: &str = "minimidi";

/// A command arriving from a remote control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteCommand {
    Play,
    Pause,
    Stop,
    TogglePlayPause,
    /// Seek to an absolute position in seconds.
    ChangePosition(f64),
    /// Restart the current file from the beginning.
    PreviousTrack,
}

/// Result of handling a [`RemoteCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    /// No player can take the command (none loaded, bouncing, or routing
    /// disabled).
    NoActionableItem,
    /// The player accepted the command but it failed.
    Failed,
}

/// Metadata describing what is playing.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingInfo {
    /// MIDI file name without extension.
    pub title: String,
    /// SoundFont name without extension, or the MIDI file's directory.
    pub album: String,
    pub artist: String,
    pub duration: f64,
    pub position: f64,
    pub rate: f64,
    pub playback_state: PlaybackState,
}

impl NowPlayingInfo {
    /// Describes `player`, or `None` when it has nothing loaded.
    pub fn for_player<O: AudioOutput>(player: &Player<O>) -> Option<Self> {
        let midi = player.current_midi()?;

        let album = match player.current_soundfont() {
            Some(soundfont) => file_stem(soundfont),
            None => midi
                .parent()
                .and_then(|dir| dir.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        Some(Self {
            title: file_stem(midi),
            album,
            artist: ARTIST.to_string(),
            duration: player.duration(),
            position: player.current_position(),
            rate: player.rate(),
            playback_state: player.state(),
        })
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Players in activation order, most recent first.
#[derive(Debug, Default)]
pub struct NowPlayingRegistry {
    players: Vec<PlayerId>,
    cacophony_mode: bool,
    info: Option<NowPlayingInfo>,
}

impl NowPlayingRegistry {
    pub fn new(cacophony_mode: bool) -> Self {
        Self {
            cacophony_mode,
            ..Self::default()
        }
    }

    /// Moves `id` to the front, inserting it if unknown.
    pub fn make_active(&mut self, id: PlayerId) {
        self.players.retain(|p| *p != id);
        self.players.insert(0, id);
    }

    /// Registers `id` behind the existing players.
    pub fn add(&mut self, id: PlayerId) {
        if !self.players.contains(&id) {
            self.players.push(id);
        }
    }

    /// Unregisters `id`. Returns true when this emptied the registry, in
    /// which case the now-playing info is cleared too.
    pub fn remove(&mut self, id: PlayerId) -> bool {
        let before = self.players.len();
        self.players.retain(|p| *p != id);

        let emptied = before > 0 && self.players.is_empty();
        if emptied {
            self.info = None;
        }
        emptied
    }

    /// The player remote commands go to.
    pub fn active(&self) -> Option<PlayerId> {
        self.players.first().copied()
    }

    pub fn players(&self) -> &[PlayerId] {
        &self.players
    }

    pub fn clear(&mut self) {
        self.players.clear();
        self.info = None;
    }

    pub fn cacophony_mode(&self) -> bool {
        self.cacophony_mode
    }

    /// With cacophony mode on, every player runs independently and nothing
    /// is routed or published.
    pub fn set_cacophony_mode(&mut self, enabled: bool) {
        self.cacophony_mode = enabled;
        if enabled {
            self.info = None;
        }
    }

    /// Picks the player that should handle `command`.
    pub fn route(&self, command: RemoteCommand) -> Option<PlayerId> {
        if self.cacophony_mode {
            tracing::debug!("Ignoring {:?} in cacophony mode", command);
            return None;
        }
        self.active()
    }

    /// Publishes fresh info for `id`. Ignored unless `id` is active.
    pub fn publish(&mut self, id: PlayerId, info: NowPlayingInfo) -> bool {
        if self.cacophony_mode || self.active() != Some(id) {
            return false;
        }
        self.info = Some(info);
        true
    }

    /// Updates the published position, rate and state, if any info is
    /// published.
    pub fn update(&mut self, position: f64, rate: f64, state: PlaybackState) {
        if self.cacophony_mode {
            return;
        }
        if let Some(info) = self.info.as_mut() {
            info.position = position;
            info.rate = rate;
            info.playback_state = state;
        }
    }

    pub fn info(&self) -> Option<&NowPlayingInfo> {
        self.info.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{HeadlessOutput, PlayerConfig};
    use crate::midi::fixtures::Fixture;

    fn info(title: &str) -> NowPlayingInfo {
        NowPlayingInfo {
            title: title.to_string(),
            album: String::new(),
            artist: ARTIST.to_string(),
            duration: 10.0,
            position: 0.0,
            rate: 1.0,
            playback_state: PlaybackState::Loaded,
        }
    }

    #[test]
    fn test_make_active_moves_to_front() {
        let (a, b, c) = (PlayerId::new(), PlayerId::new(), PlayerId::new());
        let mut registry = NowPlayingRegistry::default();
        registry.add(a);
        registry.add(b);
        registry.add(b);
        registry.make_active(c);
        assert_eq!(registry.players(), &[c, a, b]);

        registry.make_active(b);
        assert_eq!(registry.players(), &[b, c, a]);
        assert_eq!(registry.active(), Some(b));
    }

    #[test]
    fn test_remove_reports_empty() {
        let (a, b) = (PlayerId::new(), PlayerId::new());
        let mut registry = NowPlayingRegistry::default();
        registry.make_active(a);
        registry.make_active(b);
        assert!(registry.publish(b, info("song")));

        assert!(!registry.remove(b));
        assert_eq!(registry.active(), Some(a));
        assert!(registry.info().is_some());

        assert!(registry.remove(a));
        assert_eq!(registry.active(), None);
        assert!(registry.info().is_none());
        assert!(!registry.remove(a));
    }

    #[test]
    fn test_route_to_active_player() {
        let (a, b) = (PlayerId::new(), PlayerId::new());
        let mut registry = NowPlayingRegistry::default();
        assert_eq!(registry.route(RemoteCommand::Play), None);

        registry.make_active(a);
        registry.make_active(b);
        assert_eq!(registry.route(RemoteCommand::Pause), Some(b));
    }

    #[test]
    fn test_cacophony_disables_routing() {
        let a = PlayerId::new();
        let mut registry = NowPlayingRegistry::new(true);
        registry.make_active(a);

        assert_eq!(registry.route(RemoteCommand::Play), None);
        assert!(!registry.publish(a, info("song")));

        registry.set_cacophony_mode(false);
        assert_eq!(registry.route(RemoteCommand::Play), Some(a));
    }

    #[test]
    fn test_publish_only_for_active() {
        let (a, b) = (PlayerId::new(), PlayerId::new());
        let mut registry = NowPlayingRegistry::default();
        registry.make_active(a);
        registry.add(b);

        assert!(!registry.publish(b, info("other")));
        assert!(registry.publish(a, info("song")));
        registry.update(4.0, 1.5, PlaybackState::Playing);

        let published = registry.info().unwrap();
        assert_eq!(published.title, "song");
        assert_eq!(published.position, 4.0);
        assert_eq!(published.rate, 1.5);
        assert_eq!(published.playback_state, PlaybackState::Playing);
    }

    #[test]
    fn test_info_for_player() {
        let dir = tempfile::tempdir().unwrap();
        let album_dir = dir.path().join("Chiptunes");
        std::fs::create_dir(&album_dir).unwrap();
        let path = Fixture::steady(12).save(&album_dir, "Overture.mid");

        let mut player = Player::with_output(HeadlessOutput::new(1.0), PlayerConfig::default());
        assert_eq!(NowPlayingInfo::for_player(&player), None);

        player.load(&path, None).unwrap();
        player.set_rate(1.25);
        let info = NowPlayingInfo::for_player(&player).unwrap();
        assert_eq!(info.title, "Overture");
        assert_eq!(info.album, "Chiptunes");
        assert_eq!(info.artist, ARTIST);
        assert_eq!(info.duration, 12.0);
        assert_eq!(info.rate, 1.25);
        assert_eq!(info.playback_state, PlaybackState::Loaded);
    }
}
