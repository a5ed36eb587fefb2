//! Persistent user settings.
//!
//! Stored as pretty JSON in the platform config directory. A missing or
//! unreadable file yields the defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Maximum number of remembered SoundFonts.
pub const MAX_RECENT_SOUNDFONTS: usize = 5;

/// User settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Start playing as soon as a file is loaded.
    pub autoplay: bool,
    /// Let every player run independently; remote commands are not routed.
    pub cacophony_mode: bool,
    /// Recently used SoundFonts, most recent first.
    pub recent_soundfonts: Vec<PathBuf>,
}

impl Settings {
    /// Load settings from the standard location.
    pub fn load() -> Self {
        Self::load_from(Self::default_path())
    }

    /// Load settings from `path`, falling back to defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(path.as_ref()) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed settings {:?}: {}", path.as_ref(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to the standard location.
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(Self::default_path())
    }

    /// Save settings to `path`, creating parent directories.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, json)
    }

    /// `<config dir>/minimidi/settings.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("minimidi"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("settings.json")
    }

    /// Remembers a SoundFont, moving it to the front if already known.
    pub fn add_recent_soundfont(&mut self, path: &Path) {
        self.recent_soundfonts.retain(|p| p != path);
        self.recent_soundfonts.insert(0, path.to_path_buf());
        self.recent_soundfonts.truncate(MAX_RECENT_SOUNDFONTS);
    }

    /// Recent SoundFonts that still exist on disk.
    pub fn existing_recent_soundfonts(&self) -> Vec<&Path> {
        self.recent_soundfonts
            .iter()
            .map(PathBuf::as_path)
            .filter(|p| p.exists())
            .collect()
    }

    pub fn clear_recent_soundfonts(&mut self) {
        self.recent_soundfonts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(!settings.autoplay);
        assert!(!settings.cacophony_mode);
        assert!(settings.recent_soundfonts.is_empty());
    }

    #[test]
    fn test_recent_soundfonts_are_mru() {
        let mut settings = Settings::default();
        for name in ["a", "b", "c", "d", "e", "f"] {
            settings.add_recent_soundfont(Path::new(name));
        }
        assert_eq!(settings.recent_soundfonts.len(), MAX_RECENT_SOUNDFONTS);
        assert_eq!(settings.recent_soundfonts[0], PathBuf::from("f"));
        assert!(!settings.recent_soundfonts.contains(&PathBuf::from("a")));

        settings.add_recent_soundfont(Path::new("d"));
        let names: Vec<_> = settings
            .recent_soundfonts
            .iter()
            .map(|p| p.to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["d", "f", "e", "c", "b"]);
    }

    #[test]
    fn test_missing_soundfonts_are_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.sf2");
        std::fs::write(&present, b"RIFF").unwrap();

        let mut settings = Settings::default();
        settings.add_recent_soundfont(&dir.path().join("gone.sf2"));
        settings.add_recent_soundfont(&present);

        assert_eq!(settings.existing_recent_soundfonts(), vec![present.as_path()]);
        assert_eq!(settings.recent_soundfonts.len(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings {
            autoplay: true,
            ..Settings::default()
        };
        settings.add_recent_soundfont(Path::new("/fonts/gm.sf2"));
        settings.save_to(&path).unwrap();

        assert_eq!(Settings::load_from(&path), settings);
    }

    #[test]
    fn test_bad_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());

        // Missing fields take their defaults
        std::fs::write(&path, r#"{"cacophony_mode": true}"#).unwrap();
        let partial = Settings::load_from(&path);
        assert!(partial.cacophony_mode);
        assert!(!partial.autoplay);

        assert_eq!(
            Settings::load_from(dir.path().join("missing.json")),
            Settings::default()
        );
    }
}
