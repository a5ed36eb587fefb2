//! Instrument banks: a SoundFont file or the built-in default set.

use crate::error::{PlayerError, Result};
use rustysynth::SoundFont;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// General MIDI instrument families, eight programs each.
/// Used as instrument names by the built-in bank.
const GM_FAMILIES: [&str; 16] = [
    "Piano",
    "Chromatic Percussion",
    "Organ",
    "Guitar",
    "Bass",
    "Strings",
    "Ensemble",
    "Brass",
    "Reed",
    "Pipe",
    "Synth Lead",
    "Synth Pad",
    "Synth Effects",
    "Ethnic",
    "Percussive",
    "Sound Effects",
];

/// Container formats recognised by their RIFF form type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    SoundFont2,
    Dls,
    Unknown,
}

/// A set of instruments the synthesizer can play.
///
/// Banks are immutable after loading and shared by `Arc` between any number
/// of engines, so the realtime player and a bounce may read the same bank
/// concurrently.
pub enum Bank {
    /// The built-in oscillator instruments, used when no SoundFont is chosen.
    Default,
    /// A parsed SoundFont 2 file.
    SoundFont {
        path: PathBuf,
        font: Arc<SoundFont>,
        name: String,
        /// Preset names from bank 0, indexed by program number.
        instrument_names: Box<[String; 128]>,
    },
}

impl std::fmt::Debug for Bank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bank::Default => write!(f, "Bank::Default"),
            Bank::SoundFont { path, name, .. } => f
                .debug_struct("Bank::SoundFont")
                .field("path", path)
                .field("name", name)
                .finish(),
        }
    }
}

impl Bank {
    /// Loads a bank. `None` selects the built-in default instruments.
    ///
    /// # Errors
    ///
    /// - [`PlayerError::FileNotFound`] if the file does not exist
    /// - [`PlayerError::UnsupportedFormat`] for DLS or non-RIFF files
    /// - [`PlayerError::Parse`] if a SoundFont 2 file is malformed
    pub fn load(path: Option<&Path>) -> Result<Arc<Bank>> {
        let Some(path) = path else {
            return Ok(Arc::new(Bank::Default));
        };

        // Existence check first so a missing file is never reported as a
        // parse failure
        if !path.exists() {
            return Err(PlayerError::FileNotFound(path.to_path_buf()));
        }

        let file = File::open(path).map_err(|e| PlayerError::from_io(path, e))?;
        let mut file = BufReader::new(file);

        match sniff_container(&mut file).map_err(|e| PlayerError::from_io(path, e))? {
            Container::SoundFont2 => {}
            Container::Dls => {
                return Err(PlayerError::UnsupportedFormat(format!(
                    "{}: DLS banks cannot be synthesised, use a SoundFont 2 (.sf2) file",
                    path.display()
                )))
            }
            Container::Unknown => {
                return Err(PlayerError::UnsupportedFormat(format!(
                    "{}: not a SoundFont or DLS file",
                    path.display()
                )))
            }
        }

        let font = SoundFont::new(&mut file).map_err(|e| PlayerError::Parse {
            path: path.to_path_buf(),
            reason: format!("{:?}", e),
        })?;

        let bank_name = font.get_info().get_bank_name().trim().to_string();
        let name = if bank_name.is_empty() {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("SoundFont")
                .to_string()
        } else {
            bank_name
        };
        let instrument_names = Box::new(extract_instrument_names(&font));

        tracing::info!(
            "Loaded SoundFont {:?} ({} presets)",
            path,
            font.get_presets().len()
        );

        Ok(Arc::new(Bank::SoundFont {
            path: path.to_path_buf(),
            font: Arc::new(font),
            name,
            instrument_names,
        }))
    }

    /// The file this bank was loaded from, `None` for the default bank.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Bank::Default => None,
            Bank::SoundFont { path, .. } => Some(path),
        }
    }

    /// Display name of the bank.
    pub fn name(&self) -> &str {
        match self {
            Bank::Default => "Default",
            Bank::SoundFont { name, .. } => name,
        }
    }

    /// True for the built-in instruments.
    pub fn is_default(&self) -> bool {
        matches!(self, Bank::Default)
    }

    /// Returns the instrument name for a program number (0-127).
    pub fn instrument_name(&self, program: u8) -> String {
        let program = program.min(127);
        match self {
            Bank::Default => GM_FAMILIES[(program / 8) as usize].to_string(),
            Bank::SoundFont {
                instrument_names, ..
            } => instrument_names[program as usize].clone(),
        }
    }
}

/// Reads the RIFF header and rewinds the reader.
fn sniff_container<R: Read + Seek>(reader: &mut R) -> std::io::Result<Container> {
    let mut header = [0u8; 12];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    reader.seek(SeekFrom::Start(0))?;

    if filled < header.len() || &header[0..4] != b"RIFF" {
        return Ok(Container::Unknown);
    }

    Ok(match &header[8..12] {
        b"sfbk" => Container::SoundFont2,
        b"DLS " => Container::Dls,
        _ => Container::Unknown,
    })
}

/// Maps program numbers (0-127) to preset names from bank 0 (General MIDI
/// bank). Programs without a preset fall back to "Program N".
fn extract_instrument_names(font: &SoundFont) -> [String; 128] {
    let mut names: [String; 128] = std::array::from_fn(|i| format!("Program {}", i));

    for preset in font.get_presets() {
        let bank = preset.get_bank_number();
        let program = preset.get_patch_number();

        if bank == 0 && (0..128).contains(&program) {
            names[program as usize] = preset.get_name().to_string();
        }
    }

    names
}
