//! Standard MIDI File (SMF) loading.
//!
//! Parses .mid files into a [`Sequence`]: every track's channel events are
//! merged into one time-sorted stream and tempo meta events become the
//! [`TempoMap`].
//!
//! # Supported input
//!
//! - SMF Format 0 (single track) and Format 1 (parallel tracks)
//! - Metrical (ticks per quarter) and SMPTE timecode timing
//! - Note on/off, control change, program change and pitch bend
//!
//! Aftertouch, SysEx and other meta events are skipped. Format 2
//! (sequential) files are rejected as unsupported.

use super::{ChannelMessage, Sequence, TempoMap, Timebase};
use crate::error::{PlayerError, Result};
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::fs;
use std::path::Path;

/// Raw events collected while walking the tracks: (tick, channel, message).
type RawEvents = Vec<(u32, u8, ChannelMessage)>;

/// Everything gathered from the tracks before the sequence is assembled.
#[derive(Default)]
struct Collected {
    events: RawEvents,
    tempo_changes: Vec<(u32, u32)>,
    track_names: Vec<String>,
    end_tick: u32,
}

/// Loads a MIDI file from disk.
///
/// # Errors
///
/// - [`PlayerError::FileNotFound`] if `path` does not exist
/// - [`PlayerError::Io`] for other read failures
/// - [`PlayerError::Parse`] if the header or a track chunk is malformed
/// - [`PlayerError::UnsupportedFormat`] for Format 2 files
pub fn load<P: AsRef<Path>>(path: P) -> Result<Sequence> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|e| PlayerError::from_io(path, e))?;
    let sequence = parse(&data, path)?;

    tracing::debug!(
        "Loaded {:?}: {} events, {:.2}s",
        path,
        sequence.events().len(),
        sequence.duration()
    );

    Ok(sequence)
}

/// Parses SMF bytes. `path` is only used for error messages.
pub fn parse(data: &[u8], path: &Path) -> Result<Sequence> {
    let smf = Smf::parse(data).map_err(|e| PlayerError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let timebase = match smf.header.timing {
        Timing::Metrical(tpq) => {
            let ticks_per_quarter = tpq.as_int();
            if ticks_per_quarter == 0 {
                return Err(PlayerError::Parse {
                    path: path.to_path_buf(),
                    reason: "header declares zero ticks per quarter note".to_string(),
                });
            }
            Timebase::Metrical { ticks_per_quarter }
        }
        Timing::Timecode(fps, subframes) => {
            let ticks_per_second = fps.as_f32() as f64 * subframes as f64;
            if ticks_per_second <= 0.0 {
                return Err(PlayerError::Parse {
                    path: path.to_path_buf(),
                    reason: "header declares zero SMPTE subframes".to_string(),
                });
            }
            Timebase::Timecode { ticks_per_second }
        }
    };

    if smf.header.format == Format::Sequential {
        return Err(PlayerError::UnsupportedFormat(
            "Format 2 (sequential) MIDI files are not supported".to_string(),
        ));
    }

    let mut collected = Collected::default();
    for track in &smf.tracks {
        parse_track(track, &mut collected).map_err(|reason| PlayerError::Parse {
            path: path.to_path_buf(),
            reason,
        })?;
    }

    let tempo_map = TempoMap::from_changes(timebase, &collected.tempo_changes);
    Ok(Sequence::new(
        tempo_map,
        collected.events,
        collected.end_tick,
        collected.track_names,
    ))
}

/// Walks one track, appending its events with absolute ticks.
fn parse_track(
    track: &[midly::TrackEvent],
    collected: &mut Collected,
) -> std::result::Result<(), String> {
    // Current absolute tick position
    let mut current_tick: u32 = 0;

    for event in track {
        current_tick = current_tick
            .checked_add(event.delta.as_int())
            .ok_or_else(|| "track length overflows 32-bit tick counter".to_string())?;
        collected.end_tick = collected.end_tick.max(current_tick);

        match event.kind {
            TrackEventKind::Meta(meta) => match meta {
                MetaMessage::TrackName(name_bytes) => {
                    if let Ok(name) = std::str::from_utf8(name_bytes) {
                        let name = name.trim();
                        if !name.is_empty() {
                            collected.track_names.push(name.to_string());
                        }
                    }
                }
                MetaMessage::Tempo(tempo_val) => {
                    // tempo_val is microseconds per quarter note
                    let usec_per_beat = tempo_val.as_int();
                    if usec_per_beat > 0 {
                        collected.tempo_changes.push((current_tick, usec_per_beat));
                    }
                }
                _ => {} // End of track already counted via end_tick
            },
            TrackEventKind::Midi { channel, message } => {
                let ch = channel.as_int();
                let converted = match message {
                    MidiMessage::NoteOn { key, vel } => {
                        if vel.as_int() > 0 {
                            Some(ChannelMessage::NoteOn {
                                key: key.as_int(),
                                velocity: vel.as_int(),
                            })
                        } else {
                            // Note on with velocity 0 = note off
                            Some(ChannelMessage::NoteOff { key: key.as_int() })
                        }
                    }
                    MidiMessage::NoteOff { key, vel: _ } => {
                        Some(ChannelMessage::NoteOff { key: key.as_int() })
                    }
                    MidiMessage::Controller { controller, value } => {
                        Some(ChannelMessage::Controller {
                            controller: controller.as_int(),
                            value: value.as_int(),
                        })
                    }
                    MidiMessage::ProgramChange { program } => Some(ChannelMessage::ProgramChange {
                        program: program.as_int(),
                    }),
                    MidiMessage::PitchBend { bend } => Some(ChannelMessage::PitchBend {
                        value: bend.0.as_int(),
                    }),
                    _ => None, // Aftertouch is not synthesised
                };

                if let Some(message) = converted {
                    collected.events.push((current_tick, ch, message));
                }
            }
            _ => {} // Ignore SysEx and escapes
        }
    }

    Ok(())
}
