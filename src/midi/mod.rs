//! MIDI sequence representation.
//!
//! A [`Sequence`] is the merged, time-sorted event stream of a Standard MIDI
//! File together with its [`TempoMap`]. Sequences are immutable once built
//! and are shared between the realtime player and the bouncer by `Arc`.

use std::collections::HashSet;

mod loader;
mod tempo;

#[cfg(test)]
pub(crate) mod fixtures;

pub use loader::{load, parse};
pub use tempo::{TempoMap, Timebase, DEFAULT_MICROS_PER_QUARTER};

/// Number of MIDI channels.
pub const CHANNEL_COUNT: usize = 16;

/// Channel 10 (zero-based 9) is reserved for percussion in General MIDI.
pub const PERCUSSION_CHANNEL: u8 = 9;

/// A channel voice message, reduced to what the synthesizer consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMessage {
    /// Start a note. Velocity is always non-zero; zero-velocity note-ons
    /// are normalised to [`ChannelMessage::NoteOff`] by the loader.
    NoteOn { key: u8, velocity: u8 },
    /// Release a note.
    NoteOff { key: u8 },
    /// Control change (volume, pan, sustain, ...).
    Controller { controller: u8, value: u8 },
    /// Select the channel's instrument.
    ProgramChange { program: u8 },
    /// 14-bit pitch bend, 8192 = centre.
    PitchBend { value: u16 },
}

impl ChannelMessage {
    /// True for note-on and note-off, the only audible events.
    pub fn is_note(&self) -> bool {
        matches!(
            self,
            ChannelMessage::NoteOn { .. } | ChannelMessage::NoteOff { .. }
        )
    }

    /// Encodes the message as `(command, data1, data2)` for a synthesizer
    /// that takes raw MIDI bytes. The channel nibble is left to the caller.
    pub fn to_bytes(&self) -> (u8, u8, u8) {
        match *self {
            ChannelMessage::NoteOn { key, velocity } => (0x90, key, velocity),
            ChannelMessage::NoteOff { key } => (0x80, key, 0),
            ChannelMessage::Controller { controller, value } => (0xB0, controller, value),
            ChannelMessage::ProgramChange { program } => (0xC0, program, 0),
            ChannelMessage::PitchBend { value } => {
                (0xE0, (value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8)
            }
        }
    }

    /// Ordering among events on the same tick: state changes first so a
    /// note starts with its program and controllers applied, then
    /// releases, then new notes.
    fn priority(&self) -> u8 {
        match self {
            ChannelMessage::ProgramChange { .. }
            | ChannelMessage::Controller { .. }
            | ChannelMessage::PitchBend { .. } => 0,
            ChannelMessage::NoteOff { .. } => 1,
            ChannelMessage::NoteOn { .. } => 2,
        }
    }
}

/// Same-tick rank of a note-off ending a note that started on that tick.
const ZERO_LENGTH_NOTE_OFF: u8 = 3;

/// One timed event in a [`Sequence`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceEvent {
    /// Absolute tick from the start of the file.
    pub tick: u32,
    /// Absolute time in seconds at rate 1.0.
    pub time: f64,
    /// MIDI channel (0-15).
    pub channel: u8,
    /// The message itself.
    pub message: ChannelMessage,
}

impl SequenceEvent {
    /// Wall-clock time of this event when played at `rate`.
    pub fn wall_time(&self, rate: f64) -> f64 {
        self.time / rate
    }
}

/// A loaded MIDI file: events, tempo map and duration.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    events: Vec<SequenceEvent>,
    tempo_map: TempoMap,
    duration_ticks: u32,
    duration: f64,
    track_names: Vec<String>,
}

impl Sequence {
    /// Builds a sequence from unsorted `(tick, channel, message)` triples.
    ///
    /// Events are stably sorted by tick and same-tick priority. A note-off
    /// that follows a note-on for the same channel and key on the same tick
    /// closes that zero-length note, so it stays after it. The duration
    /// covers both the last event and `end_tick`, which the loader sets
    /// from end-of-track meta events.
    pub fn new(
        tempo_map: TempoMap,
        raw: Vec<(u32, u8, ChannelMessage)>,
        end_tick: u32,
        track_names: Vec<String>,
    ) -> Self {
        let mut started: HashSet<(u32, u8, u8)> = HashSet::new();
        let mut ranked: Vec<(u32, u8, ChannelMessage, u8)> = raw
            .into_iter()
            .map(|(tick, channel, message)| {
                let rank = match message {
                    ChannelMessage::NoteOn { key, .. } => {
                        started.insert((tick, channel & 0x0F, key));
                        message.priority()
                    }
                    ChannelMessage::NoteOff { key }
                        if started.contains(&(tick, channel & 0x0F, key)) =>
                    {
                        ZERO_LENGTH_NOTE_OFF
                    }
                    _ => message.priority(),
                };
                (tick, channel, message, rank)
            })
            .collect();
        ranked.sort_by_key(|(tick, _, _, rank)| (*tick, *rank));

        let duration_ticks = ranked
            .last()
            .map(|(tick, _, _, _)| *tick)
            .unwrap_or(0)
            .max(end_tick);

        let events = ranked
            .into_iter()
            .map(|(tick, channel, message, _)| SequenceEvent {
                tick,
                time: tempo_map.tick_to_seconds(tick),
                channel: channel & 0x0F,
                message,
            })
            .collect();

        let duration = tempo_map.tick_to_seconds(duration_ticks);

        Self {
            events,
            tempo_map,
            duration_ticks,
            duration,
            track_names,
        }
    }

    /// All events in playback order.
    pub fn events(&self) -> &[SequenceEvent] {
        &self.events
    }

    /// The tempo map used to derive event times.
    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    /// Length in ticks.
    pub fn duration_ticks(&self) -> u32 {
        self.duration_ticks
    }

    /// Length in seconds at rate 1.0.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Length in wall-clock seconds when played at `rate`.
    pub fn wall_duration(&self, rate: f64) -> f64 {
        self.duration / rate
    }

    /// Names from track-name meta events, in file order.
    pub fn track_names(&self) -> &[String] {
        &self.track_names
    }

    /// True when the file contains no channel events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Index of the first event whose time is at or after `seconds`.
    pub fn first_event_at_or_after(&self, seconds: f64) -> usize {
        self.events.partition_point(|e| e.time < seconds)
    }
}

/// Formats seconds as `m:ss`, the way transport displays show positions.
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
