//! Synthetic MIDI files for tests, written with midly.

use midly::num::{u15, u24, u28, u4, u7};
use midly::{
    Format, Header, MetaMessage, MidiMessage, PitchBend, Smf, Timing, TrackEvent, TrackEventKind,
};
use std::path::{Path, PathBuf};

/// Ticks per quarter used by every fixture.
pub const TPQ: u32 = 480;

/// Builder for a Format 1 file. Track 0 holds tempo and end-of-track
/// events; channel `n` goes on track `n + 1`.
#[derive(Default)]
pub struct Fixture {
    tracks: Vec<Vec<(u32, TrackEventKind<'static>)>>,
    end_tick: u32,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            tracks: vec![Vec::new()],
            end_tick: 0,
        }
    }

    /// A steady stream of quarter notes on channel 0 at 120 BPM lasting
    /// exactly `seconds`.
    pub fn steady(seconds: u32) -> Self {
        let beats = seconds * 2;
        let mut fixture = Self::new().tempo(0, 500_000);
        for beat in 0..beats {
            fixture = fixture.note(0, beat * TPQ, 60 + (beat % 12) as u8, 90, TPQ / 2);
        }
        fixture.end_at(beats * TPQ)
    }

    fn push(&mut self, track: usize, tick: u32, kind: TrackEventKind<'static>) {
        while self.tracks.len() <= track {
            self.tracks.push(Vec::new());
        }
        self.tracks[track].push((tick, kind));
    }

    fn midi(mut self, channel: u8, tick: u32, message: MidiMessage) -> Self {
        self.push(
            channel as usize + 1,
            tick,
            TrackEventKind::Midi {
                channel: u4::new(channel),
                message,
            },
        );
        self
    }

    pub fn tempo(mut self, tick: u32, micros_per_quarter: u32) -> Self {
        self.push(
            0,
            tick,
            TrackEventKind::Meta(MetaMessage::Tempo(u24::new(micros_per_quarter))),
        );
        self
    }

    pub fn track_name(mut self, track: usize, name: &'static str) -> Self {
        self.push(
            track,
            0,
            TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
        );
        self
    }

    pub fn note(self, channel: u8, tick: u32, key: u8, velocity: u8, length: u32) -> Self {
        self.raw_note_on(channel, tick, key, velocity).midi(
            channel,
            tick + length,
            MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            },
        )
    }

    pub fn raw_note_on(self, channel: u8, tick: u32, key: u8, velocity: u8) -> Self {
        self.midi(
            channel,
            tick,
            MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(velocity),
            },
        )
    }

    pub fn program(self, channel: u8, tick: u32, program: u8) -> Self {
        self.midi(
            channel,
            tick,
            MidiMessage::ProgramChange {
                program: u7::new(program),
            },
        )
    }

    pub fn controller(self, channel: u8, tick: u32, controller: u8, value: u8) -> Self {
        self.midi(
            channel,
            tick,
            MidiMessage::Controller {
                controller: u7::new(controller),
                value: u7::new(value),
            },
        )
    }

    pub fn pitch_bend(self, channel: u8, tick: u32, value: u16) -> Self {
        self.midi(
            channel,
            tick,
            MidiMessage::PitchBend {
                bend: PitchBend(midly::num::u14::new(value)),
            },
        )
    }

    /// Places the conductor track's end-of-track event at `tick`.
    pub fn end_at(mut self, tick: u32) -> Self {
        self.end_tick = tick;
        self
    }

    /// Encodes the file as SMF bytes.
    pub fn bytes(&self) -> Vec<u8> {
        let mut smf = Smf::new(Header::new(
            Format::Parallel,
            Timing::Metrical(u15::new(TPQ as u16)),
        ));

        for (idx, events) in self.tracks.iter().enumerate() {
            let mut events = events.clone();
            events.sort_by_key(|(tick, _)| *tick);

            let last_tick = events.last().map(|(tick, _)| *tick).unwrap_or(0);
            let end = if idx == 0 {
                last_tick.max(self.end_tick)
            } else {
                last_tick
            };

            let mut track = Vec::with_capacity(events.len() + 1);
            let mut previous = 0;
            for (tick, kind) in events {
                track.push(TrackEvent {
                    delta: u28::new(tick - previous),
                    kind,
                });
                previous = tick;
            }
            track.push(TrackEvent {
                delta: u28::new(end - previous),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            });
            smf.tracks.push(track);
        }

        let mut out = Vec::new();
        smf.write_std(&mut out).expect("fixture encodes");
        out
    }

    /// Writes the file into `dir` and returns its path.
    pub fn save(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.bytes()).expect("fixture written");
        path
    }
}

/// A Format 2 file with one track.
pub fn sequential_smf_bytes() -> Vec<u8> {
    let mut smf = Smf::new(Header::new(
        Format::Sequential,
        Timing::Metrical(u15::new(TPQ as u16)),
    ));
    smf.tracks.push(vec![TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    }]);

    let mut out = Vec::new();
    smf.write_std(&mut out).expect("fixture encodes");
    out
}
