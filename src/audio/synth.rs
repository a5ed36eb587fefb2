//! Synthesizer backends behind one enum.
//!
//! A SoundFont bank renders through rustysynth; the default bank renders
//! through [`BuiltinSynth`]. The engine only ever talks to [`Synth`].

use super::bank::Bank;
use super::builtin::BuiltinSynth;
use crate::error::{PlayerError, Result};
use crate::midi::ChannelMessage;
use rustysynth::{Synthesizer, SynthesizerSettings};

/// Maximum simultaneous voices for either backend.
pub const MAX_VOICES: usize = 64;

/// A synthesizer instance bound to one bank.
pub enum Synth {
    SoundFont(Box<Synthesizer>),
    Builtin(BuiltinSynth),
}

impl Synth {
    /// Creates a synthesizer for `bank` rendering at `sample_rate` Hz.
    pub fn for_bank(bank: &Bank, sample_rate: u32) -> Result<Self> {
        match bank {
            Bank::Default => Ok(Synth::Builtin(BuiltinSynth::new(sample_rate, MAX_VOICES))),
            Bank::SoundFont { font, .. } => {
                let mut settings = SynthesizerSettings::new(sample_rate as i32);
                settings.maximum_polyphony = MAX_VOICES;
                let synth = Synthesizer::new(font, &settings)
                    .map_err(|e| PlayerError::Synth(format!("{:?}", e)))?;
                Ok(Synth::SoundFont(Box::new(synth)))
            }
        }
    }

    /// Sends one channel message to the synthesizer.
    pub fn process(&mut self, channel: u8, message: ChannelMessage) {
        match self {
            Synth::SoundFont(synth) => {
                let (command, data1, data2) = message.to_bytes();
                synth.process_midi_message(
                    channel as i32,
                    command as i32,
                    data1 as i32,
                    data2 as i32,
                );
            }
            Synth::Builtin(synth) => synth.process(channel, message),
        }
    }

    /// Renders `left.len()` frames, overwriting both buffers.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        match self {
            Synth::SoundFont(synth) => synth.render(left, right),
            Synth::Builtin(synth) => synth.render(left, right),
        }
    }

    /// Stops all notes; `immediate` skips the release stage.
    pub fn note_off_all(&mut self, immediate: bool) {
        match self {
            Synth::SoundFont(synth) => synth.note_off_all(immediate),
            Synth::Builtin(synth) => synth.note_off_all(immediate),
        }
    }

    /// Kills every voice and resets all controllers and programs.
    pub fn reset(&mut self) {
        match self {
            Synth::SoundFont(synth) => synth.reset(),
            Synth::Builtin(synth) => synth.reset(),
        }
    }
}
