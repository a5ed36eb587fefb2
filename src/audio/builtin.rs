//! Built-in oscillator synthesizer used when no SoundFont is selected.
//!
//! Each General MIDI instrument family maps to a simple waveform and an
//! envelope shape, and channel 10 plays short noise bursts. The sound is
//! plain but every channel message the sequence carries (program, volume,
//! expression, pan, sustain, pitch bend) is honoured, so playback and
//! bounce behave the same as with a SoundFont.

use crate::midi::{ChannelMessage, CHANNEL_COUNT, PERCUSSION_CHANNEL};
use std::f32::consts::{FRAC_PI_2, TAU};

/// Output gain applied to every voice.
const MASTER_GAIN: f32 = 0.2;

/// Pitch bend range in semitones at full deflection.
const BEND_RANGE_SEMITONES: f32 = 2.0;

/// Voice level below which a releasing voice is removed.
const SILENCE: f32 = 1.0e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Waveform {
    Sine,
    Triangle,
    Square,
    Saw,
    Noise,
}

/// Per-family sound: waveform plus whether the note decays while held.
#[derive(Debug, Clone, Copy)]
struct Patch {
    waveform: Waveform,
    /// Seconds for a held note to fall by 60 dB, `None` to sustain.
    decay_secs: Option<f32>,
    release_secs: f32,
}

fn patch_for(channel: u8, program: u8) -> Patch {
    if channel == PERCUSSION_CHANNEL {
        return Patch {
            waveform: Waveform::Noise,
            decay_secs: Some(0.25),
            release_secs: 0.05,
        };
    }

    let (waveform, decay_secs, release_secs) = match program / 8 {
        0 | 1 => (Waveform::Triangle, Some(2.0), 0.3), // Piano, chromatic percussion
        2 => (Waveform::Square, None, 0.08),           // Organ
        3 | 4 => (Waveform::Saw, Some(1.5), 0.15),     // Guitar, bass
        5 | 6 | 11 => (Waveform::Saw, None, 0.4),      // Strings, ensemble, pads
        7 | 8 | 10 => (Waveform::Square, None, 0.1),   // Brass, reed, leads
        9 => (Waveform::Sine, None, 0.2),              // Pipe
        _ => (Waveform::Sine, Some(1.0), 0.2),         // Everything else
    };

    Patch {
        waveform,
        decay_secs,
        release_secs,
    }
}

/// Controller and program state for one MIDI channel.
#[derive(Debug, Clone, Copy)]
struct ChannelParams {
    program: u8,
    volume: u8,
    expression: u8,
    pan: u8,
    sustain: bool,
    bend: u16,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            program: 0,
            volume: 100,
            expression: 127,
            pan: 64,
            sustain: false,
            bend: 8192,
        }
    }
}

impl ChannelParams {
    fn gain(&self) -> f32 {
        (self.volume as f32 / 127.0) * (self.expression as f32 / 127.0)
    }

    /// Constant-power pan gains (left, right).
    fn pan_gains(&self) -> (f32, f32) {
        let theta = (self.pan.min(127) as f32 / 127.0) * FRAC_PI_2;
        (theta.cos(), theta.sin())
    }

    fn bend_ratio(&self) -> f32 {
        let semitones = (self.bend as f32 - 8192.0) / 8192.0 * BEND_RANGE_SEMITONES;
        2.0_f32.powf(semitones / 12.0)
    }

    fn reset_controllers(&mut self) {
        let program = self.program;
        *self = Self {
            program,
            ..Self::default()
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Attack,
    Hold,
    Release,
}

#[derive(Debug, Clone)]
struct Voice {
    channel: u8,
    key: u8,
    patch: Patch,
    freq: f32,
    phase: f32,
    velocity: f32,
    level: f32,
    stage: Stage,
    key_down: bool,
    sustained: bool,
    age: u64,
    noise: u32,
}

impl Voice {
    fn release(&mut self) {
        self.key_down = false;
        self.sustained = false;
        self.stage = Stage::Release;
    }

    fn is_finished(&self) -> bool {
        self.stage == Stage::Release && self.level < SILENCE
    }

    fn oscillate(&mut self, phase_step: f32) -> f32 {
        let value = match self.patch.waveform {
            Waveform::Sine => self.phase.sin(),
            Waveform::Triangle => {
                let t = self.phase / TAU;
                4.0 * (t - (t + 0.5).floor()).abs() - 1.0
            }
            Waveform::Square => {
                if self.phase < TAU / 2.0 {
                    0.6
                } else {
                    -0.6
                }
            }
            Waveform::Saw => (self.phase / TAU) * 1.2 - 0.6,
            Waveform::Noise => {
                // xorshift32
                self.noise ^= self.noise << 13;
                self.noise ^= self.noise >> 17;
                self.noise ^= self.noise << 5;
                (self.noise as f32 / u32::MAX as f32) * 2.0 - 1.0
            }
        };

        self.phase += phase_step;
        if self.phase >= TAU {
            self.phase -= TAU;
        }
        value
    }
}

/// Oscillator synthesizer with General MIDI-ish channel handling.
#[derive(Debug, Clone)]
pub struct BuiltinSynth {
    sample_rate: f32,
    max_voices: usize,
    channels: [ChannelParams; CHANNEL_COUNT],
    voices: Vec<Voice>,
    note_counter: u64,
}

impl BuiltinSynth {
    /// Creates a synthesizer rendering at `sample_rate` Hz.
    pub fn new(sample_rate: u32, max_voices: usize) -> Self {
        let max_voices = max_voices.max(8);
        Self {
            sample_rate: sample_rate as f32,
            max_voices,
            channels: [ChannelParams::default(); CHANNEL_COUNT],
            voices: Vec::with_capacity(max_voices),
            note_counter: 0,
        }
    }

    /// Applies one channel message.
    pub fn process(&mut self, channel: u8, message: ChannelMessage) {
        let ch = (channel as usize) % CHANNEL_COUNT;
        match message {
            ChannelMessage::NoteOn { key, velocity } => self.note_on(ch as u8, key, velocity),
            ChannelMessage::NoteOff { key } => self.note_off(ch as u8, key),
            ChannelMessage::ProgramChange { program } => self.channels[ch].program = program,
            ChannelMessage::PitchBend { value } => self.channels[ch].bend = value.min(16383),
            ChannelMessage::Controller { controller, value } => {
                self.controller(ch as u8, controller, value)
            }
        }
    }

    fn controller(&mut self, channel: u8, controller: u8, value: u8) {
        let params = &mut self.channels[channel as usize];
        match controller {
            7 => params.volume = value,
            10 => params.pan = value,
            11 => params.expression = value,
            64 => {
                params.sustain = value >= 64;
                if !params.sustain {
                    for voice in self.voices.iter_mut() {
                        if voice.channel == channel && voice.sustained {
                            voice.release();
                        }
                    }
                }
            }
            120 => self.voices.retain(|v| v.channel != channel), // All sound off
            121 => params.reset_controllers(),
            123 => {
                // All notes off
                for voice in self.voices.iter_mut().filter(|v| v.channel == channel) {
                    voice.release();
                }
            }
            _ => {}
        }
    }

    fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        self.note_counter = self.note_counter.wrapping_add(1);

        if self.voices.len() >= self.max_voices {
            if let Some((idx, _)) = self
                .voices
                .iter()
                .enumerate()
                .min_by_key(|(_, voice)| voice.age)
            {
                self.voices.swap_remove(idx);
            }
        }

        let params = self.channels[channel as usize];
        self.voices.push(Voice {
            channel,
            key,
            patch: patch_for(channel, params.program),
            freq: 440.0 * 2.0_f32.powf((key as f32 - 69.0) / 12.0),
            phase: 0.0,
            velocity: (velocity as f32 / 127.0).clamp(0.05, 1.0),
            level: 0.0,
            stage: Stage::Attack,
            key_down: true,
            sustained: false,
            age: self.note_counter,
            noise: 0x9E37_79B9 ^ ((key as u32) << 8 | channel as u32),
        });
    }

    fn note_off(&mut self, channel: u8, key: u8) {
        let sustain = self.channels[channel as usize].sustain;
        for voice in self.voices.iter_mut() {
            if voice.channel == channel && voice.key == key && voice.key_down {
                if sustain {
                    voice.key_down = false;
                    voice.sustained = true;
                } else {
                    voice.release();
                }
            }
        }
    }

    /// Releases every voice; `immediate` drops them without a release tail.
    pub fn note_off_all(&mut self, immediate: bool) {
        if immediate {
            self.voices.clear();
        } else {
            for voice in self.voices.iter_mut() {
                voice.release();
            }
        }
    }

    /// Silences all voices and restores every channel to power-on state.
    pub fn reset(&mut self) {
        self.voices.clear();
        self.channels = [ChannelParams::default(); CHANNEL_COUNT];
    }

    /// Number of voices currently sounding (including release tails).
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Renders into `left`/`right`, overwriting their contents.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        left.fill(0.0);
        right.fill(0.0);
        let frames = left.len().min(right.len());

        let attack_step = 1.0 / (0.005 * self.sample_rate);

        for voice in self.voices.iter_mut() {
            let params = self.channels[voice.channel as usize];
            let (pan_l, pan_r) = params.pan_gains();
            let gain = voice.velocity * params.gain() * MASTER_GAIN;
            let phase_step = TAU * voice.freq * params.bend_ratio() / self.sample_rate;

            let decay_coeff = voice
                .patch
                .decay_secs
                .map(|secs| (SILENCE.ln() / (secs * self.sample_rate)).exp());
            let release_coeff =
                (SILENCE.ln() / (voice.patch.release_secs * self.sample_rate)).exp();

            for i in 0..frames {
                match voice.stage {
                    Stage::Attack => {
                        voice.level += attack_step;
                        if voice.level >= 1.0 {
                            voice.level = 1.0;
                            voice.stage = Stage::Hold;
                        }
                    }
                    Stage::Hold => {
                        if let Some(coeff) = decay_coeff {
                            voice.level *= coeff;
                        }
                    }
                    Stage::Release => voice.level *= release_coeff,
                }

                let sample = voice.oscillate(phase_step) * voice.level * gain;
                left[i] += sample * pan_l;
                right[i] += sample * pan_r;
            }

            // A decaying note that has faded out is as good as released
            if voice.stage == Stage::Hold && voice.level < SILENCE {
                voice.stage = Stage::Release;
            }
        }

        self.voices.retain(|voice| !voice.is_finished());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44_100;

    fn render_frames(synth: &mut BuiltinSynth, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        synth.render(&mut left, &mut right);
        (left, right)
    }

    fn peak(buf: &[f32]) -> f32 {
        buf.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_note_produces_sound_and_releases() {
        let mut synth = BuiltinSynth::new(SR, 32);
        synth.process(0, ChannelMessage::NoteOn { key: 60, velocity: 100 });
        let (left, _) = render_frames(&mut synth, 1024);
        assert!(peak(&left) > 0.01);

        synth.process(0, ChannelMessage::NoteOff { key: 60 });
        render_frames(&mut synth, SR as usize);
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn test_sustain_pedal_holds_notes() {
        let mut synth = BuiltinSynth::new(SR, 32);
        synth.process(0, ChannelMessage::Controller { controller: 64, value: 127 });
        synth.process(0, ChannelMessage::ProgramChange { program: 16 }); // organ, no decay
        synth.process(0, ChannelMessage::NoteOn { key: 60, velocity: 100 });
        synth.process(0, ChannelMessage::NoteOff { key: 60 });
        render_frames(&mut synth, SR as usize);
        assert_eq!(synth.active_voices(), 1);

        synth.process(0, ChannelMessage::Controller { controller: 64, value: 0 });
        render_frames(&mut synth, SR as usize);
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn test_pan_hard_left() {
        let mut synth = BuiltinSynth::new(SR, 32);
        synth.process(0, ChannelMessage::Controller { controller: 10, value: 0 });
        synth.process(0, ChannelMessage::NoteOn { key: 60, velocity: 127 });
        let (left, right) = render_frames(&mut synth, 2048);
        assert!(peak(&left) > 0.01);
        assert!(peak(&right) < 1.0e-6);
    }

    #[test]
    fn test_voice_stealing_caps_polyphony() {
        let mut synth = BuiltinSynth::new(SR, 8);
        for key in 40..60 {
            synth.process(0, ChannelMessage::NoteOn { key, velocity: 90 });
        }
        assert_eq!(synth.active_voices(), 8);
    }

    #[test]
    fn test_reset_silences() {
        let mut synth = BuiltinSynth::new(SR, 32);
        synth.process(PERCUSSION_CHANNEL, ChannelMessage::NoteOn { key: 36, velocity: 100 });
        synth.reset();
        let (left, right) = render_frames(&mut synth, 256);
        assert_eq!(peak(&left), 0.0);
        assert_eq!(peak(&right), 0.0);
    }
}
