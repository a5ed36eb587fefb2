//! Synthesis engine: turns a [`Sequence`] into audio.
//!
//! The engine owns a synthesizer, a cursor into the sequence and a mirror
//! of every channel's program and controller state. Rendering dispatches
//! due events and advances the sequence position by
//! `frames / sample_rate × rate`, so the rate changes how fast events are
//! consumed without changing pitch.
//!
//! Seeking rebuilds state rather than skipping time: the synthesizer is
//! reset (no voice survives), then every program, controller and pitch
//! bend event before the target is replayed silently. The result is the
//! same channel state linear playback would have reached, in either seek
//! direction.

use super::bank::Bank;
use super::synth::Synth;
use crate::error::Result;
use crate::midi::{ChannelMessage, Sequence, SequenceEvent, CHANNEL_COUNT};
use std::sync::Arc;

/// Sample rate for audio synthesis (44.1 kHz standard).
pub const SAMPLE_RATE: u32 = 44100;

/// Frames rendered between event dispatches. Matches rustysynth's internal
/// block, giving about 1.5 ms event resolution at 44.1 kHz.
const SUB_BLOCK: usize = 64;

/// Engine construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub sample_rate: u32,
    /// Initial playback rate.
    pub rate: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            rate: 1.0,
        }
    }
}

/// Program, controller and pitch bend state of one MIDI channel, as seen
/// by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    pub program: u8,
    /// 14-bit pitch bend, 8192 = centre.
    pub pitch_bend: u16,
    /// Last value of every controller number.
    pub controllers: [u8; 128],
}

impl Default for ChannelState {
    fn default() -> Self {
        let mut controllers = [0u8; 128];
        controllers[7] = 100; // Volume
        controllers[10] = 64; // Pan (centre)
        controllers[11] = 127; // Expression
        Self {
            program: 0,
            pitch_bend: 8192,
            controllers,
        }
    }
}

impl ChannelState {
    /// Applies a state-affecting message. Notes are ignored.
    pub fn apply(&mut self, message: &ChannelMessage) {
        match *message {
            ChannelMessage::ProgramChange { program } => self.program = program,
            ChannelMessage::PitchBend { value } => self.pitch_bend = value,
            ChannelMessage::Controller {
                controller: 121, ..
            } => {
                // Reset all controllers keeps volume and pan
                let volume = self.controllers[7];
                let pan = self.controllers[10];
                let program = self.program;
                *self = Self {
                    program,
                    ..Self::default()
                };
                self.controllers[7] = volume;
                self.controllers[10] = pan;
            }
            ChannelMessage::Controller { controller, value } => {
                self.controllers[(controller & 0x7F) as usize] = value;
            }
            ChannelMessage::NoteOn { .. } | ChannelMessage::NoteOff { .. } => {}
        }
    }

    pub fn volume(&self) -> u8 {
        self.controllers[7]
    }

    pub fn pan(&self) -> u8 {
        self.controllers[10]
    }

    pub fn expression(&self) -> u8 {
        self.controllers[11]
    }

    pub fn sustain(&self) -> bool {
        self.controllers[64] >= 64
    }
}

/// A block of rendered stereo audio.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl SampleBuffer {
    /// Creates a silent buffer of `frames` frames.
    pub fn silent(frames: usize) -> Self {
        Self {
            left: vec![0.0; frames],
            right: vec![0.0; frames],
        }
    }

    pub fn frames(&self) -> usize {
        self.left.len()
    }

    /// Interleaves the channels: L, R, L, R, ...
    pub fn interleaved(&self) -> Vec<f32> {
        self.left
            .iter()
            .zip(&self.right)
            .flat_map(|(l, r)| [*l, *r])
            .collect()
    }

    /// Largest absolute sample value in either channel.
    pub fn peak(&self) -> f32 {
        self.left
            .iter()
            .chain(&self.right)
            .fold(0.0f32, |m, s| m.max(s.abs()))
    }
}

/// Stateful renderer for one sequence and bank.
pub struct SynthEngine {
    sequence: Arc<Sequence>,
    bank: Arc<Bank>,
    synth: Synth,
    channels: [ChannelState; CHANNEL_COUNT],
    sample_rate: u32,
    rate: f64,
    /// Position on the sequence timeline in seconds (rate 1.0 time).
    position: f64,
    /// Index of the next event to dispatch.
    cursor: usize,
}

impl SynthEngine {
    /// Creates an engine positioned at the start of `sequence`.
    pub fn new(sequence: Arc<Sequence>, bank: Arc<Bank>, settings: EngineSettings) -> Result<Self> {
        let synth = Synth::for_bank(&bank, settings.sample_rate)?;
        let mut engine = Self {
            sequence,
            bank,
            synth,
            channels: [ChannelState::default(); CHANNEL_COUNT],
            sample_rate: settings.sample_rate,
            rate: 1.0,
            position: 0.0,
            cursor: 0,
        };
        engine.set_rate(settings.rate);
        Ok(engine)
    }

    /// Renders into `left` and `right`, advancing the sequence.
    ///
    /// Allocation-free; this is what the realtime output calls.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        let mut done = 0;

        while done < frames {
            self.dispatch_due();

            let n = (frames - done).min(SUB_BLOCK);
            self.synth
                .render(&mut left[done..done + n], &mut right[done..done + n]);
            self.position += n as f64 / self.sample_rate as f64 * self.rate;
            done += n;
        }
    }

    /// Renders sounding voices without dispatching events or moving the
    /// position. Lets release tails ring out while paused or after the end.
    pub fn render_tail(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        self.synth.render(&mut left[..frames], &mut right[..frames]);
    }

    /// Synthesises the next `frames` frames into a new buffer.
    pub fn advance(&mut self, frames: usize) -> SampleBuffer {
        let mut buffer = SampleBuffer::silent(frames);
        self.render(&mut buffer.left, &mut buffer.right);
        buffer
    }

    /// Moves to `target` seconds, rebuilding channel state from scratch.
    ///
    /// Valid in both directions. The target is clamped to
    /// `[0, duration]`. Events exactly at the target are left for the next
    /// render so notes starting there still sound.
    pub fn seek(&mut self, target: f64) {
        let target = target.clamp(0.0, self.sequence.duration());

        self.synth.reset();
        self.channels = [ChannelState::default(); CHANNEL_COUNT];

        let sequence = Arc::clone(&self.sequence);
        let end = sequence.first_event_at_or_after(target);
        let mut replayed = 0usize;
        for event in &sequence.events()[..end] {
            if !event.message.is_note() {
                self.apply(event);
                replayed += 1;
            }
        }

        self.cursor = end;
        self.position = target;

        tracing::debug!("Seeked to {:.3}s, replayed {} state events", target, replayed);
    }

    /// Sets the playback rate. Non-positive or non-finite rates are ignored.
    pub fn set_rate(&mut self, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.rate = rate;
        } else {
            tracing::warn!("Ignoring invalid playback rate {}", rate);
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Current position on the sequence timeline, in seconds.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Length of the sequence in seconds at rate 1.0.
    pub fn duration(&self) -> f64 {
        self.sequence.duration()
    }

    /// True once the position has reached the end of the sequence.
    pub fn is_finished(&self) -> bool {
        self.position >= self.sequence.duration()
    }

    /// Engine-visible state of `channel`.
    pub fn channel_state(&self, channel: u8) -> ChannelState {
        self.channels[(channel as usize) % CHANNEL_COUNT]
    }

    /// Releases every sounding note without touching channel state.
    pub fn all_notes_off(&mut self, immediate: bool) {
        self.synth.note_off_all(immediate);
    }

    pub fn sequence(&self) -> &Arc<Sequence> {
        &self.sequence
    }

    pub fn bank(&self) -> &Arc<Bank> {
        &self.bank
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn dispatch_due(&mut self) {
        while let Some(event) = self.sequence.events().get(self.cursor).copied() {
            if event.time > self.position {
                break;
            }
            self.apply(&event);
            self.cursor += 1;
        }
    }

    fn apply(&mut self, event: &SequenceEvent) {
        self.channels[event.channel as usize % CHANNEL_COUNT].apply(&event.message);
        self.synth.process(event.channel, event.message);
    }
}
