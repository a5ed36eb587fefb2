//! Audio output: the device seam and the realtime sample source.
//!
//! [`EngineSource`] pulls audio from a shared [`SynthEngine`] one buffer at
//! a time and is the player's clock: it emits position reports and detects
//! the end of the sequence. An [`AudioOutput`] decides who pulls it, either
//! the default device through rodio or a background thread.

use super::engine::SynthEngine;
use super::player::{PlaybackState, SharedState};
use crate::error::{PlayerError, Result};
use crate::events::PlayerEvent;
use crossbeam_channel::Sender;
use rodio::{OutputStream, OutputStreamHandle, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Position reports are skipped while this many events are still unread.
const MAX_PENDING_EVENTS: usize = 64;

/// Something that can pull an [`EngineSource`] in real time.
pub trait AudioOutput {
    /// Starts pulling `source`, replacing any previous one.
    fn start(&mut self, source: EngineSource) -> Result<()>;

    /// Stops pulling and releases the device.
    fn stop(&mut self);

    /// True while an attached source is still being pulled.
    fn is_running(&self) -> bool;
}

/// Audio source that renders the player's engine.
/// Implements rodio's Source trait for playback.
pub struct EngineSource {
    engine: Arc<Mutex<SynthEngine>>,
    shared: Arc<SharedState>,
    events: Sender<PlayerEvent>,
    sample_rate: u32,
    /// Left channel buffer.
    left_buf: Vec<f32>,
    /// Right channel buffer.
    right_buf: Vec<f32>,
    /// Current position in the buffer.
    buf_pos: usize,
    /// Current channel (0 = left, 1 = right).
    channel: usize,
    /// Frames between position reports.
    report_frames: usize,
    frames_since_report: usize,
    /// Set once the end has been rendered; the stream ends after the
    /// current buffer drains.
    finished: bool,
    /// Cleared once the stream has ended or the source was dropped.
    alive: Arc<AtomicBool>,
}

impl EngineSource {
    pub(crate) fn new(
        engine: Arc<Mutex<SynthEngine>>,
        shared: Arc<SharedState>,
        events: Sender<PlayerEvent>,
        buffer_frames: usize,
        position_interval: Duration,
    ) -> Self {
        let sample_rate = engine
            .lock()
            .map(|engine| engine.sample_rate())
            .unwrap_or(super::engine::SAMPLE_RATE);
        let buffer_frames = buffer_frames.max(1);
        let report_frames =
            ((position_interval.as_secs_f64() * sample_rate as f64) as usize).max(1);

        Self {
            engine,
            shared,
            events,
            sample_rate,
            left_buf: vec![0.0; buffer_frames],
            right_buf: vec![0.0; buffer_frames],
            buf_pos: buffer_frames, // Start at end to trigger first render
            channel: 0,
            report_frames,
            frames_since_report: 0,
            finished: false,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag that stays true until this source stops producing samples.
    pub(crate) fn alive(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    /// Renders the next buffer. Holds the engine lock for the whole buffer
    /// so seeks never interleave with a render.
    fn fill(&mut self) {
        let Ok(mut engine) = self.engine.lock() else {
            self.left_buf.fill(0.0);
            self.right_buf.fill(0.0);
            return;
        };

        if self.shared.state() != PlaybackState::Playing {
            // Let released voices decay while paused
            engine.render_tail(&mut self.left_buf, &mut self.right_buf);
            return;
        }

        engine.render(&mut self.left_buf, &mut self.right_buf);
        self.frames_since_report += self.left_buf.len();

        let duration = engine.duration();
        if engine.is_finished() {
            if self.shared.finish_from(PlaybackState::Playing) {
                let _ = self.events.send(PlayerEvent::PositionChanged {
                    position: duration,
                    duration,
                });
                let _ = self.events.send(PlayerEvent::PlaybackEnded);
            }
            self.finished = true;
        } else if self.frames_since_report >= self.report_frames {
            self.frames_since_report = 0;
            if self.events.len() >= MAX_PENDING_EVENTS {
                return;
            }
            let _ = self.events.send(PlayerEvent::PositionChanged {
                position: engine.position().min(duration),
                duration,
            });
        }
    }
}

impl Iterator for EngineSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.buf_pos >= self.left_buf.len() {
            if self.finished {
                self.alive.store(false, Ordering::SeqCst);
                return None;
            }
            self.fill();
            self.buf_pos = 0;
        }

        // Interleave stereo samples: L, R, L, R, ...
        let sample = if self.channel == 0 {
            self.left_buf[self.buf_pos]
        } else {
            self.right_buf[self.buf_pos]
        };

        self.channel = 1 - self.channel;
        if self.channel == 0 {
            self.buf_pos += 1;
        }

        Some(sample)
    }
}

impl Drop for EngineSource {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Source for EngineSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Plays through the default output device.
#[derive(Default)]
pub struct RodioOutput {
    /// Audio output stream and its handle (the stream must be kept alive).
    stream: Option<(OutputStream, OutputStreamHandle)>,
    /// Liveness of the source handed to the stream.
    source_alive: Option<Arc<AtomicBool>>,
}

impl RodioOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioOutput for RodioOutput {
    fn start(&mut self, source: EngineSource) -> Result<()> {
        self.stop();

        let alive = source.alive();
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| PlayerError::Device(format!("Failed to open audio output: {}", e)))?;
        handle
            .play_raw(source)
            .map_err(|e| PlayerError::Device(format!("Failed to start audio playback: {}", e)))?;

        tracing::debug!("Audio output started");
        self.stream = Some((stream, handle));
        self.source_alive = Some(alive);
        Ok(())
    }

    fn stop(&mut self) {
        self.source_alive = None;
        if self.stream.take().is_some() {
            tracing::debug!("Audio output closed");
        }
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
            && self
                .source_alive
                .as_ref()
                .is_some_and(|alive| alive.load(Ordering::SeqCst))
    }
}

/// Pulls the source from a background thread instead of a device.
///
/// With a `speedup` the thread sleeps so that audio is consumed `speedup`
/// times faster than real time; without one it runs flat out. Used by
/// tests and by the `--no-audio` flag.
pub struct HeadlessOutput {
    speedup: Option<f64>,
    buffer_frames: usize,
    unavailable: bool,
    worker: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl HeadlessOutput {
    /// Consumes audio `speedup` times faster than real time.
    pub fn new(speedup: f64) -> Self {
        Self::build((speedup.is_finite() && speedup > 0.0).then_some(speedup), false)
    }

    /// Consumes audio as fast as the engine renders it.
    pub fn unthrottled() -> Self {
        Self::build(None, false)
    }

    /// An output whose device can never be opened.
    pub fn unavailable() -> Self {
        Self::build(None, true)
    }

    fn build(speedup: Option<f64>, unavailable: bool) -> Self {
        Self {
            speedup,
            buffer_frames: 512,
            unavailable,
            worker: None,
        }
    }
}

impl AudioOutput for HeadlessOutput {
    fn start(&mut self, mut source: EngineSource) -> Result<()> {
        self.stop();

        if self.unavailable {
            return Err(PlayerError::Device("no output device available".to_string()));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let samples = self.buffer_frames * 2;
        let pause = self.speedup.map(|speedup| {
            Duration::from_secs_f64(self.buffer_frames as f64 / source.sample_rate() as f64 / speedup)
        });

        let handle = std::thread::Builder::new()
            .name("headless-output".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    if source.by_ref().take(samples).count() < samples {
                        break;
                    }
                    match pause {
                        Some(pause) => std::thread::sleep(pause),
                        None => std::thread::yield_now(),
                    }
                }
            })
            .map_err(|e| PlayerError::Device(e.to_string()))?;

        self.worker = Some((stop, handle));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some((stop, handle)) = self.worker.take() {
            stop.store(true, Ordering::Relaxed);
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }
}

impl Drop for HeadlessOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
