//! Offline rendering ("bouncing") of a MIDI file to WAV.
//!
//! A bounce runs on its own thread with its own sequence, bank and engine,
//! so it never touches the realtime player's state. Progress and the final
//! outcome arrive over a channel; cancellation is cooperative and checked
//! before every block.

use super::bank::Bank;
use super::engine::{EngineSettings, SynthEngine, SAMPLE_RATE};
use crate::error::{PlayerError, Result};
use crate::events::{BounceEvent, BounceOutcome};
use crate::midi;
use crossbeam_channel::{Receiver, Sender};
use hound::{WavSpec, WavWriter};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Sample encoding of the bounced file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// 16-bit signed integer PCM.
    #[default]
    Int16,
    /// 32-bit IEEE float.
    Float32,
}

/// Render parameters for a bounce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BounceConfig {
    pub sample_rate: u32,
    /// Frames rendered per block (and per cancellation check).
    pub block_frames: usize,
    /// Blocks between progress events.
    pub progress_interval_blocks: usize,
    /// Wall-clock seconds rendered after the end so releases ring out.
    pub tail_seconds: f64,
    /// 1 (mono mixdown) or 2.
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl Default for BounceConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            block_frames: 4096,
            progress_interval_blocks: 8,
            tail_seconds: 2.0,
            channels: 2,
            sample_format: SampleFormat::Int16,
        }
    }
}

/// What to bounce and where.
#[derive(Debug, Clone, PartialEq)]
pub struct BounceRequest {
    pub midi: PathBuf,
    pub soundfont: Option<PathBuf>,
    pub destination: PathBuf,
    pub rate: f64,
    pub config: BounceConfig,
}

/// Shared cancellation flag.
///
/// Progress is emitted while holding the gate and [`CancelToken::cancel`]
/// takes the same gate before raising the flag, so once `cancel` returns no
/// further progress can be observed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    gate: Mutex<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        let _gate = self.inner.gate.lock();
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Runs `emit` unless cancellation has been requested. Returns whether
    /// it ran.
    fn emit_unless_cancelled(&self, emit: impl FnOnce()) -> bool {
        let _gate = self.inner.gate.lock();
        if self.is_cancelled() {
            return false;
        }
        emit();
        true
    }
}

/// Starts bounces.
pub struct Bouncer {
    request: BounceRequest,
}

impl Bouncer {
    pub fn new(request: BounceRequest) -> Self {
        Self { request }
    }

    /// Spawns the render thread and returns a handle to it.
    pub fn start(self) -> Result<BounceHandle> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let destination = self.request.destination.clone();
        let request = self.request;

        tracing::info!(
            "Bouncing {:?} to {:?} at {:.2}x",
            request.midi,
            request.destination,
            request.rate
        );

        let thread = std::thread::Builder::new()
            .name("bounce".to_string())
            .spawn(move || run(&request, &worker_cancel, &tx))
            .map_err(|e| PlayerError::Io(format!("failed to spawn bounce thread: {}", e)))?;

        Ok(BounceHandle {
            cancel,
            events: rx,
            thread: Some(thread),
            destination,
        })
    }
}

/// Handle to a running bounce.
pub struct BounceHandle {
    cancel: CancelToken,
    events: Receiver<BounceEvent>,
    thread: Option<JoinHandle<BounceOutcome>>,
    destination: PathBuf,
}

impl BounceHandle {
    /// Requests cancellation. No progress event is delivered after this
    /// returns; the terminal event still is.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("Cancelling bounce to {:?}", self.destination);
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Progress and terminal events of this bounce.
    pub fn events(&self) -> &Receiver<BounceEvent> {
        &self.events
    }

    /// Check if the bounce thread has finished (non-blocking).
    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| t.is_finished())
            .unwrap_or(true)
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Blocks until the render thread exits and returns its outcome.
    pub fn wait(mut self) -> BounceOutcome {
        self.join()
    }

    fn join(&mut self) -> BounceOutcome {
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                BounceOutcome::Failed(PlayerError::Io("bounce thread panicked".to_string()))
            }),
            None => BounceOutcome::Failed(PlayerError::InternalState(
                "bounce already joined".to_string(),
            )),
        }
    }
}

impl Drop for BounceHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel.cancel();
            let _ = self.join();
        }
    }
}

/// Thread body: renders, then sends exactly one terminal event.
fn run(request: &BounceRequest, cancel: &CancelToken, tx: &Sender<BounceEvent>) -> BounceOutcome {
    let outcome = match render(request, cancel, tx) {
        Ok(true) => BounceOutcome::Completed,
        Ok(false) | Err(PlayerError::Cancelled) => BounceOutcome::Cancelled,
        Err(e) => BounceOutcome::Failed(e),
    };

    let terminal = match &outcome {
        BounceOutcome::Completed => {
            tracing::info!("Bounce to {:?} completed", request.destination);
            BounceEvent::Completed { cancelled: false }
        }
        BounceOutcome::Cancelled => {
            tracing::info!("Bounce to {:?} cancelled", request.destination);
            BounceEvent::Completed { cancelled: true }
        }
        BounceOutcome::Failed(e) => {
            tracing::error!("Bounce to {:?} failed: {}", request.destination, e);
            BounceEvent::Error(e.clone())
        }
    };
    let _ = tx.send(terminal);

    outcome
}

/// Renders the whole file. Returns `Ok(false)` when cancelled; the partial
/// file is still finalised.
fn render(request: &BounceRequest, cancel: &CancelToken, tx: &Sender<BounceEvent>) -> Result<bool> {
    let config = &request.config;
    if !(config.channels == 1 || config.channels == 2) {
        return Err(PlayerError::UnsupportedFormat(format!(
            "{} output channels",
            config.channels
        )));
    }

    let sequence = Arc::new(midi::load(&request.midi)?);
    let bank = Bank::load(request.soundfont.as_deref())?;
    let mut engine = SynthEngine::new(
        sequence,
        bank,
        EngineSettings {
            sample_rate: config.sample_rate,
            rate: request.rate,
        },
    )?;
    let rate = engine.rate();
    let duration = engine.duration();
    let sample_rate = config.sample_rate as f64;

    let spec = WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: match config.sample_format {
            SampleFormat::Int16 => 16,
            SampleFormat::Float32 => 32,
        },
        sample_format: match config.sample_format {
            SampleFormat::Int16 => hound::SampleFormat::Int,
            SampleFormat::Float32 => hound::SampleFormat::Float,
        },
    };
    let mut writer = WavWriter::create(&request.destination, spec)
        .map_err(|e| PlayerError::Io(format!("{}: {}", request.destination.display(), e)))?;

    let block_frames = config.block_frames.max(1);
    let progress_interval = config.progress_interval_blocks.max(1);
    let mut left = vec![0.0f32; block_frames];
    let mut right = vec![0.0f32; block_frames];
    let mut blocks = 0usize;
    let mut rendered_frames = 0usize;
    let mut cancelled = false;

    while !engine.is_finished() {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        // Trim the last block so the file ends where the sequence does
        let remaining = ((duration - engine.position()) * sample_rate / rate).ceil() as usize;
        let n = remaining.clamp(1, block_frames);
        engine.render(&mut left[..n], &mut right[..n]);
        write_block(&mut writer, &left[..n], &right[..n], config)?;
        rendered_frames += n;

        blocks += 1;
        if blocks % progress_interval == 0 {
            let progress = if duration > 0.0 {
                (engine.position() / duration).min(1.0)
            } else {
                1.0
            };
            let current_time = rendered_frames as f64 / sample_rate;
            cancel.emit_unless_cancelled(|| {
                let _ = tx.send(BounceEvent::Progress {
                    progress,
                    current_time,
                });
            });
        }
    }

    let tail_frames = (config.tail_seconds.max(0.0) * sample_rate) as usize;
    let mut rendered = 0usize;
    while !cancelled && rendered < tail_frames {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let n = (tail_frames - rendered).min(block_frames);
        engine.render_tail(&mut left[..n], &mut right[..n]);
        write_block(&mut writer, &left[..n], &right[..n], config)?;
        rendered += n;
    }

    writer.finalize()?;

    if !cancelled {
        cancel.emit_unless_cancelled(|| {
            let _ = tx.send(BounceEvent::Progress {
                progress: 1.0,
                current_time: duration / rate,
            });
        });
    }

    Ok(!cancelled)
}

/// Writes one block, mixing down to mono when configured.
fn write_block<W: Write + Seek>(
    writer: &mut WavWriter<W>,
    left: &[f32],
    right: &[f32],
    config: &BounceConfig,
) -> Result<()> {
    for (l, r) in left.iter().zip(right) {
        if config.channels == 1 {
            write_sample(writer, (l + r) * 0.5, config.sample_format)?;
        } else {
            write_sample(writer, *l, config.sample_format)?;
            write_sample(writer, *r, config.sample_format)?;
        }
    }
    Ok(())
}

fn write_sample<W: Write + Seek>(
    writer: &mut WavWriter<W>,
    sample: f32,
    format: SampleFormat,
) -> Result<()> {
    match format {
        // Convert f32 (-1.0 to 1.0) to i16
        SampleFormat::Int16 => {
            writer.write_sample((sample * 32767.0).clamp(-32768.0, 32767.0) as i16)?
        }
        SampleFormat::Float32 => writer.write_sample(sample)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::fixtures::Fixture;
    use approx::assert_relative_eq;

    fn request(dir: &Path, seconds: u32, rate: f64, config: BounceConfig) -> BounceRequest {
        BounceRequest {
            midi: Fixture::steady(seconds).save(dir, "song.mid"),
            soundfont: None,
            destination: dir.join("song.wav"),
            rate,
            config,
        }
    }

    fn no_tail() -> BounceConfig {
        BounceConfig {
            tail_seconds: 0.0,
            ..BounceConfig::default()
        }
    }

    #[test]
    fn test_bounce_completes() {
        let dir = tempfile::tempdir().unwrap();
        let handle = Bouncer::new(request(dir.path(), 4, 1.0, BounceConfig::default()))
            .start()
            .unwrap();
        let events = handle.events().clone();
        assert_eq!(handle.wait(), BounceOutcome::Completed);

        let events: Vec<_> = events.try_iter().collect();
        let terminals: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals, vec![&BounceEvent::Completed { cancelled: false }]);
        assert_eq!(events.last(), Some(&BounceEvent::Completed { cancelled: false }));

        let progress: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                BounceEvent::Progress { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&1.0));

        let reader = hound::WavReader::open(dir.path().join("song.wav")).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 16);
        // 4 s of music plus a 2 s tail
        let frames = reader.duration() as i64;
        assert!((frames - 6 * 44100).abs() <= 64, "{frames}");
    }

    #[test]
    fn test_bounce_is_audible() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = Bouncer::new(request(dir.path(), 2, 1.0, no_tail()))
            .start()
            .unwrap()
            .wait();
        assert_eq!(outcome, BounceOutcome::Completed);

        let mut reader = hound::WavReader::open(dir.path().join("song.wav")).unwrap();
        let peak = reader
            .samples::<i16>()
            .map(|s| s.unwrap().unsigned_abs())
            .max()
            .unwrap();
        assert!(peak > 100);
    }

    #[test]
    fn test_rate_shortens_output() {
        let dir = tempfile::tempdir().unwrap();
        Bouncer::new(request(dir.path(), 8, 2.0, no_tail()))
            .start()
            .unwrap()
            .wait();

        let reader = hound::WavReader::open(dir.path().join("song.wav")).unwrap();
        let frames = reader.duration() as i64;
        assert!((frames - 4 * 44100).abs() <= 64, "{frames}");
    }

    #[test]
    fn test_progress_reports_rendered_time() {
        let dir = tempfile::tempdir().unwrap();
        let config = BounceConfig {
            progress_interval_blocks: 1,
            ..no_tail()
        };
        let handle = Bouncer::new(request(dir.path(), 8, 2.0, config))
            .start()
            .unwrap();
        let events = handle.events().clone();
        assert_eq!(handle.wait(), BounceOutcome::Completed);

        let events: Vec<_> = events.try_iter().collect();
        assert_eq!(
            events.last().and_then(BounceEvent::outcome),
            Some(BounceOutcome::Completed)
        );

        // 8 s of music at double speed renders 4 s of audio
        let reports: Vec<(f64, f64)> = events
            .iter()
            .filter_map(|e| match e {
                BounceEvent::Progress {
                    progress,
                    current_time,
                } => Some((*progress, *current_time)),
                _ => None,
            })
            .collect();
        assert!(reports.len() > 10);
        for (progress, current_time) in &reports {
            assert!(*current_time <= 4.0 + 1e-3, "{current_time}");
            assert_relative_eq!(*current_time, progress * 4.0, epsilon = 1e-3);
        }
        assert_eq!(reports.last(), Some(&(1.0, 4.0)));
    }

    #[test]
    fn test_mono_float_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = BounceConfig {
            channels: 1,
            sample_format: SampleFormat::Float32,
            ..no_tail()
        };
        Bouncer::new(request(dir.path(), 1, 1.0, config))
            .start()
            .unwrap()
            .wait();

        let mut reader = hound::WavReader::open(dir.path().join("song.wav")).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
        assert!(reader.samples::<f32>().all(|s| s.unwrap().abs() <= 1.0));
    }

    #[test]
    fn test_cancel_stops_progress() {
        let dir = tempfile::tempdir().unwrap();
        let config = BounceConfig {
            block_frames: 256,
            progress_interval_blocks: 1,
            ..BounceConfig::default()
        };
        let handle = Bouncer::new(request(dir.path(), 600, 1.0, config))
            .start()
            .unwrap();

        // Wait for the render to get going, then cancel
        match handle.events().recv().unwrap() {
            BounceEvent::Progress { .. } => {}
            other => panic!("unexpected {other:?}"),
        }
        handle.cancel();
        let after_cancel = handle.events().clone();
        assert_eq!(handle.wait(), BounceOutcome::Cancelled);

        // Only already-queued progress may precede the terminal event
        let events: Vec<_> = after_cancel.try_iter().collect();
        assert_eq!(events.last(), Some(&BounceEvent::Completed { cancelled: true }));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

        // The partial file is a valid WAV
        let reader = hound::WavReader::open(dir.path().join("song.wav")).unwrap();
        assert!(reader.duration() < 600 * 44100);
    }

    #[test]
    fn test_missing_midi_fails() {
        let dir = tempfile::tempdir().unwrap();
        let handle = Bouncer::new(BounceRequest {
            midi: dir.path().join("missing.mid"),
            soundfont: None,
            destination: dir.path().join("out.wav"),
            rate: 1.0,
            config: BounceConfig::default(),
        })
        .start()
        .unwrap();
        let events = handle.events().clone();

        let outcome = handle.wait();
        assert!(matches!(
            outcome,
            BounceOutcome::Failed(PlayerError::FileNotFound(_))
        ));
        let events: Vec<_> = events.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], BounceEvent::Error(_)));
        assert!(!dir.path().join("out.wav").exists());
    }

    #[test]
    fn test_cancel_token_gate() {
        let token = CancelToken::new();
        assert!(token.emit_unless_cancelled(|| {}));
        token.cancel();
        let mut ran = false;
        assert!(!token.emit_unless_cancelled(|| ran = true));
        assert!(!ran);
    }

    #[test]
    fn test_join_reaps_thread() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = Bouncer::new(request(dir.path(), 1, 1.0, no_tail()))
            .start()
            .unwrap();
        let outcome = handle.join();
        assert_eq!(outcome, BounceOutcome::Completed);
        assert!(handle.is_finished());
        assert!(handle
            .events()
            .try_iter()
            .any(|e| e == BounceEvent::Completed { cancelled: false }));
    }
}
