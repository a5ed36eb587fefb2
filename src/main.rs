//! minimidi - a minimal terminal MIDI player.
//!
//! # Usage
//!
//! ```bash
//! minimidi play song.mid [-sf font.sf2] [--rate 1.25] [--no-audio]
//! minimidi bounce song.mid song.wav [-sf font.sf2] [--rate 1.25]
//! ```
//!
//! Set `RUST_LOG=minimidi=debug` to see log output on stderr.

use anyhow::{bail, Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType};
use crossterm::{cursor, execute};
use minimidi::audio::{
    AudioOutput, BounceConfig, BounceRequest, Bouncer, HeadlessOutput, Player, PlayerConfig,
    RodioOutput,
};
use minimidi::midi::format_time;
use minimidi::{App, BounceEvent, BounceOutcome, Command, Settings};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What the binary was asked to do.
enum Mode {
    Play { no_audio: bool },
    Bounce { output: PathBuf },
}

/// Command-line options for the application.
struct CliOptions {
    mode: Mode,
    midi: PathBuf,
    /// Path to a SoundFont file; the built-in instruments when absent.
    soundfont: Option<PathBuf>,
    rate: Option<f64>,
}

impl CliOptions {
    /// Parses command-line arguments.
    ///
    /// Supports:
    /// - `play <file.mid>` / `bounce <file.mid> <out.wav>`
    /// - `--soundfont <path>` or `-sf <path>`: Use a SoundFont file
    /// - `--rate <r>`: Initial playback rate
    /// - `--no-audio`: Play without an output device
    /// - `--help` or `-h`: Print help and exit
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut positional: Vec<String> = Vec::new();
        let mut soundfont: Option<PathBuf> = None;
        let mut rate: Option<f64> = None;
        let mut no_audio = false;
        let mut i = 1;

        while i < args.len() {
            match args[i].as_str() {
                "--soundfont" | "-sf" => {
                    i += 1;
                    let Some(path) = args.get(i) else {
                        bail!("--soundfont requires a path argument");
                    };
                    soundfont = Some(PathBuf::from(path));
                }
                "--rate" => {
                    i += 1;
                    let Some(value) = args.get(i) else {
                        bail!("--rate requires a value");
                    };
                    rate = Some(
                        value
                            .parse()
                            .with_context(|| format!("Invalid rate: {}", value))?,
                    );
                }
                "--no-audio" => no_audio = true,
                "--help" | "-h" => {
                    print_help(args.first().map(String::as_str).unwrap_or("minimidi"));
                    std::process::exit(0);
                }
                other if other.starts_with('-') => {
                    bail!("Unknown option: {} (use --help for usage)", other);
                }
                other => positional.push(other.to_string()),
            }
            i += 1;
        }

        let mut positional = positional.into_iter();
        let mode = positional.next();
        let Some(midi) = positional.next().map(PathBuf::from) else {
            bail!("Missing MIDI file (use --help for usage)");
        };

        let mode = match mode.as_deref() {
            Some("play") => Mode::Play { no_audio },
            Some("bounce") => {
                let Some(output) = positional.next().map(PathBuf::from) else {
                    bail!("bounce requires an output path");
                };
                Mode::Bounce { output }
            }
            Some(other) => bail!("Unknown command: {}", other),
            None => bail!("Missing command (use --help for usage)"),
        };

        if let Some(extra) = positional.next() {
            bail!("Unexpected argument: {}", extra);
        }

        Ok(Self {
            mode,
            midi,
            soundfont,
            rate,
        })
    }
}

fn print_help(program: &str) {
    eprintln!("minimidi - minimal MIDI player");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {} play <file.mid> [OPTIONS]", program);
    eprintln!("  {} bounce <file.mid> <out.wav> [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -sf, --soundfont PATH  Use a SoundFont file (.sf2)");
    eprintln!("  --rate R               Playback rate (0.25 - 2.0)");
    eprintln!("  --no-audio             Play without an audio device");
    eprintln!("  -h, --help             Print this help message");
    eprintln!();
    eprintln!("Keys: space play/pause, left/right skip 10s (shift: 5s), up/down speed,");
    eprintln!("      s stop, b bounce, c cancel bounce, t toggle countdown, q quit");
}

/// Main entry point.
fn main() -> Result<()> {
    // Parse CLI options first (before any terminal setup)
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match cli.mode {
        Mode::Play { no_audio: true } => {
            let player = Player::with_output(HeadlessOutput::new(1.0), PlayerConfig::default());
            play(player, &cli.midi, cli.soundfont, cli.rate)
        }
        Mode::Play { no_audio: false } => {
            let player = Player::with_output(RodioOutput::new(), PlayerConfig::default());
            play(player, &cli.midi, cli.soundfont, cli.rate)
        }
        Mode::Bounce { ref output } => bounce(&cli.midi, output, cli.soundfont.clone(), cli.rate),
    }
}

/// Interactive playback with a one-line status display.
fn play<O: AudioOutput>(
    player: Player<O>,
    midi: &Path,
    soundfont: Option<PathBuf>,
    rate: Option<f64>,
) -> Result<()> {
    let settings_path = Settings::default_path();
    let settings = Settings::load_from(&settings_path);
    let mut app = App::new(player, settings, Some(settings_path));

    if let Some(rate) = rate {
        app.player_mut().set_rate(rate);
    }
    app.open(midi, soundfont.as_deref())?;

    enable_raw_mode().context("Failed to enable raw mode")?;
    let result = run_app(&mut app);
    app.close();

    disable_raw_mode().context("Failed to disable raw mode")?;
    println!();
    result
}

/// Main application loop.
fn run_app<O: AudioOutput>(app: &mut App<O>) -> Result<()> {
    let mut stdout = io::stdout();

    while !app.should_quit() {
        app.pump_events();

        execute!(stdout, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine))?;
        write!(stdout, "{}", app.status_line())?;
        stdout.flush()?;

        // Handle events with a short timeout to keep the display moving
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                // Only handle key press events (not release)
                if key.kind == KeyEventKind::Press {
                    if let Some(command) = Command::from_key(key.code, key.modifiers) {
                        app.handle(command);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Renders `midi` to `output`, printing progress. `q` or Ctrl-C cancels.
fn bounce(
    midi: &Path,
    output: &Path,
    soundfont: Option<PathBuf>,
    rate: Option<f64>,
) -> Result<()> {
    let handle = Bouncer::new(BounceRequest {
        midi: midi.to_path_buf(),
        soundfont,
        destination: output.to_path_buf(),
        rate: rate
            .unwrap_or(1.0)
            .clamp(minimidi::audio::MIN_RATE, minimidi::audio::MAX_RATE),
        config: BounceConfig::default(),
    })
    .start()
    .context("Failed to start bounce")?;

    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let watch = (|| -> Result<()> {
        loop {
            for event in handle.events().try_iter() {
                match event {
                    BounceEvent::Progress {
                        progress,
                        current_time,
                    } => {
                        execute!(stdout, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine))?;
                        write!(
                            stdout,
                            "Bouncing {:>3.0}%  {}",
                            progress * 100.0,
                            format_time(current_time)
                        )?;
                        stdout.flush()?;
                    }
                    terminal if terminal.is_terminal() => return Ok(()),
                    _ => {}
                }
            }

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    let ctrl_c = key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL);
                    if key.kind == KeyEventKind::Press && (ctrl_c || key.code == KeyCode::Char('q'))
                    {
                        handle.cancel();
                    }
                }
            }
        }
    })();
    disable_raw_mode().context("Failed to disable raw mode")?;
    println!();

    if let Err(e) = watch {
        handle.cancel();
        handle.wait();
        return Err(e);
    }

    match handle.wait() {
        BounceOutcome::Completed => {
            println!("Wrote {}", output.display());
            Ok(())
        }
        BounceOutcome::Cancelled => {
            println!("Cancelled; partial file left at {}", output.display());
            Ok(())
        }
        BounceOutcome::Failed(e) => Err(e).context("Bounce failed"),
    }
}
