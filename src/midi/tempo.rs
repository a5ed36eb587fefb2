//! Tempo map: converts between MIDI ticks and seconds.
//!
//! Metrical files carry tempo changes as `(tick, microseconds per quarter)`
//! pairs. Each change starts a segment in which seconds grow linearly with
//! ticks; the map stores the absolute time at which every segment begins
//! so lookups are a binary search plus one multiplication.
//!
//! SMPTE timecode files have a fixed number of ticks per second and ignore
//! tempo events entirely.

/// Tempo in effect before the first tempo event (120 BPM).
pub const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

/// How ticks relate to wall-clock time in a file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Timebase {
    /// Ticks per quarter note; seconds depend on the tempo map.
    Metrical { ticks_per_quarter: u16 },
    /// Fixed ticks per second (frames per second × subframes).
    Timecode { ticks_per_second: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TempoSegment {
    tick: u32,
    micros_per_quarter: u32,
    /// Absolute time in seconds at `tick`.
    seconds: f64,
}

/// Ordered tempo changes with precomputed segment start times.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    timebase: Timebase,
    segments: Vec<TempoSegment>,
}

impl TempoMap {
    /// Creates a map with only the default tempo.
    pub fn new(timebase: Timebase) -> Self {
        Self::from_changes(timebase, &[])
    }

    /// Builds a map from `(tick, microseconds per quarter)` changes.
    ///
    /// Changes need not be sorted. When several changes share a tick, the
    /// last one in `changes` wins, matching the order a sequencer would
    /// apply them in.
    pub fn from_changes(timebase: Timebase, changes: &[(u32, u32)]) -> Self {
        let mut sorted: Vec<(u32, u32)> = changes
            .iter()
            .copied()
            .filter(|&(_, micros)| micros > 0)
            .collect();
        // Stable sort keeps file order for equal ticks
        sorted.sort_by_key(|&(tick, _)| tick);

        let mut segments = Vec::with_capacity(sorted.len() + 1);
        let mut current = TempoSegment {
            tick: 0,
            micros_per_quarter: DEFAULT_MICROS_PER_QUARTER,
            seconds: 0.0,
        };

        if matches!(timebase, Timebase::Metrical { .. }) {
            for (tick, micros) in sorted {
                if tick == current.tick {
                    current.micros_per_quarter = micros;
                    continue;
                }
                let seconds = current.seconds
                    + (tick - current.tick) as f64
                        * seconds_per_tick(timebase, current.micros_per_quarter);
                segments.push(current);
                current = TempoSegment {
                    tick,
                    micros_per_quarter: micros,
                    seconds,
                };
            }
        }
        segments.push(current);

        Self { timebase, segments }
    }

    /// Returns the file's timebase.
    pub fn timebase(&self) -> Timebase {
        self.timebase
    }

    /// Converts an absolute tick to seconds at rate 1.0.
    pub fn tick_to_seconds(&self, tick: u32) -> f64 {
        let segment = self.segment_for_tick(tick);
        segment.seconds
            + (tick - segment.tick) as f64
                * seconds_per_tick(self.timebase, segment.micros_per_quarter)
    }

    /// Converts seconds to the last tick at or before that time.
    pub fn seconds_to_tick(&self, seconds: f64) -> u32 {
        let seconds = seconds.max(0.0);
        let idx = self
            .segments
            .partition_point(|s| s.seconds <= seconds)
            .saturating_sub(1);
        let segment = self.segments[idx];
        let spt = seconds_per_tick(self.timebase, segment.micros_per_quarter);
        let offset = ((seconds - segment.seconds) / spt + 1e-9).floor();
        segment.tick.saturating_add(offset.min(u32::MAX as f64) as u32)
    }

    /// Microseconds per quarter note in effect at `tick`.
    pub fn micros_per_quarter_at(&self, tick: u32) -> u32 {
        self.segment_for_tick(tick).micros_per_quarter
    }

    /// Tempo in beats per minute at `tick`.
    pub fn bpm_at(&self, tick: u32) -> f64 {
        60_000_000.0 / self.micros_per_quarter_at(tick) as f64
    }

    /// Iterates `(tick, microseconds per quarter)` for every segment.
    pub fn changes(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.segments
            .iter()
            .map(|s| (s.tick, s.micros_per_quarter))
    }

    fn segment_for_tick(&self, tick: u32) -> TempoSegment {
        let idx = self
            .segments
            .partition_point(|s| s.tick <= tick)
            .saturating_sub(1);
        self.segments[idx]
    }
}

fn seconds_per_tick(timebase: Timebase, micros_per_quarter: u32) -> f64 {
    match timebase {
        Timebase::Metrical { ticks_per_quarter } => {
            micros_per_quarter as f64 / 1_000_000.0 / ticks_per_quarter.max(1) as f64
        }
        Timebase::Timecode { ticks_per_second } => 1.0 / ticks_per_second,
    }
}
