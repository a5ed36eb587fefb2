//! Discrete playback speed steps.
//!
//! Speed is chosen from a fixed table; a fractional slider position between
//! two steps gives a fine speed rounded to two decimals.

/// Selectable playback rates, slowest first.
pub const SPEED_STEPS: [f64; 15] = [
    0.25,
    1.0 / 3.0,
    0.5,
    2.0 / 3.0,
    0.75,
    0.8,
    0.9,
    1.0,
    1.1,
    1.2,
    1.25,
    4.0 / 3.0,
    1.5,
    5.0 / 3.0,
    2.0,
];

/// Slider index of 1.0×.
pub const NORMAL_SPEED_INDEX: usize = 7;

/// Index of the step closest to `speed`.
pub fn nearest_index(speed: f64) -> usize {
    SPEED_STEPS
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - speed).abs().total_cmp(&(*b - speed).abs()))
        .map(|(idx, _)| idx)
        .unwrap_or(NORMAL_SPEED_INDEX)
}

/// The next faster step, or the fastest step.
pub fn step_up(speed: f64) -> f64 {
    let idx = (nearest_index(speed) + 1).min(SPEED_STEPS.len() - 1);
    SPEED_STEPS[idx]
}

/// The next slower step, or the slowest step.
pub fn step_down(speed: f64) -> f64 {
    SPEED_STEPS[nearest_index(speed).saturating_sub(1)]
}

/// Speed for a fractional slider position in `[0, SPEED_STEPS.len() - 1]`,
/// interpolated linearly between neighbouring steps and rounded to two
/// decimals.
pub fn interpolate(slider: f64) -> f64 {
    let max = (SPEED_STEPS.len() - 1) as f64;
    let slider = if slider.is_finite() {
        slider.clamp(0.0, max)
    } else {
        NORMAL_SPEED_INDEX as f64
    };

    let lower = SPEED_STEPS[slider.floor() as usize];
    let upper = SPEED_STEPS[slider.ceil() as usize];
    let value = lower + (upper - lower) * slider.fract();

    (value * 100.0).round() / 100.0
}

/// Formats a speed the way the status line shows it, e.g. `1.25×`.
pub fn format_speed(speed: f64) -> String {
    format!("{:.2}×", speed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_steps_are_ascending() {
        assert!(SPEED_STEPS.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(SPEED_STEPS[NORMAL_SPEED_INDEX], 1.0);
    }

    #[test]
    fn test_step_up_and_down() {
        assert_eq!(step_up(1.0), 1.1);
        assert_eq!(step_down(1.0), 0.9);
        assert_relative_eq!(step_up(1.25), 4.0 / 3.0);
        // Off-table values move from the nearest step
        assert_eq!(step_up(1.02), 1.1);
        assert_eq!(step_down(1.22), 1.1);
    }

    #[test]
    fn test_steps_saturate() {
        assert_eq!(step_up(2.0), 2.0);
        assert_eq!(step_down(0.25), 0.25);
    }

    #[test]
    fn test_interpolate() {
        assert_eq!(interpolate(7.0), 1.0);
        assert_eq!(interpolate(7.5), 1.05);
        assert_eq!(interpolate(0.5), 0.29);
        assert_eq!(interpolate(100.0), 2.0);
        assert_eq!(interpolate(-1.0), 0.25);
        assert_eq!(interpolate(f64::NAN), 1.0);
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1.0), "1.00×");
        assert_eq!(format_speed(2.0 / 3.0), "0.67×");
    }
}
