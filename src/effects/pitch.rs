//! Random pitch perturbation
//!
//! Offsets are expressed in cents (1/100 semitone) and applied as a playback
//! rate change, so pitch and speed move together.

use crate::config::MAX_PITCH_RANGE_CENTS;
use rand::Rng;

/// Symmetric range of random pitch offsets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchRange {
    cents: f32,
}

impl PitchRange {
    /// Offsets will be drawn from `[-cents, +cents]`, at most one octave each way
    pub fn new(cents: f32) -> Self {
        let cents = if cents.is_finite() { cents.abs() } else { 0.0 };
        Self {
            cents: cents.min(MAX_PITCH_RANGE_CENTS),
        }
    }

    /// Half-width of the range in cents
    pub fn cents(&self) -> f32 {
        self.cents
    }

    /// Draw a fresh offset. Called on every play; never cached.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f32 {
        if self.cents == 0.0 {
            return 0.0;
        }
        rng.random_range(-self.cents..=self.cents)
    }
}

/// Convert a pitch offset in cents into a playback rate multiplier
#[inline]
pub fn cents_to_speed(cents: f32) -> f32 {
    2f32.powf(cents / 1200.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cents_to_speed() {
        assert_relative_eq!(cents_to_speed(0.0), 1.0);
        assert_relative_eq!(cents_to_speed(1200.0), 2.0, epsilon = 1e-6);
        assert_relative_eq!(cents_to_speed(-1200.0), 0.5, epsilon = 1e-6);
        assert_relative_eq!(cents_to_speed(100.0), 1.059_463, epsilon = 1e-5);
    }

    #[test]
    fn test_samples_stay_in_range_and_vary() {
        let range = PitchRange::new(20.0);
        let mut rng = rand::rng();
        let draws: Vec<f32> = (0..1_000).map(|_| range.sample(&mut rng)).collect();

        assert!(draws.iter().all(|c| (-20.0..=20.0).contains(c)));
        let first = draws[0];
        assert!(draws.iter().any(|&c| c != first));
        assert!(draws.iter().any(|&c| c < 0.0));
        assert!(draws.iter().any(|&c| c > 0.0));
    }

    #[test]
    fn test_range_is_clamped_to_an_octave() {
        assert_eq!(PitchRange::new(100_000.0).cents(), MAX_PITCH_RANGE_CENTS);
        assert_eq!(PitchRange::new(-35.0).cents(), 35.0);
        assert_eq!(PitchRange::new(f32::NAN).cents(), 0.0);
    }

    #[test]
    fn test_zero_range_is_neutral() {
        let range = PitchRange::new(0.0);
        let mut rng = rand::rng();
        assert_eq!(range.sample(&mut rng), 0.0);
    }
}
