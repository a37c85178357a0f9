//! Stateful climate simulator for local development.
//!
//! Models a greenhouse air sensor:
//! - Temporal coherence via random walk with mean reversion
//! - Diurnal (day/night) cycle, warmest mid-afternoon
//! - Humidity moving against temperature
//! - Readings rounded to 0.1, as the DHT11 path reports them
//!
//! Try mode skips all of that and returns flat random values for bench
//! testing without a sensor attached.

use std::f64::consts::PI;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal(rng: &mut fastrand::Rng) -> f64 {
    (0..12).map(|_| rng.f64()).sum::<f64>() - 6.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct ClimateSim {
    rng: fastrand::Rng,
    try_mode: bool,

    /// Slow-moving component of the temperature, in °C.
    base_temp: f64,
    mean_temp: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    diurnal_amplitude: f64,
}

impl ClimateSim {
    pub fn new(try_mode: bool) -> Self {
        Self::with_rng(try_mode, fastrand::Rng::new())
    }

    pub fn with_rng(try_mode: bool, rng: fastrand::Rng) -> Self {
        Self {
            rng,
            try_mode,
            base_temp: 22.0,
            mean_temp: 22.0,
            walk_sigma: 0.3,
            mean_reversion: 0.05,
            diurnal_amplitude: 6.0,
        }
    }

    /// Next `(temperature, humidity)` pair. `hour` is local time of day in
    /// hours, used for the diurnal swing.
    pub fn sample(&mut self, hour: f64) -> (f64, f64) {
        if self.try_mode {
            let t = self.rng.i32(30..=60);
            let h = self.rng.i32(60..=90);
            return (t as f64, h as f64);
        }

        let pull = self.mean_reversion * (self.mean_temp - self.base_temp);
        let walk = self.walk_sigma * approx_std_normal(&mut self.rng);
        self.base_temp += pull + walk;

        // Peak at 15:00, trough at 03:00.
        let diurnal = self.diurnal_amplitude * (2.0 * PI * (hour - 9.0) / 24.0).sin();
        let temperature = (self.base_temp + diurnal).clamp(-10.0, 50.0);

        let noise = 2.0 * approx_std_normal(&mut self.rng);
        let humidity = (65.0 - 1.5 * (temperature - self.mean_temp) + noise).clamp(5.0, 99.0);

        (round1(temperature), round1(humidity))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sim(try_mode: bool) -> ClimateSim {
        ClimateSim::with_rng(try_mode, fastrand::Rng::with_seed(11))
    }

    #[test]
    fn try_mode_uses_fixed_ranges() {
        let mut s = sim(true);
        for _ in 0..200 {
            let (t, h) = s.sample(12.0);
            assert!((30.0..=60.0).contains(&t), "temperature {t}");
            assert!((60.0..=90.0).contains(&h), "humidity {h}");
            assert_eq!(t.fract(), 0.0);
        }
    }

    #[test]
    fn readings_rounded_to_tenths() {
        let mut s = sim(false);
        for i in 0..100 {
            let (t, h) = s.sample(i as f64 % 24.0);
            assert_eq!(round1(t), t);
            assert_eq!(round1(h), h);
        }
    }

    #[test]
    fn readings_within_plausible_range() {
        let mut s = sim(false);
        for i in 0..1000 {
            let (t, h) = s.sample((i % 24) as f64);
            assert!((-10.0..=50.0).contains(&t));
            assert!((5.0..=99.0).contains(&h));
        }
    }

    #[test]
    fn temporal_coherence() {
        let mut s = sim(false);
        let samples: Vec<f64> = (0..200).map(|_| s.sample(12.0).0).collect();
        let max_jump = samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0, f64::max);
        assert!(max_jump < 3.0, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn afternoon_warmer_than_night() {
        let mut s = sim(false);
        let avg = |s: &mut ClimateSim, hour: f64| {
            (0..50).map(|_| s.sample(hour).0).sum::<f64>() / 50.0
        };
        let night = avg(&mut s, 3.0);
        let afternoon = avg(&mut s, 15.0);
        assert!(
            afternoon > night + 5.0,
            "afternoon {afternoon:.1} should be well above night {night:.1}"
        );
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let mut rng = fastrand::Rng::with_seed(5);
        let n = 5000;
        let mean = (0..n).map(|_| approx_std_normal(&mut rng)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.15, "mean should be near zero: {mean}");
    }
}
