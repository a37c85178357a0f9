//! Sunrise, sunset and moon age for the greenhouse location.
//!
//! `SimulatedEphemeris` is a deterministic approximation (solar declination
//! plus standard refraction, mean synodic month). It is good to a few
//! minutes, which is all the daily log needs.

use serde::Serialize;
use std::f64::consts::PI;
use time::{Date, UtcOffset};

use crate::error::{CoreError, Result};

/// Mean length of a lunation in days.
const SYNODIC_MONTH: f64 = 29.530_588_853;
/// Julian day of the new moon on 2000-01-06 18:14 UTC.
const REFERENCE_NEW_MOON_JD: f64 = 2_451_550.26;
/// Sun's apparent radius plus atmospheric refraction, in degrees.
const HORIZON_DEG: f64 = -0.833;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub place: String,
    pub lat: f64,
    pub lon: f64,
    pub elev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ephemeris {
    pub sunrise_time: String,
    pub sunset_time: String,
    pub moon_phase: String,
}

pub trait EphemerisSource: Send + Sync {
    fn compute_day(&self, location: &Location, date: Date) -> Result<Ephemeris>;
}

pub struct SimulatedEphemeris {
    offset: UtcOffset,
}

impl SimulatedEphemeris {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl EphemerisSource for SimulatedEphemeris {
    fn compute_day(&self, loc: &Location, date: Date) -> Result<Ephemeris> {
        if !(-90.0..=90.0).contains(&loc.lat) || !(-180.0..=180.0).contains(&loc.lon) {
            return Err(CoreError::invalid_config(format!(
                "location out of range: lat {} lon {}",
                loc.lat, loc.lon
            )));
        }

        let doy = date.ordinal() as f64;
        let decl = (23.44 * (2.0 * PI * (284.0 + doy) / 365.0).sin()).to_radians();
        let lat = loc.lat.to_radians();

        // Observers above sea level see past the geometric horizon.
        let dip = 2.076 * loc.elev.max(0.0).sqrt() / 60.0;
        let h0 = (HORIZON_DEG - dip).to_radians();

        let cos_h = (h0.sin() - lat.sin() * decl.sin()) / (lat.cos() * decl.cos());

        let tz_hours = self.offset.whole_seconds() as f64 / 3600.0;
        let solar_noon = 12.0 - loc.lon / 15.0 + tz_hours;

        let (sunrise_time, sunset_time) = if cos_h >= 1.0 {
            // Polar night: sun never rises.
            ("--:--".to_string(), "--:--".to_string())
        } else if cos_h <= -1.0 {
            ("00:00".to_string(), "24:00".to_string())
        } else {
            let half_day = cos_h.acos().to_degrees() / 15.0;
            (
                fmt_hours(solar_noon - half_day),
                fmt_hours(solar_noon + half_day),
            )
        };

        let jd = date.to_julian_day() as f64;
        let age = (jd - REFERENCE_NEW_MOON_JD).rem_euclid(SYNODIC_MONTH);

        Ok(Ephemeris {
            sunrise_time,
            sunset_time,
            moon_phase: format!("{age:.1}"),
        })
    }
}

fn fmt_hours(h: f64) -> String {
    let total = (h.rem_euclid(24.0) * 60.0).round() as i64 % (24 * 60);
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, offset};

    fn tokyo() -> Location {
        Location {
            place: "Tokyo".into(),
            lat: 35.68,
            lon: 139.77,
            elev: 40.0,
        }
    }

    fn minutes(hhmm: &str) -> i64 {
        let (h, m) = hhmm.split_once(':').unwrap();
        h.parse::<i64>().unwrap() * 60 + m.parse::<i64>().unwrap()
    }

    #[test]
    fn summer_days_are_longer_than_winter_days() {
        let eph = SimulatedEphemeris::new(offset!(+9));
        let summer = eph.compute_day(&tokyo(), date!(2024 - 06 - 21)).unwrap();
        let winter = eph.compute_day(&tokyo(), date!(2024 - 12 - 21)).unwrap();

        let len = |e: &Ephemeris| minutes(&e.sunset_time) - minutes(&e.sunrise_time);
        assert!(len(&summer) > len(&winter) + 120);
    }

    #[test]
    fn tokyo_sunrise_is_plausible() {
        let eph = SimulatedEphemeris::new(offset!(+9));
        let e = eph.compute_day(&tokyo(), date!(2024 - 03 - 20)).unwrap();
        let rise = minutes(&e.sunrise_time);
        // Equinox sunrise in Tokyo is about 05:45.
        assert!((5 * 60 + 20..=6 * 60 + 10).contains(&rise), "sunrise {}", e.sunrise_time);
    }

    #[test]
    fn deterministic() {
        let eph = SimulatedEphemeris::new(offset!(+9));
        let a = eph.compute_day(&tokyo(), date!(2024 - 01 - 01)).unwrap();
        let b = eph.compute_day(&tokyo(), date!(2024 - 01 - 01)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn moon_age_within_lunation() {
        let eph = SimulatedEphemeris::new(offset!(UTC));
        for d in [date!(2024 - 01 - 11), date!(2024 - 02 - 24), date!(2025 - 07 - 04)] {
            let age: f64 = eph.compute_day(&tokyo(), d).unwrap().moon_phase.parse().unwrap();
            assert!((0.0..SYNODIC_MONTH).contains(&age));
        }
    }

    #[test]
    fn polar_night_has_no_sunrise() {
        let eph = SimulatedEphemeris::new(offset!(UTC));
        let svalbard = Location {
            place: "Longyearbyen".into(),
            lat: 78.2,
            lon: 15.6,
            elev: 0.0,
        };
        let e = eph.compute_day(&svalbard, date!(2024 - 12 - 21)).unwrap();
        assert_eq!(e.sunrise_time, "--:--");
    }

    #[test]
    fn out_of_range_latitude_rejected() {
        let eph = SimulatedEphemeris::new(offset!(UTC));
        let bad = Location {
            lat: 91.0,
            ..tokyo()
        };
        assert!(eph.compute_day(&bad, date!(2024 - 01 - 01)).is_err());
    }
}
