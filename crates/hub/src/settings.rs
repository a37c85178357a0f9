//! Typed view of the `config` table.
//!
//! The table is a flat key → string map; everything is parsed here so the
//! rest of the hub never sees raw strings. Parsing reports every bad key at
//! once rather than stopping at the first.

use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use time::Date;

use crate::dates::{fmt_date, parse_date, slash_date};
use crate::ephemeris::Location;
use crate::error::{CoreError, Result};

pub const OUTPUT_RELAYS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub place: String,
    pub lat: f64,
    pub lon: f64,
    pub elev: f64,
    /// Minutes relative to sunrise at which the morning lighting starts.
    pub morning_offset: i64,
    /// Minutes relative to sunset at which the evening lighting starts.
    pub evening_offset: i64,
    pub morning_minutes: u32,
    pub evening_minutes: u32,
    /// Seconds between board polls.
    pub sensing_interval: u32,
    /// Polls per light cycle. Always positive.
    pub sensing_count: u32,
    pub outputs: [bool; OUTPUT_RELAYS],
    pub batt_yellow: f64,
    pub batt_green: f64,
    #[serde(with = "slash_date")]
    pub sunlight_from: Date,
    #[serde(with = "slash_date")]
    pub temperature_from: Date,
    pub humi_try: bool,
    pub contec_try: bool,
    pub led_try: bool,
    pub night_sense: bool,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

struct Fields<'a> {
    map: &'a BTreeMap<String, String>,
    errors: Vec<String>,
}

impl<'a> Fields<'a> {
    fn raw(&self, key: &str) -> Option<&'a str> {
        self.map.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())
    }

    fn number<T: FromStr + Copy>(&mut self, key: &str, default: T) -> T {
        match self.raw(key) {
            None => default,
            Some(v) => v.parse().unwrap_or_else(|_| {
                self.errors.push(format!("{key}: {v:?} is not a number"));
                default
            }),
        }
    }

    fn flag(&mut self, key: &str) -> bool {
        match self.raw(key) {
            None | Some("false") => false,
            Some("true") => true,
            Some(v) => {
                self.errors.push(format!("{key}: {v:?} must be \"true\" or \"false\""));
                false
            }
        }
    }

    fn relay(&mut self, key: &str) -> bool {
        match self.raw(key) {
            None | Some("0") => false,
            Some("1") => true,
            Some(v) => {
                self.errors.push(format!("{key}: {v:?} must be \"0\" or \"1\""));
                false
            }
        }
    }

    fn date(&mut self, key: &str) -> Option<Date> {
        match self.raw(key) {
            None => {
                self.errors.push(format!("{key} is required"));
                None
            }
            Some(v) => match parse_date(v) {
                Ok(d) => Some(d),
                Err(_) => {
                    self.errors.push(format!("{key}: {v:?} is not a YYYY/MM/DD date"));
                    None
                }
            },
        }
    }
}

impl Settings {
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let mut f = Fields {
            map,
            errors: Vec::new(),
        };

        let place = f.raw("place").unwrap_or("Tokyo").to_string();
        let lat = f.number("lat", 35.68);
        let lon = f.number("lon", 139.77);
        let elev = f.number("elev", 40.0);
        if !(-90.0..=90.0).contains(&lat) {
            f.errors.push(format!("lat {lat} out of range [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&lon) {
            f.errors.push(format!("lon {lon} out of range [-180, 180]"));
        }

        let morning_offset = f.number("morning_offset", 0);
        let evening_offset = f.number("evening_offset", 0);
        let morning_minutes = f.number("morning_minutes", 60);
        let evening_minutes = f.number("evening_minutes", 60);
        let sensing_interval = f.number("sensing_interval", 60);

        let sensing_count = match f.raw("sensing_count") {
            None => {
                f.errors.push("sensing_count is required".into());
                0
            }
            Some(_) => f.number("sensing_count", 0),
        };
        if f.raw("sensing_count").is_some() && sensing_count == 0 {
            f.errors.push("sensing_count must be positive".into());
        }

        let mut outputs = [false; OUTPUT_RELAYS];
        for (i, slot) in outputs.iter_mut().enumerate() {
            *slot = f.relay(&format!("output{}", i + 1));
        }

        let batt_yellow = f.number("batt_yellow", 11.5);
        let batt_green = f.number("batt_green", 12.5);

        let sunlight_from = f.date("sunlight_from");
        let temperature_from = f.date("temperature_from");

        let humi_try = f.flag("isHumiTry");
        let contec_try = f.flag("isContecTry");
        let led_try = f.flag("isLEDTry");
        let night_sense = f.flag("isNightSense");

        match (sunlight_from, temperature_from) {
            (Some(sunlight_from), Some(temperature_from)) if f.errors.is_empty() => Ok(Self {
                place,
                lat,
                lon,
                elev,
                morning_offset,
                evening_offset,
                morning_minutes,
                evening_minutes,
                sensing_interval,
                sensing_count,
                outputs,
                batt_yellow,
                batt_green,
                sunlight_from,
                temperature_from,
                humi_try,
                contec_try,
                led_try,
                night_sense,
            }),
            _ => Err(CoreError::invalid_config(f.errors.join("; "))),
        }
    }

    /// Inverse of [`from_map`](Self::from_map): every key, in table form.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let flag = |b: bool| if b { "true" } else { "false" }.to_string();
        let mut m = BTreeMap::new();
        m.insert("place".into(), self.place.clone());
        m.insert("lat".into(), self.lat.to_string());
        m.insert("lon".into(), self.lon.to_string());
        m.insert("elev".into(), self.elev.to_string());
        m.insert("morning_offset".into(), self.morning_offset.to_string());
        m.insert("evening_offset".into(), self.evening_offset.to_string());
        m.insert("morning_minutes".into(), self.morning_minutes.to_string());
        m.insert("evening_minutes".into(), self.evening_minutes.to_string());
        m.insert("sensing_interval".into(), self.sensing_interval.to_string());
        m.insert("sensing_count".into(), self.sensing_count.to_string());
        for (i, on) in self.outputs.iter().enumerate() {
            m.insert(format!("output{}", i + 1), if *on { "1" } else { "0" }.into());
        }
        m.insert("batt_yellow".into(), self.batt_yellow.to_string());
        m.insert("batt_green".into(), self.batt_green.to_string());
        m.insert("sunlight_from".into(), fmt_date(self.sunlight_from));
        m.insert("temperature_from".into(), fmt_date(self.temperature_from));
        m.insert("isHumiTry".into(), flag(self.humi_try));
        m.insert("isContecTry".into(), flag(self.contec_try));
        m.insert("isLEDTry".into(), flag(self.led_try));
        m.insert("isNightSense".into(), flag(self.night_sense));
        m
    }

    pub fn location(&self) -> Location {
        Location {
            place: self.place.clone(),
            lat: self.lat,
            lon: self.lon,
            elev: self.elev,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn valid_map() -> BTreeMap<String, String> {
        [
            ("place", "Sapporo"),
            ("lat", "43.06"),
            ("lon", "141.35"),
            ("elev", "20"),
            ("morning_offset", "-30"),
            ("evening_offset", "15"),
            ("morning_minutes", "90"),
            ("evening_minutes", "120"),
            ("sensing_interval", "30"),
            ("sensing_count", "10"),
            ("output1", "1"),
            ("output2", "0"),
            ("output3", "1"),
            ("output4", "0"),
            ("batt_yellow", "11.8"),
            ("batt_green", "12.6"),
            ("sunlight_from", "2024/04/01"),
            ("temperature_from", "2024/04/15"),
            ("isHumiTry", "true"),
            ("isContecTry", "false"),
            ("isLEDTry", "true"),
            ("isNightSense", "false"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn assert_settings_err(map: &BTreeMap<String, String>, needle: &str) {
        let err = Settings::from_map(map).unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    #[test]
    fn parses_full_map() {
        let s = Settings::from_map(&valid_map()).unwrap();
        assert_eq!(s.place, "Sapporo");
        assert_eq!(s.morning_offset, -30);
        assert_eq!(s.sensing_count, 10);
        assert_eq!(s.outputs, [true, false, true, false]);
        assert_eq!(s.sunlight_from, date!(2024 - 04 - 01));
        assert_eq!(s.temperature_from, date!(2024 - 04 - 15));
        assert!(s.humi_try && s.led_try);
        assert!(!s.contec_try && !s.night_sense);
    }

    #[test]
    fn to_map_round_trips() {
        let s = Settings::from_map(&valid_map()).unwrap();
        let again = Settings::from_map(&s.to_map()).unwrap();
        assert_eq!(s, again);
        assert_eq!(s.to_map().len(), valid_map().len());
    }

    #[test]
    fn optional_keys_fall_back_to_defaults() {
        let map: BTreeMap<String, String> = [
            ("sensing_count", "3"),
            ("sunlight_from", "2024/01/01"),
            ("temperature_from", "2024/01/01"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let s = Settings::from_map(&map).unwrap();
        assert_eq!(s.outputs, [false; 4]);
        assert!(!s.contec_try);
        assert_eq!(s.sensing_interval, 60);
    }

    #[test]
    fn zero_sensing_count_rejected() {
        let mut m = valid_map();
        m.insert("sensing_count".into(), "0".into());
        assert_settings_err(&m, "sensing_count must be positive");
    }

    #[test]
    fn missing_sensing_count_rejected() {
        let mut m = valid_map();
        m.remove("sensing_count");
        assert_settings_err(&m, "sensing_count is required");
    }

    #[test]
    fn missing_epoch_rejected() {
        let mut m = valid_map();
        m.remove("temperature_from");
        assert_settings_err(&m, "temperature_from is required");
    }

    #[test]
    fn dashed_epoch_rejected() {
        let mut m = valid_map();
        m.insert("sunlight_from".into(), "2024-04-01".into());
        assert_settings_err(&m, "not a YYYY/MM/DD date");
    }

    #[test]
    fn bad_flag_rejected() {
        let mut m = valid_map();
        m.insert("isNightSense".into(), "yes".into());
        assert_settings_err(&m, "isNightSense");
    }

    #[test]
    fn bad_relay_rejected() {
        let mut m = valid_map();
        m.insert("output3".into(), "on".into());
        assert_settings_err(&m, "output3");
    }

    #[test]
    fn latitude_out_of_range_rejected() {
        let mut m = valid_map();
        m.insert("lat".into(), "123".into());
        assert_settings_err(&m, "lat 123 out of range");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut m = valid_map();
        m.insert("lat".into(), "north".into());
        m.insert("sensing_count".into(), "-1".into());
        m.remove("sunlight_from");
        let msg = Settings::from_map(&m).unwrap_err().to_string();
        assert!(msg.contains("lat"), "missing lat error in: {msg}");
        assert!(msg.contains("sensing_count"), "missing count error in: {msg}");
        assert!(msg.contains("sunlight_from"), "missing epoch error in: {msg}");
    }

    #[test]
    fn location_copies_coordinates() {
        let loc = Settings::from_map(&valid_map()).unwrap().location();
        assert_eq!(loc.place, "Sapporo");
        assert_eq!(loc.lat, 43.06);
        assert_eq!(loc.elev, 20.0);
    }
}
