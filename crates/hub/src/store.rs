//! Row types and the two table abstractions the aggregation code reads
//! from and writes to. `Db` is the SQLite implementation.

use serde::Serialize;
use std::future::Future;
use time::{Date, PrimitiveDateTime};

use crate::dates::{slash_date, slash_minute};
use crate::ephemeris::Ephemeris;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureReading {
    #[serde(with = "slash_date")]
    pub date: Date,
    #[serde(with = "slash_minute")]
    pub datetime: PrimitiveDateTime,
    pub temperature: f64,
    pub humidity: f64,
}

impl TemperatureReading {
    /// The day key is always the reading's own calendar day.
    pub fn new(datetime: PrimitiveDateTime, temperature: f64, humidity: f64) -> Self {
        Self {
            date: datetime.date(),
            datetime,
            temperature,
            humidity,
        }
    }
}

/// One completed grow-light interval. `minutes` is whatever the caller
/// reported; it is stored as given and never recomputed from the bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LightingEvent {
    #[serde(with = "slash_date")]
    pub date: Date,
    #[serde(with = "slash_minute")]
    pub interval_start: PrimitiveDateTime,
    #[serde(with = "slash_minute")]
    pub interval_end: PrimitiveDateTime,
    pub minutes: i64,
}

/// Temperature and lighting columns of a summary row, as produced by a
/// recompute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAggregate {
    #[serde(with = "slash_date")]
    pub date: Date,
    pub max_temp: f64,
    pub min_temp: f64,
    pub mean_temp: f64,
    pub lighting_minutes: i64,
}

/// A full summary row. Aggregate columns are empty on rows that so far only
/// carry ephemeris data, and vice versa.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    #[serde(with = "slash_date")]
    pub date: Date,
    pub max_temp: Option<f64>,
    pub min_temp: Option<f64>,
    pub mean_temp: Option<f64>,
    pub lighting_minutes: Option<i64>,
    pub sunrise_time: Option<String>,
    pub sunset_time: Option<String>,
    pub moon_phase: Option<String>,
}

// ---------------------------------------------------------------------------
// Table abstractions
// ---------------------------------------------------------------------------

/// Append-only raw tables: temperature readings and lighting events.
pub trait TemperatureLedStore {
    fn insert_temperature(
        &self,
        reading: &TemperatureReading,
    ) -> impl Future<Output = Result<()>> + Send;

    fn temperatures_on(&self, date: Date)
        -> impl Future<Output = Result<Vec<TemperatureReading>>> + Send;

    fn insert_lighting(&self, event: &LightingEvent) -> impl Future<Output = Result<()>> + Send;

    fn lighting_on(&self, date: Date) -> impl Future<Output = Result<Vec<LightingEvent>>> + Send;
}

/// One row per date.
pub trait SummaryStore {
    fn summary_on(&self, date: Date) -> impl Future<Output = Result<Option<DailySummary>>> + Send;

    fn latest_summary_date(&self) -> impl Future<Output = Result<Option<Date>>> + Send;

    /// Insert the row or overwrite only its temperature/lighting columns.
    fn upsert_aggregate(&self, agg: &DailyAggregate) -> impl Future<Output = Result<()>> + Send;

    /// Insert the row or overwrite only its sunrise/sunset/moon columns.
    fn upsert_ephemeris(
        &self,
        date: Date,
        ephemeris: &Ephemeris,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Rows with `from <= date <= to`, ascending by date.
    fn summaries_between(
        &self,
        from: Date,
        to: Date,
    ) -> impl Future<Output = Result<Vec<DailySummary>>> + Send;
}
