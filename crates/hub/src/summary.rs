//! Daily summary maintenance: re-derive one day's temperature extremes and
//! lighting total from the raw tables and upsert them into `summary`.
//!
//! `mean_temp` is the midpoint of the day's extremes, `(max + min) / 2`, not
//! the average of every reading.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::Date;
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::store::{DailyAggregate, DailySummary, SummaryStore, TemperatureLedStore};

// ---------------------------------------------------------------------------
// Per-date serialization
// ---------------------------------------------------------------------------

/// One async mutex per date, handed out on demand. Two recomputes of the
/// same day run one after the other; different days do not wait on each
/// other.
#[derive(Default)]
pub struct DateLocks {
    locks: Mutex<HashMap<Date, Arc<tokio::sync::Mutex<()>>>>,
}

impl DateLocks {
    fn lock_for(&self, date: Date) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Drop entries nobody else is holding so the map stays small.
        map.retain(|d, l| *d == date || Arc::strong_count(l) > 1);
        Arc::clone(map.entry(date).or_default())
    }
}

// ---------------------------------------------------------------------------
// Computer
// ---------------------------------------------------------------------------

pub struct SummaryComputer<S> {
    store: S,
    locks: DateLocks,
}

impl<S> SummaryComputer<S>
where
    S: SummaryStore + TemperatureLedStore + Sync,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: DateLocks::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Recompute and upsert the summary for `date`.
    ///
    /// Fails with `NoData` when the day has no temperature readings; nothing
    /// is written in that case. Store errors are returned as-is after a
    /// single attempt.
    pub async fn recompute_day(&self, date: Date) -> Result<DailySummary> {
        let lock = self.locks.lock_for(date);
        let _guard = lock.lock().await;

        let readings = self.store.temperatures_on(date).await?;
        let (max_temp, min_temp) = readings
            .iter()
            .map(|r| r.temperature)
            .fold(None, |acc: Option<(f64, f64)>, t| match acc {
                None => Some((t, t)),
                Some((hi, lo)) => Some((hi.max(t), lo.min(t))),
            })
            .ok_or(CoreError::NoData { date })?;

        // No events is a legitimate zero, not a failure.
        let lighting_minutes: i64 = self
            .store
            .lighting_on(date)
            .await?
            .iter()
            .map(|e| e.minutes)
            .sum();

        let agg = DailyAggregate {
            date,
            max_temp,
            min_temp,
            mean_temp: (max_temp + min_temp) / 2.0,
            lighting_minutes,
        };
        self.store.upsert_aggregate(&agg).await?;

        debug!(
            %date,
            readings = readings.len(),
            max_temp,
            min_temp,
            lighting_minutes,
            "summary recomputed"
        );

        match self.store.summary_on(date).await? {
            Some(row) => Ok(row),
            // Only reachable if the row was deleted between upsert and read.
            None => {
                info!(%date, "summary row vanished after upsert");
                Ok(DailySummary {
                    date,
                    max_temp: Some(agg.max_temp),
                    min_temp: Some(agg.min_temp),
                    mean_temp: Some(agg.mean_temp),
                    lighting_minutes: Some(agg.lighting_minutes),
                    sunrise_time: None,
                    sunset_time: None,
                    moon_phase: None,
                })
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
