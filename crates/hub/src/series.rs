//! Running totals since a configured start date, joined onto the daily
//! summary rows of a display window.
//!
//! Lighting minutes and mean temperature each count from their own epoch.
//! A summary row whose value is NULL shows `None` at its own position but
//! does not interrupt the running total for later days.

use serde::Serialize;
use std::collections::BTreeMap;
use time::{Date, Duration};
use tracing::debug;

use crate::dates::slash_date;
use crate::error::{CoreError, Result};
use crate::store::{DailySummary, SummaryStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesRow {
    #[serde(with = "slash_date")]
    pub date: Date,
    pub max_temp: Option<f64>,
    pub min_temp: Option<f64>,
    pub mean_temp: Option<f64>,
    pub lighting_minutes: Option<i64>,
    pub lighting_minutes_cumulative: Option<i64>,
    pub mean_temp_cumulative: Option<f64>,
}

pub struct CumulativeSeriesBuilder<'a, S> {
    store: &'a S,
}

impl<'a, S: SummaryStore + Sync> CumulativeSeriesBuilder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Rows for the `days` dates ending at `anchor`, each carrying both
    /// running totals as of that date.
    pub async fn build_series(
        &self,
        sunlight_from: Date,
        temperature_from: Date,
        anchor: Date,
        days: u32,
    ) -> Result<BTreeMap<Date, SeriesRow>> {
        if days == 0 {
            return Err(CoreError::invalid_config("days must be at least 1"));
        }
        let window_start = anchor
            .checked_sub(Duration::days(i64::from(days) - 1))
            .ok_or_else(|| {
                CoreError::invalid_config(format!("{days} days before {anchor} is out of range"))
            })?;

        // One scan covers the window and both epochs.
        let scan_from = window_start.min(sunlight_from).min(temperature_from);
        let rows = self.store.summaries_between(scan_from, anchor).await?;

        let light = running_sum(&rows, sunlight_from, |r| r.lighting_minutes);
        let temp = running_sum(&rows, temperature_from, |r| r.mean_temp);

        let out: BTreeMap<Date, SeriesRow> = rows
            .iter()
            .filter(|r| r.date >= window_start)
            .map(|r| {
                (
                    r.date,
                    SeriesRow {
                        date: r.date,
                        max_temp: r.max_temp,
                        min_temp: r.min_temp,
                        mean_temp: r.mean_temp,
                        lighting_minutes: r.lighting_minutes,
                        lighting_minutes_cumulative: light.get(&r.date).copied(),
                        mean_temp_cumulative: temp.get(&r.date).copied(),
                    },
                )
            })
            .collect();

        debug!(
            %anchor,
            days,
            scanned = rows.len(),
            shown = out.len(),
            "series built"
        );
        Ok(out)
    }
}

/// Running sum of `value` over `rows` (ascending by date) starting at
/// `epoch`. Dates whose own value is missing get no entry.
fn running_sum<T, F>(rows: &[DailySummary], epoch: Date, value: F) -> BTreeMap<Date, T>
where
    T: Copy + Default + std::ops::Add<Output = T>,
    F: Fn(&DailySummary) -> Option<T>,
{
    let mut acc = T::default();
    let mut out = BTreeMap::new();
    for r in rows.iter().filter(|r| r.date >= epoch) {
        if let Some(v) = value(r) {
            acc = acc + v;
            out.insert(r.date, acc);
        }
    }
    out
}

// ===========================================================================
// Tests
// ===========================================================================
