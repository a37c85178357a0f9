//! Raw table dumps over a date range, as CSV (the default) or JSON.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use time::Date;

use crate::db::Db;
use crate::store::SummaryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Temperature,
    Led,
    Summary,
}

impl Table {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "temperature" => Some(Self::Temperature),
            "led" => Some(Self::Led),
            "summary" => Some(Self::Summary),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Led => "led",
            Self::Summary => "summary",
        }
    }

    /// Column order of the CSV header; matches the row structs' field order.
    fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Temperature => &["date", "datetime", "temperature", "humidity"],
            Self::Led => &["date", "interval_start", "interval_end", "minutes"],
            Self::Summary => &[
                "date",
                "max_temp",
                "min_temp",
                "mean_temp",
                "lighting_minutes",
                "sunrise_time",
                "sunset_time",
                "moon_phase",
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Json,
}

impl Format {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
        }
    }
}

/// Rows of `table` dated within `[from, to]`, encoded as `format`.
pub async fn dump(
    db: &Db,
    table: Table,
    from: Date,
    to: Date,
    format: Format,
) -> Result<Vec<u8>> {
    match table {
        Table::Temperature => encode(table, &db.temperatures_between(from, to).await?, format),
        Table::Led => encode(table, &db.lighting_between(from, to).await?, format),
        Table::Summary => encode(table, &db.summaries_between(from, to).await?, format),
    }
}

fn encode<T: Serialize>(table: Table, rows: &[T], format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(rows).context("failed to encode json export"),
        Format::Csv => to_csv(table.columns(), rows),
    }
}

/// Header first, even with no rows. Missing values become empty fields.
fn to_csv<T: Serialize>(columns: &[&str], rows: &[T]) -> Result<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    wtr.write_record(columns).context("failed to write csv header")?;
    for row in rows {
        wtr.serialize(row).context("failed to write csv row")?;
    }
    wtr.into_inner()
        .map_err(|e| anyhow!("failed to flush csv export: {}", e.error()))
}

// ===========================================================================
// Tests
// ===========================================================================
