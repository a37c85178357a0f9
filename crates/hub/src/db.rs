use anyhow::{Context, Result as AnyResult};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::BTreeMap;
use std::str::FromStr;
use time::Date;

use crate::dates::{fmt_date, fmt_minute, parse_date, parse_minute};
use crate::ephemeris::Ephemeris;
use crate::error::Result;
use crate::store::{
    DailyAggregate, DailySummary, LightingEvent, SummaryStore, TemperatureLedStore,
    TemperatureReading,
};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// Row counts removed by a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeletedRows {
    pub temperature: u64,
    pub led: u64,
    pub summary: u64,
}

// ---------------------------------------------------------------------------
// Raw rows (dates as stored text)
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct TemperatureRow {
    date: String,
    datetime: String,
    temperature: f64,
    humidity: f64,
}

#[derive(sqlx::FromRow)]
struct LedRow {
    date: String,
    interval_start: String,
    interval_end: String,
    minutes: i64,
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    date: String,
    max_temp: Option<f64>,
    min_temp: Option<f64>,
    mean_temp: Option<f64>,
    lighting_minutes: Option<i64>,
    sunrise_time: Option<String>,
    sunset_time: Option<String>,
    moon_phase: Option<String>,
}

fn decode_err(e: time::error::Parse) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

impl TryFrom<TemperatureRow> for TemperatureReading {
    type Error = sqlx::Error;

    fn try_from(r: TemperatureRow) -> Result<Self, Self::Error> {
        Ok(Self {
            date: parse_date(&r.date).map_err(decode_err)?,
            datetime: parse_minute(&r.datetime).map_err(decode_err)?,
            temperature: r.temperature,
            humidity: r.humidity,
        })
    }
}

impl TryFrom<LedRow> for LightingEvent {
    type Error = sqlx::Error;

    fn try_from(r: LedRow) -> Result<Self, Self::Error> {
        Ok(Self {
            date: parse_date(&r.date).map_err(decode_err)?,
            interval_start: parse_minute(&r.interval_start).map_err(decode_err)?,
            interval_end: parse_minute(&r.interval_end).map_err(decode_err)?,
            minutes: r.minutes,
        })
    }
}

impl TryFrom<SummaryRow> for DailySummary {
    type Error = sqlx::Error;

    fn try_from(r: SummaryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            date: parse_date(&r.date).map_err(decode_err)?,
            max_temp: r.max_temp,
            min_temp: r.min_temp,
            mean_temp: r.mean_temp,
            lighting_minutes: r.lighting_minutes,
            sunrise_time: r.sunrise_time,
            sunset_time: r.sunset_time,
            moon_phase: r.moon_phase,
        })
    }
}

fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = sqlx::Error>,
{
    rows.into_iter()
        .map(|r| T::try_from(r).map_err(Into::into))
        .collect()
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/greenhouse/greenhouse.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> AnyResult<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> AnyResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Settings (key -> value)
    // ----------------------------

    pub async fn load_config(&self) -> Result<BTreeMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM config")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    /// Full overwrite: keys absent from `entries` are gone afterwards.
    pub async fn replace_config(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM config").execute(&mut *tx).await?;
        for (key, value) in entries {
            sqlx::query("INSERT INTO config (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ----------------------------
    // Range reads for export
    // ----------------------------

    pub async fn temperatures_between(
        &self,
        from: Date,
        to: Date,
    ) -> Result<Vec<TemperatureReading>> {
        let rows: Vec<TemperatureRow> = sqlx::query_as(
            r#"
            SELECT date, datetime, temperature, humidity
            FROM temperature
            WHERE date BETWEEN ? AND ?
            ORDER BY datetime
            "#,
        )
        .bind(fmt_date(from))
        .bind(fmt_date(to))
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    pub async fn lighting_between(&self, from: Date, to: Date) -> Result<Vec<LightingEvent>> {
        let rows: Vec<LedRow> = sqlx::query_as(
            r#"
            SELECT date, interval_start, interval_end, minutes
            FROM led
            WHERE date BETWEEN ? AND ?
            ORDER BY interval_end
            "#,
        )
        .bind(fmt_date(from))
        .bind(fmt_date(to))
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    // ----------------------------
    // Retention
    // ----------------------------

    /// Delete every dated row on or before `through`. The `config` table has
    /// no date and is never touched.
    pub async fn delete_through(&self, through: Date) -> Result<DeletedRows> {
        let key = fmt_date(through);
        let mut tx = self.pool.begin().await?;

        let temperature = sqlx::query("DELETE FROM temperature WHERE date <= ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let led = sqlx::query("DELETE FROM led WHERE date <= ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let summary = sqlx::query("DELETE FROM summary WHERE date <= ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(DeletedRows {
            temperature,
            led,
            summary,
        })
    }
}

// ---------------------------------------------------------------------------
// Store implementations
// ---------------------------------------------------------------------------

impl TemperatureLedStore for Db {
    async fn insert_temperature(&self, r: &TemperatureReading) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO temperature (date, datetime, temperature, humidity)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(fmt_date(r.date))
        .bind(fmt_minute(r.datetime))
        .bind(r.temperature)
        .bind(r.humidity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn temperatures_on(&self, date: Date) -> Result<Vec<TemperatureReading>> {
        let rows: Vec<TemperatureRow> = sqlx::query_as(
            r#"
            SELECT date, datetime, temperature, humidity
            FROM temperature
            WHERE date = ?
            ORDER BY datetime
            "#,
        )
        .bind(fmt_date(date))
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    async fn insert_lighting(&self, e: &LightingEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO led (date, interval_start, interval_end, minutes)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(fmt_date(e.date))
        .bind(fmt_minute(e.interval_start))
        .bind(fmt_minute(e.interval_end))
        .bind(e.minutes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lighting_on(&self, date: Date) -> Result<Vec<LightingEvent>> {
        let rows: Vec<LedRow> = sqlx::query_as(
            r#"
            SELECT date, interval_start, interval_end, minutes
            FROM led
            WHERE date = ?
            ORDER BY interval_end
            "#,
        )
        .bind(fmt_date(date))
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }
}

impl SummaryStore for Db {
    async fn summary_on(&self, date: Date) -> Result<Option<DailySummary>> {
        let row: Option<SummaryRow> = sqlx::query_as(
            r#"
            SELECT date, max_temp, min_temp, mean_temp, lighting_minutes,
                   sunrise_time, sunset_time, moon_phase
            FROM summary
            WHERE date = ?
            "#,
        )
        .bind(fmt_date(date))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(DailySummary::try_from).transpose()?)
    }

    async fn latest_summary_date(&self) -> Result<Option<Date>> {
        let max: Option<String> = sqlx::query_scalar("SELECT MAX(date) FROM summary")
            .fetch_one(&self.pool)
            .await?;
        Ok(max
            .map(|s| parse_date(&s).map_err(decode_err))
            .transpose()?)
    }

    async fn upsert_aggregate(&self, a: &DailyAggregate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO summary (date, max_temp, min_temp, mean_temp, lighting_minutes)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(date) DO UPDATE SET
              max_temp=excluded.max_temp,
              min_temp=excluded.min_temp,
              mean_temp=excluded.mean_temp,
              lighting_minutes=excluded.lighting_minutes
            "#,
        )
        .bind(fmt_date(a.date))
        .bind(a.max_temp)
        .bind(a.min_temp)
        .bind(a.mean_temp)
        .bind(a.lighting_minutes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_ephemeris(&self, date: Date, e: &Ephemeris) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO summary (date, sunrise_time, sunset_time, moon_phase)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(date) DO UPDATE SET
              sunrise_time=excluded.sunrise_time,
              sunset_time=excluded.sunset_time,
              moon_phase=excluded.moon_phase
            "#,
        )
        .bind(fmt_date(date))
        .bind(&e.sunrise_time)
        .bind(&e.sunset_time)
        .bind(&e.moon_phase)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn summaries_between(&self, from: Date, to: Date) -> Result<Vec<DailySummary>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            r#"
            SELECT date, max_temp, min_temp, mean_temp, lighting_minutes,
                   sunrise_time, sunset_time, moon_phase
            FROM summary
            WHERE date BETWEEN ? AND ?
            ORDER BY date
            "#,
        )
        .bind(fmt_date(from))
        .bind(fmt_date(to))
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
