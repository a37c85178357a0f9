//! Write paths shared by the HTTP API and the MQTT loop: climate readings,
//! lighting events, board polls and the daily ephemeris.

use anyhow::{Context, Result as AnyResult};
use serde::Serialize;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::board::Board;
use crate::ephemeris::{Ephemeris, EphemerisSource};
use crate::error::{CoreError, Result};
use crate::state::{FrameSnapshot, SharedState};
use crate::store::{
    DailySummary, LightingEvent, SummaryStore, TemperatureLedStore, TemperatureReading,
};
use crate::summary::SummaryComputer;

// ---------------------------------------------------------------------------
// Climate
// ---------------------------------------------------------------------------

/// Store one reading and refresh that day's summary.
pub async fn record_climate<S>(
    summaries: &SummaryComputer<S>,
    state: &SharedState,
    source: &str,
    datetime: PrimitiveDateTime,
    temperature: f64,
    humidity: f64,
) -> Result<DailySummary>
where
    S: SummaryStore + TemperatureLedStore + Sync,
{
    if !temperature.is_finite() || !humidity.is_finite() {
        return Err(CoreError::invalid_reading("reading must be a finite number"));
    }
    let reading = TemperatureReading::new(datetime, temperature, humidity);
    summaries.store().insert_temperature(&reading).await?;
    state
        .write()
        .await
        .record_climate(source, temperature, humidity);

    // The day has at least the row just written, so NoData cannot happen.
    let row = summaries.recompute_day(reading.date).await?;
    debug!(%source, date = %reading.date, temperature, humidity, "climate recorded");
    Ok(row)
}

// ---------------------------------------------------------------------------
// Lighting
// ---------------------------------------------------------------------------

/// Store a finished lighting interval ending at `end` and refresh its day.
///
/// Returns `None` when the day has no temperature readings yet; the event
/// is still stored and the summary catches up on the next reading.
pub async fn record_lighting<S>(
    summaries: &SummaryComputer<S>,
    state: &SharedState,
    minutes: i64,
    end: PrimitiveDateTime,
) -> Result<Option<DailySummary>>
where
    S: SummaryStore + TemperatureLedStore + Sync,
{
    if minutes < 0 {
        return Err(CoreError::invalid_reading(format!(
            "minutes must not be negative, got {minutes}"
        )));
    }
    let start = minutes
        .checked_mul(60)
        .map(Duration::seconds)
        .and_then(|span| end.checked_sub(span))
        .ok_or_else(|| CoreError::invalid_reading(format!("{minutes} minutes is out of range")))?;
    let event = LightingEvent {
        date: end.date(),
        interval_start: start,
        interval_end: end,
        minutes,
    };
    summaries.store().insert_lighting(&event).await?;
    state.write().await.record_lighting(minutes);
    info!(date = %event.date, minutes, "lighting event recorded");

    match summaries.recompute_day(event.date).await {
        Ok(row) => Ok(Some(row)),
        Err(e) if e.is_no_data() => {
            warn!(date = %event.date, "no readings yet; summary not updated");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// Board poll
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct FramePoll {
    pub light_sum: u32,
    pub light_cnt: u32,
    pub log: String,
    pub volt: &'static str,
}

/// Read one frame (simulated or hardware, per settings) and fold it into
/// the light cycle when `accumulate` is set.
pub async fn poll_frame(
    state: &SharedState,
    board: &Mutex<Board>,
    accumulate: bool,
) -> AnyResult<FramePoll> {
    let simulated = state.read().await.settings.contec_try;
    let frame = board
        .lock()
        .await
        .read_frame(simulated)
        .context("failed to read io board")?;

    let mut st = state.write().await;
    let sensing_count = st.settings.sensing_count;
    let (decoded, cycle) = match st.accumulator.observe(&frame, accumulate, sensing_count) {
        Ok(v) => v,
        Err(e) => {
            st.record_error(format!("frame rejected: {e}"));
            return Err(e.into());
        }
    };

    st.record_frame(
        FrameSnapshot {
            ts: OffsetDateTime::now_utc(),
            log: decoded.rendered_log.clone(),
            light_count: decoded.light_count,
            voltage: decoded.voltage,
        },
        accumulate,
    );

    Ok(FramePoll {
        light_sum: cycle.sum,
        light_cnt: cycle.cycle_index,
        log: decoded.rendered_log,
        volt: decoded.voltage.label(),
    })
}

// ---------------------------------------------------------------------------
// Ephemeris
// ---------------------------------------------------------------------------

/// Compute `date`'s ephemeris at the configured location and store it
/// without touching the day's aggregate columns.
pub async fn write_ephemeris<S: SummaryStore + Sync>(
    store: &S,
    source: &dyn EphemerisSource,
    state: &SharedState,
    date: Date,
) -> Result<Ephemeris> {
    let location = state.read().await.settings.location();
    let eph = source.compute_day(&location, date)?;
    store.upsert_ephemeris(date, &eph).await?;
    info!(
        %date,
        place = %location.place,
        sunrise = %eph.sunrise_time,
        sunset = %eph.sunset_time,
        moon = %eph.moon_phase,
        "ephemeris stored"
    );
    Ok(eph)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(not(feature = "gpio"))]
    use crate::board::{IoBoard, SimulatedFrames};
    use crate::db::Db;
    use crate::ephemeris::SimulatedEphemeris;
    use crate::settings::Settings;
    use crate::state::SystemState;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use time::macros::{date, datetime, offset};
    use tokio::sync::RwLock;

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn settings(sensing_count: &str, contec_try: &str) -> Settings {
        let map: BTreeMap<String, String> = [
            ("sensing_count", sensing_count),
            ("sunlight_from", "2024/01/01"),
            ("temperature_from", "2024/01/01"),
            ("isContecTry", contec_try),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Settings::from_map(&map).unwrap()
    }

    fn shared(s: Settings) -> SharedState {
        Arc::new(RwLock::new(SystemState::new(s)))
    }

    #[cfg(not(feature = "gpio"))]
    fn mock_board() -> Mutex<Board> {
        Mutex::new(Board::new(
            IoBoard::new(&[5, 6, 13, 19, 26, 16, 20, 21], &[17, 27, 22, 23], false).unwrap(),
            SimulatedFrames::with_seed(1),
        ))
    }

    #[tokio::test]
    async fn climate_updates_summary() {
        let computer = SummaryComputer::new(test_db().await);
        let state = shared(settings("3", "false"));

        record_climate(&computer, &state, "api", datetime!(2024-06-01 08:00), 18.0, 70.0)
            .await
            .unwrap();
        let row = record_climate(&computer, &state, "api", datetime!(2024-06-01 14:00), 26.0, 50.0)
            .await
            .unwrap();

        assert_eq!(row.max_temp, Some(26.0));
        assert_eq!(row.min_temp, Some(18.0));
        assert_eq!(row.mean_temp, Some(22.0));
    }

    #[tokio::test]
    async fn non_finite_reading_rejected() {
        let computer = SummaryComputer::new(test_db().await);
        let state = shared(settings("3", "false"));
        let at = datetime!(2024-06-01 08:00);
        let err = record_climate(&computer, &state, "api", at, f64::NAN, 50.0)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidReading(_)));
        let err = record_climate(&computer, &state, "api", at, 20.0, f64::INFINITY)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidReading(_)));
        assert!(computer.store().temperatures_on(at.date()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lighting_interval_ends_at_end_and_keys_by_end_day() {
        let computer = SummaryComputer::new(test_db().await);
        let state = shared(settings("3", "false"));

        // 00:20 minus 45 minutes crosses midnight; the event belongs to the end day.
        record_lighting(&computer, &state, 45, datetime!(2024-06-02 00:20))
            .await
            .unwrap();

        let events = computer.store().lighting_on(date!(2024 - 06 - 02)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].interval_start, datetime!(2024-06-01 23:35));
        assert_eq!(events[0].minutes, 45);
    }

    #[tokio::test]
    async fn lighting_without_readings_is_stored_but_not_summarised() {
        let computer = SummaryComputer::new(test_db().await);
        let state = shared(settings("3", "false"));

        let row = record_lighting(&computer, &state, 30, datetime!(2024-06-03 07:00))
            .await
            .unwrap();
        assert!(row.is_none());
        assert!(computer
            .store()
            .summary_on(date!(2024 - 06 - 03))
            .await
            .unwrap()
            .is_none());

        // A later reading picks the minutes up.
        let row = record_climate(&computer, &state, "api", datetime!(2024-06-03 09:00), 20.0, 60.0)
            .await
            .unwrap();
        assert_eq!(row.lighting_minutes, Some(30));
    }

    #[tokio::test]
    async fn negative_minutes_rejected() {
        let computer = SummaryComputer::new(test_db().await);
        let state = shared(settings("3", "false"));
        let err = record_lighting(&computer, &state, -5, datetime!(2024-06-03 07:00))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidReading(_)));
    }

    #[tokio::test]
    async fn huge_minutes_rejected_without_storing() {
        let computer = SummaryComputer::new(test_db().await);
        let state = shared(settings("3", "false"));
        let end = datetime!(2024-06-03 07:00);

        for minutes in [i64::MAX, i64::MAX / 60 + 1, 60_000_000_000] {
            let err = record_lighting(&computer, &state, minutes, end)
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::InvalidReading(_)), "{minutes}: {err}");
        }
        assert!(computer.store().lighting_on(end.date()).await.unwrap().is_empty());
    }

    #[cfg(not(feature = "gpio"))]
    #[tokio::test]
    async fn poll_accumulates_hardware_frames() {
        let state = shared(settings("3", "false"));
        let board = mock_board();
        board
            .lock()
            .await
            .io
            .set_inputs(vec![true, true, false, false, false, false, true, false]);

        let first = poll_frame(&state, &board, true).await.unwrap();
        assert_eq!((first.light_cnt, first.light_sum), (1, 2));
        assert_eq!(first.volt, "blue");
        assert_eq!(first.log, "○○−−−−○−");

        let second = poll_frame(&state, &board, true).await.unwrap();
        assert_eq!((second.light_cnt, second.light_sum), (2, 4));

        // Wrap: the new cycle starts with this frame's count.
        let third = poll_frame(&state, &board, true).await.unwrap();
        assert_eq!((third.light_cnt, third.light_sum), (0, 2));
    }

    #[cfg(not(feature = "gpio"))]
    #[tokio::test]
    async fn poll_without_accumulate_leaves_cycle_alone() {
        let state = shared(settings("3", "true"));
        let board = mock_board();

        let polled = poll_frame(&state, &board, false).await.unwrap();
        assert_eq!((polled.light_cnt, polled.light_sum), (0, 0));
        assert_eq!(polled.log.chars().count(), 8);
        assert!(state.read().await.last_frame.is_some());
    }

    #[tokio::test]
    async fn ephemeris_written_without_touching_aggregates() {
        let computer = SummaryComputer::new(test_db().await);
        let state = shared(settings("3", "false"));
        record_climate(&computer, &state, "api", datetime!(2024-06-21 12:00), 25.0, 40.0)
            .await
            .unwrap();

        let source = SimulatedEphemeris::new(offset!(+9));
        write_ephemeris(computer.store(), &source, &state, date!(2024 - 06 - 21))
            .await
            .unwrap();

        let row = computer
            .store()
            .summary_on(date!(2024 - 06 - 21))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.max_temp, Some(25.0));
        assert!(row.sunrise_time.is_some());
        assert!(row.moon_phase.is_some());
    }
}
