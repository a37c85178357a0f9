use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use time::{Date, Duration, PrimitiveDateTime, UtcOffset};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::board::Board;
use crate::dates::{fmt_date, now_local, parse_date, slash_minute};
use crate::db::Db;
use crate::ephemeris::EphemerisSource;
use crate::error::CoreError;
use crate::export::{self, Format, Table};
use crate::ingest;
use crate::series::{CumulativeSeriesBuilder, SeriesRow};
use crate::settings::Settings;
use crate::state::{SharedState, StatusResponse};
use crate::store::SummaryStore;
use crate::summary::SummaryComputer;

const DEFAULT_DAYS: u32 = 5;

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub summaries: Arc<SummaryComputer<Db>>,
    pub shared: SharedState,
    pub board: Arc<Mutex<Board>>,
    pub ephemeris: Arc<dyn EphemerisSource>,
    pub offset: UtcOffset,
}

impl AppState {
    fn today(&self) -> Date {
        now_local(self.offset).date()
    }

    fn now(&self) -> PrimitiveDateTime {
        now_local(self.offset)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    Core(CoreError),
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self::Core(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<CoreError>() {
            Ok(core) => Self::Core(core),
            Err(other) => Self::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Core(
                e @ (CoreError::InvalidFrame { .. }
                | CoreError::InvalidConfig(_)
                | CoreError::InvalidReading(_)),
            ) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::Core(e @ CoreError::NoData { .. }) => (StatusCode::NOT_FOUND, e.to_string()),
            Self::Core(e @ CoreError::Store(_)) => {
                error!(error = %e, "store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal(e) => {
                error!(error = %format!("{e:#}"), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn date_param(raw: &str) -> ApiResult<Date> {
    parse_date(raw)
        .map_err(|_| ApiError::BadRequest(format!("bad date {raw:?}, expected YYYY/MM/DD")))
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/frame", post(api_frame))
        .route("/api/led", post(api_led))
        .route("/api/climate", post(api_climate))
        .route("/api/light", post(api_light))
        .route("/api/ephemeris", post(api_ephemeris))
        .route("/api/summary", get(api_summary))
        .route("/api/config", get(api_get_config).put(api_put_config))
        .route("/api/data", delete(api_delete_data))
        .route("/api/export/{table}", get(api_export))
        .with_state(app)
}

async fn api_status(State(app): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let latest = app.db.latest_summary_date().await?;
    let mut status = app.shared.read().await.to_status();
    status.latest_summary = latest.map(fmt_date);
    Ok(Json(status))
}

// -- Board ------------------------------------------------------------------

#[derive(Deserialize)]
struct FrameRequest {
    #[serde(default)]
    accumulate: bool,
}

async fn api_frame(
    State(app): State<AppState>,
    Json(req): Json<FrameRequest>,
) -> ApiResult<Json<ingest::FramePoll>> {
    let polled = ingest::poll_frame(&app.shared, &app.board, req.accumulate).await?;
    Ok(Json(polled))
}

#[derive(Deserialize)]
struct LightRequest {
    on: bool,
}

async fn api_light(
    State(app): State<AppState>,
    Json(req): Json<LightRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let simulated = app.shared.read().await.settings.contec_try;
    app.board.lock().await.set_output(req.on, simulated);
    Ok(Json(json!({ "on": req.on, "simulated": simulated })))
}

// -- Writes -----------------------------------------------------------------

#[derive(Deserialize)]
struct LedRequest {
    minutes: i64,
    #[serde(default, with = "slash_minute::option")]
    end: Option<PrimitiveDateTime>,
}

async fn api_led(
    State(app): State<AppState>,
    Json(req): Json<LedRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let end = req.end.unwrap_or_else(|| app.now());
    let summary = ingest::record_lighting(&app.summaries, &app.shared, req.minutes, end).await?;
    Ok(Json(json!({ "recorded": true, "summary": summary })))
}

#[derive(Deserialize)]
struct ClimateRequest {
    temperature: f64,
    humidity: f64,
    #[serde(default, with = "slash_minute::option")]
    datetime: Option<PrimitiveDateTime>,
}

async fn api_climate(
    State(app): State<AppState>,
    Json(req): Json<ClimateRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let at = req.datetime.unwrap_or_else(|| app.now());
    let summary = ingest::record_climate(
        &app.summaries,
        &app.shared,
        "api",
        at,
        req.temperature,
        req.humidity,
    )
    .await?;
    Ok(Json(json!({ "recorded": true, "summary": summary })))
}

#[derive(Deserialize)]
struct DateQuery {
    date: Option<String>,
}

async fn api_ephemeris(
    State(app): State<AppState>,
    Query(q): Query<DateQuery>,
) -> ApiResult<Json<crate::ephemeris::Ephemeris>> {
    let date = match q.date.as_deref() {
        Some(raw) => date_param(raw)?,
        None => app.today(),
    };
    let eph = ingest::write_ephemeris(&app.db, app.ephemeris.as_ref(), &app.shared, date).await?;
    Ok(Json(eph))
}

// -- Reports ----------------------------------------------------------------

#[derive(Deserialize)]
struct RangeQuery {
    date: Option<String>,
    days: Option<u32>,
    format: Option<String>,
}

impl RangeQuery {
    fn anchor(&self, app: &AppState) -> ApiResult<Date> {
        match self.date.as_deref() {
            Some(raw) => date_param(raw),
            None => Ok(app.today()),
        }
    }
}

async fn api_summary(
    State(app): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Json<Vec<SeriesRow>>> {
    let anchor = q.anchor(&app)?;
    let (sunlight_from, temperature_from) = {
        let st = app.shared.read().await;
        (st.settings.sunlight_from, st.settings.temperature_from)
    };
    let series = CumulativeSeriesBuilder::new(&app.db)
        .build_series(
            sunlight_from,
            temperature_from,
            anchor,
            q.days.unwrap_or(DEFAULT_DAYS),
        )
        .await?;
    Ok(Json(series.into_values().collect()))
}

async fn api_export(
    State(app): State<AppState>,
    Path(table): Path<String>,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Response> {
    let table = Table::parse(&table)
        .ok_or_else(|| ApiError::NotFound(format!("unknown table {table:?}")))?;
    let format = match q.format.as_deref() {
        None => Format::Csv,
        Some(raw) => Format::parse(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown format {raw:?}")))?,
    };
    let to = q.anchor(&app)?;
    let days = q.days.unwrap_or(DEFAULT_DAYS);
    let from = to
        .checked_sub(Duration::days(i64::from(days)))
        .ok_or_else(|| ApiError::BadRequest(format!("{days} days is out of range")))?;

    let body = export::dump(&app.db, table, from, to, format).await?;
    let mut resp = ([(header::CONTENT_TYPE, format.content_type())], body).into_response();
    if format == Format::Csv {
        let disposition = format!("attachment; filename=\"{}.csv\"", table.name());
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            resp.headers_mut().insert(header::CONTENT_DISPOSITION, value);
        }
    }
    Ok(resp)
}

// -- Settings and retention -------------------------------------------------

async fn api_get_config(State(app): State<AppState>) -> ApiResult<Json<BTreeMap<String, String>>> {
    Ok(Json(app.db.load_config().await?))
}

async fn api_put_config(
    State(app): State<AppState>,
    Json(map): Json<BTreeMap<String, String>>,
) -> ApiResult<Json<BTreeMap<String, String>>> {
    let settings = Settings::from_map(&map)?;
    let stored = settings.to_map();
    app.db.replace_config(&stored).await?;

    app.board
        .lock()
        .await
        .io
        .define_output_relays(settings.outputs);
    app.shared.write().await.replace_settings(settings);
    info!(keys = stored.len(), "settings replaced");
    Ok(Json(stored))
}

#[derive(Deserialize)]
struct DeleteQuery {
    through: String,
}

async fn api_delete_data(
    State(app): State<AppState>,
    Query(q): Query<DeleteQuery>,
) -> ApiResult<Json<crate::db::DeletedRows>> {
    let through = date_param(&q.through)?;
    let deleted = app.db.delete_through(through).await?;
    app.shared.write().await.record_system(format!(
        "deleted data through {}: {} readings, {} lighting events, {} summaries",
        q.through, deleted.temperature, deleted.led, deleted.summary
    ));
    Ok(Json(deleted))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(app: AppState) -> anyhow::Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!(%addr, "http api listening");

    axum::serve(listener, router(app))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
