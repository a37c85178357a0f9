mod accumulator;
mod board;
mod config;
mod dates;
mod db;
mod ephemeris;
mod error;
mod export;
mod frame;
mod ingest;
mod mqtt;
mod series;
mod settings;
mod state;
mod store;
mod summary;
mod web;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use board::{Board, IoBoard, SimulatedFrames};
use db::Db;
use ephemeris::SimulatedEphemeris;
use mqtt::{extract_node_id, ClimateMsg, CLIMATE_TOPIC};
use settings::Settings;
use state::SystemState;
use summary::SummaryComputer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let db_url =
        env::var("DB_URL").unwrap_or_else(|_| "sqlite:greenhouse.db?mode=rwc".to_string());

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (board + settings seed) ─────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "greenhouse.toml".to_string());
    let cfg = config::load(&config_path)?;
    config::apply(&cfg, &db).await?;
    let offset = cfg.utc_offset()?;

    // The config table is the source of truth from here on.
    let settings = Settings::from_map(&db.load_config().await?)
        .context("config table is missing or invalid; seed it from [settings]")?;
    info!(
        place = %settings.place,
        sensing_count = settings.sensing_count,
        simulated_board = settings.contec_try,
        "settings loaded"
    );

    // ── IO board ────────────────────────────────────────────────────
    let pins = |v: &[i64]| {
        v.iter()
            .map(|&p| u8::try_from(p))
            .collect::<std::result::Result<Vec<u8>, _>>()
    };
    let mut io = IoBoard::new(
        &pins(&cfg.board.input_pins)?,
        &pins(&cfg.board.output_pins)?,
        cfg.board.active_low,
    )?;
    io.define_output_relays(settings.outputs);
    io.set_output(false);
    let board = Arc::new(Mutex::new(Board::new(io, SimulatedFrames::new())));

    // ── Shared state (ephemeral, for the status API) ────────────────
    let shared = Arc::new(RwLock::new(SystemState::new(settings)));
    shared
        .write()
        .await
        .record_system("hub started".to_string());

    let summaries = Arc::new(SummaryComputer::new(db.clone()));

    // ── Web server ──────────────────────────────────────────────────
    let app = web::AppState {
        db: db.clone(),
        summaries: Arc::clone(&summaries),
        shared: Arc::clone(&shared),
        board,
        ephemeris: Arc::new(SimulatedEphemeris::new(offset)),
        offset,
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(app).await {
            error!(error = %format!("{e:#}"), "web server stopped");
        }
    });

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("greenhouse-hub", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);
    client.subscribe(CLIMATE_TOPIC, QoS::AtLeastOnce).await?;
    info!(topic = CLIMATE_TOPIC, "hub subscribed");

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let Some(node_id) = extract_node_id(&p.topic) else {
                    debug!(topic = %p.topic, "unhandled topic");
                    continue;
                };

                let msg = match serde_json::from_slice::<ClimateMsg>(&p.payload) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(topic = %p.topic, error = %e, "bad climate json");
                        shared
                            .write()
                            .await
                            .record_error(format!("bad climate json from {node_id}: {e}"));
                        continue;
                    }
                };

                let at = dates::from_unix_local(msg.ts, offset).unwrap_or_else(|| {
                    warn!(node = %node_id, ts = msg.ts, "timestamp out of range, using now");
                    dates::now_local(offset)
                });

                if let Err(e) = ingest::record_climate(
                    &summaries,
                    &shared,
                    node_id,
                    at,
                    msg.temperature,
                    msg.humidity,
                )
                .await
                {
                    error!(node = %node_id, error = %e, "climate ingest failed");
                    shared
                        .write()
                        .await
                        .record_error(format!("climate from {node_id}: {e}"));
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "mqtt error, reconnecting");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_error(format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
