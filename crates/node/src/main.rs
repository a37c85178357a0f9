mod dht;
#[cfg(feature = "sim")]
mod sim;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::{env, time::Duration};
use time::{OffsetDateTime, UtcOffset};
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(not(any(feature = "sim", feature = "dht")))]
compile_error!("enable the `sim` or `dht` feature to choose a climate source");

/// Payload the hub's climate ingest expects on `tele/<node_id>/climate`.
#[derive(Debug, Serialize)]
struct ClimateMsg {
    ts: i64,
    temperature: f64,
    humidity: f64,
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Climate source
// ---------------------------------------------------------------------------

enum Source {
    #[cfg(feature = "dht")]
    Dht(dht::Dht11),
    #[cfg(feature = "sim")]
    Sim(sim::ClimateSim, UtcOffset),
}

impl Source {
    fn from_env() -> Result<Self> {
        #[cfg(feature = "dht")]
        if !env_flag("CLIMATE_TRY") {
            let pin: u8 = env::var("DHT_PIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(14);
            return Ok(Self::Dht(dht::Dht11::new(pin)?));
        }
        Self::simulated()
    }

    #[cfg(feature = "sim")]
    fn simulated() -> Result<Self> {
        let offset_min: i32 = env::var("UTC_OFFSET_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let offset = UtcOffset::from_whole_seconds(offset_min.saturating_mul(60))
            .context("bad UTC_OFFSET_MINUTES")?;
        let try_mode = env_flag("CLIMATE_TRY");
        info!(try_mode, "using simulated climate");
        Ok(Self::Sim(sim::ClimateSim::new(try_mode), offset))
    }

    #[cfg(not(feature = "sim"))]
    fn simulated() -> Result<Self> {
        anyhow::bail!("CLIMATE_TRY needs the `sim` feature")
    }

    async fn sample(&mut self) -> Result<(f64, f64)> {
        match self {
            #[cfg(feature = "dht")]
            // Blocks this single-threaded runtime for the read; nothing else runs here.
            Self::Dht(sensor) => sensor.read(),
            #[cfg(feature = "sim")]
            Self::Sim(sim, offset) => {
                let now = OffsetDateTime::now_utc().to_offset(*offset);
                let hour = now.hour() as f64 + now.minute() as f64 / 60.0;
                Ok(sim.sample(hour))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "192.168.1.10".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let node_id = env::var("NODE_ID").unwrap_or_else(|_| "house-1".to_string());
    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(300);

    let mut source = Source::from_env()?;

    let mut mqttoptions = MqttOptions::new(format!("greenhouse-node-{node_id}"), broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    // Publish-only, but the event loop still has to run to keep the link up.
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("node connected to mqtt"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt error, retrying");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let topic = format!("tele/{node_id}/climate");
    info!(%topic, sample_every_s, "publishing climate");

    loop {
        match source.sample().await {
            Ok((temperature, humidity)) => {
                let msg = ClimateMsg {
                    ts: now_unix(),
                    temperature,
                    humidity,
                };
                let payload = serde_json::to_vec(&msg).context("encode climate msg")?;
                match client
                    .publish(&topic, QoS::AtLeastOnce, false, payload)
                    .await
                {
                    Ok(()) => info!(ts = msg.ts, temperature, humidity, "climate published"),
                    Err(e) => error!(error = %e, "publish failed"),
                }
            }
            Err(e) => error!(error = %format!("{e:#}"), "climate sample failed, skipping"),
        }

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_unix_is_recent() {
        let ts = now_unix();
        assert!(ts > 1_704_067_200, "timestamp too old: {ts}");
        assert!(ts < 2_208_988_800, "timestamp too far in future: {ts}");
    }

    #[test]
    fn climate_msg_matches_hub_payload() {
        let msg = ClimateMsg {
            ts: 1_700_000_000,
            temperature: 21.4,
            humidity: 63.0,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["ts"], 1_700_000_000);
        assert_eq!(json["temperature"], 21.4);
        assert_eq!(json["humidity"], 63.0);
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[cfg(feature = "sim")]
    #[tokio::test]
    async fn simulated_source_samples() {
        let mut src = Source::Sim(sim::ClimateSim::new(true), UtcOffset::UTC);
        let (t, h) = src.sample().await.unwrap();
        assert!((30.0..=60.0).contains(&t));
        assert!((60.0..=90.0).contains(&h));
    }
}
