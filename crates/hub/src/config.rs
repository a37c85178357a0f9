//! TOML config file loading, validation, and seeding of the `config` table.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use time::UtcOffset;

use crate::db::Db;
use crate::frame::FRAME_CHANNELS;
use crate::settings::{Settings, OUTPUT_RELAYS};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HubConfig {
    /// Offset of the greenhouse wall clock from UTC. Date keys are local.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub board: BoardEntry,
    /// Initial contents of the `config` table, used only while it is empty.
    #[serde(default)]
    pub settings: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
pub struct BoardEntry {
    /// BCM pins for the five light sensors then the three voltage relays.
    pub input_pins: Vec<i64>,
    /// BCM pins driving the grow-light relays `output1..4`.
    pub output_pins: Vec<i64>,
    #[serde(default)]
    pub active_low: bool,
}

impl Default for BoardEntry {
    fn default() -> Self {
        Self {
            input_pins: vec![5, 6, 13, 19, 26, 16, 20, 21],
            output_pins: vec![17, 27, 22, 23],
            active_low: false,
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 carry the ID EEPROM; 28+ are not on the header.
const VALID_GPIO_PINS: std::ops::RangeInclusive<i64> = 2..=27;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl HubConfig {
    /// Validate the whole file, reporting every violation found.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if UtcOffset::from_whole_seconds(self.utc_offset_minutes.saturating_mul(60)).is_err() {
            errors.push(format!(
                "utc_offset_minutes {} is not a valid offset",
                self.utc_offset_minutes
            ));
        }
        self.validate_board(&mut errors);
        if !self.settings.is_empty() {
            if let Err(e) = Settings::from_map(&self.seed_settings()) {
                errors.push(format!("settings: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_board(&self, errors: &mut Vec<String>) {
        let b = &self.board;
        if b.input_pins.len() != FRAME_CHANNELS {
            errors.push(format!(
                "board: expected {FRAME_CHANNELS} input_pins, got {}",
                b.input_pins.len()
            ));
        }
        if b.output_pins.len() != OUTPUT_RELAYS {
            errors.push(format!(
                "board: expected {OUTPUT_RELAYS} output_pins, got {}",
                b.output_pins.len()
            ));
        }

        let mut seen: HashSet<i64> = HashSet::new();
        for pin in b.input_pins.iter().chain(&b.output_pins) {
            if !VALID_GPIO_PINS.contains(pin) {
                errors.push(format!(
                    "board: pin {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen.insert(*pin) {
                errors.push(format!("board: pin {pin} is used more than once"));
            }
        }
    }

    pub fn utc_offset(&self) -> Result<UtcOffset> {
        UtcOffset::from_whole_seconds(self.utc_offset_minutes.saturating_mul(60))
            .with_context(|| format!("bad utc_offset_minutes {}", self.utc_offset_minutes))
    }

    /// `[settings]` flattened to the table's string form.
    pub fn seed_settings(&self) -> BTreeMap<String, String> {
        self.settings
            .iter()
            .map(|(k, v)| {
                let s = match v {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), s)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<HubConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: HubConfig =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Seed the `config` table from `[settings]` if the table is empty.
/// Returns whether anything was written.
pub async fn apply(config: &HubConfig, db: &Db) -> Result<bool> {
    let current = db.load_config().await.context("failed to read config table")?;
    if !current.is_empty() || config.settings.is_empty() {
        tracing::info!(keys = current.len(), "config table kept");
        return Ok(false);
    }

    let seed = config.seed_settings();
    db.replace_config(&seed)
        .await
        .context("failed to seed config table")?;
    tracing::info!(keys = seed.len(), "config table seeded");
    Ok(true)
}

// ===========================================================================
// Tests
// ===========================================================================
