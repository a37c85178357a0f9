use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::accumulator::{LightAccumulator, LightCycleState};
use crate::frame::VoltageClass;
use crate::settings::Settings;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Everything the hub keeps in memory. The light accumulator and the
/// settings share one lock so a poll always sees a consistent
/// `sensing_count`.
pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub accumulator: LightAccumulator,
    pub settings: Settings,
    pub last_frame: Option<FrameSnapshot>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct FrameSnapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub log: String,
    pub light_count: u32,
    pub voltage: VoltageClass,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Frame,
    Climate,
    Lighting,
    Config,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub light_cycle: LightCycleState,
    pub sensing_count: u32,
    pub simulated_board: bool,
    pub last_frame: Option<FrameSnapshot>,
    /// Most recent summarised day, `YYYY/MM/DD`. Filled in by the handler.
    pub latest_summary: Option<String>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(settings: Settings) -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            accumulator: LightAccumulator::new(),
            settings,
            last_frame: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn record_frame(&mut self, snapshot: FrameSnapshot, accumulated: bool) {
        let detail = format!(
            "{} light={} volt={}{}",
            snapshot.log,
            snapshot.light_count,
            snapshot.voltage.label(),
            if accumulated { "" } else { " (not counted)" }
        );
        self.last_frame = Some(snapshot);
        self.push_event(EventKind::Frame, detail);
    }

    pub fn record_climate(&mut self, source: &str, temperature: f64, humidity: f64) {
        self.push_event(
            EventKind::Climate,
            format!("{source}: {temperature:.1}C {humidity:.1}%"),
        );
    }

    pub fn record_lighting(&mut self, minutes: i64) {
        self.push_event(EventKind::Lighting, format!("{minutes} min of lighting logged"));
    }

    /// Swap in new settings. The light cycle carries on with the new count,
    /// its position wrapped into the new range.
    pub fn replace_settings(&mut self, settings: Settings) {
        let detail = format!(
            "settings replaced (sensing_count={}, simulated_board={})",
            settings.sensing_count, settings.contec_try
        );
        self.accumulator.rescale(settings.sensing_count);
        self.settings = settings;
        self.push_event(EventKind::Config, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            light_cycle: self.accumulator.state().clone(),
            sensing_count: self.settings.sensing_count,
            simulated_board: self.settings.contec_try,
            last_frame: self.last_frame.clone(),
            latest_summary: None,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn settings() -> Settings {
        let map: BTreeMap<String, String> = [
            ("sensing_count", "4"),
            ("sunlight_from", "2024/01/01"),
            ("temperature_from", "2024/01/01"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Settings::from_map(&map).unwrap()
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let mut st = SystemState::new(settings());
        for i in 0..(MAX_EVENTS + 25) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "event 25");
    }

    #[test]
    fn status_lists_newest_event_first() {
        let mut st = SystemState::new(settings());
        st.record_lighting(30);
        st.record_error("boom".into());
        let status = st.to_status();
        assert_eq!(status.events[0].kind, EventKind::Error);
        assert_eq!(status.events[1].kind, EventKind::Lighting);
        assert_eq!(status.sensing_count, 4);
    }

    #[test]
    fn replacing_settings_keeps_the_cycle() {
        let mut st = SystemState::new(settings());
        st.accumulator
            .accumulate(&[true, true, false, false, false, false, false, false], true, 4)
            .unwrap();
        let mut next = settings();
        next.sensing_count = 9;
        st.replace_settings(next);

        let status = st.to_status();
        assert_eq!(status.sensing_count, 9);
        assert_eq!(status.light_cycle.sum, 2);
        assert_eq!(status.events[0].kind, EventKind::Config);
    }

    #[test]
    fn shrinking_sensing_count_wraps_cycle_position() {
        let frame = [true, false, false, false, false, false, false, false];
        let mut st = SystemState::new(settings());
        for _ in 0..3 {
            st.accumulator.accumulate(&frame, true, 4).unwrap();
        }
        assert_eq!(st.accumulator.state().cycle_index, 3);

        let mut next = settings();
        next.sensing_count = 2;
        st.replace_settings(next);

        let status = st.to_status();
        assert!(status.light_cycle.cycle_index < status.sensing_count);
        assert_eq!(status.light_cycle.cycle_index, 1);
        assert_eq!(status.light_cycle.sum, 3);

        // The next counted frame completes the shortened cycle.
        let s = st.accumulator.accumulate(&frame, true, 2).unwrap();
        assert_eq!((s.cycle_index, s.sum), (0, 1));
    }
}
