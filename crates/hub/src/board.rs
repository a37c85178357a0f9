//! IO board access: eight digital inputs (light sensors and voltage relays)
//! and four grow-light output relays. The `gpio` feature gates the real
//! rppal driver; without it, a mock board keeps state in memory and logs.

use anyhow::Result;
use tracing::{debug, info};

use crate::frame::FRAME_CHANNELS;
use crate::settings::OUTPUT_RELAYS;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, InputPin, OutputPin};

/// Anything that can produce one raw 8-channel sample.
pub trait SensorSource: Send {
    fn read_frame(&mut self) -> Result<Vec<bool>>;
}

// ---------------------------------------------------------------------------
// Real GPIO board (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct IoBoard {
    inputs: Vec<InputPin>,
    outputs: Vec<OutputPin>,
    enabled: [bool; OUTPUT_RELAYS],
    active_low: bool, // applies to both directions
}

#[cfg(feature = "gpio")]
impl IoBoard {
    pub fn new(input_pins: &[u8], output_pins: &[u8], active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let inputs = input_pins
            .iter()
            .map(|&p| Ok(gpio.get(p)?.into_input_pullup()))
            .collect::<Result<Vec<_>>>()?;

        let mut outputs = Vec::with_capacity(output_pins.len());
        for &p in output_pins {
            let mut pin = gpio.get(p)?.into_output();
            // Lights off at startup.
            if active_low {
                pin.set_high();
            } else {
                pin.set_low();
            }
            outputs.push(pin);
        }

        info!(inputs = inputs.len(), outputs = outputs.len(), active_low, "io board ready");
        Ok(Self {
            inputs,
            outputs,
            enabled: [false; OUTPUT_RELAYS],
            active_low,
        })
    }

    pub fn define_output_relays(&mut self, enabled: [bool; OUTPUT_RELAYS]) {
        self.enabled = enabled;
        debug!(?enabled, "output relays defined");
    }

    /// Drive every enabled relay to `on`; disabled relays are held off.
    pub fn set_output(&mut self, on: bool) {
        for (pin, &enabled) in self.outputs.iter_mut().zip(&self.enabled) {
            let level = (on && enabled) != self.active_low;
            if level {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
        info!(on, "grow lights switched");
    }
}

#[cfg(feature = "gpio")]
impl SensorSource for IoBoard {
    fn read_frame(&mut self) -> Result<Vec<bool>> {
        Ok(self
            .inputs
            .iter()
            .map(|p| p.is_high() != self.active_low)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Mock board (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct IoBoard {
    pub(super) inputs: Vec<bool>,
    pub(super) outputs: [bool; OUTPUT_RELAYS],
    enabled: [bool; OUTPUT_RELAYS],
}

#[cfg(not(feature = "gpio"))]
impl IoBoard {
    pub fn new(input_pins: &[u8], output_pins: &[u8], _active_low: bool) -> Result<Self> {
        info!(
            ?input_pins,
            ?output_pins,
            "mock io board initialised (no hardware)"
        );
        Ok(Self {
            inputs: vec![false; FRAME_CHANNELS],
            outputs: [false; OUTPUT_RELAYS],
            enabled: [false; OUTPUT_RELAYS],
        })
    }

    pub fn define_output_relays(&mut self, enabled: [bool; OUTPUT_RELAYS]) {
        self.enabled = enabled;
        debug!(?enabled, "[mock] output relays defined");
    }

    pub fn set_output(&mut self, on: bool) {
        for (out, &enabled) in self.outputs.iter_mut().zip(&self.enabled) {
            *out = on && enabled;
        }
        info!(on, outputs = ?self.outputs, "[mock] grow lights switched");
    }

    /// Inputs the next `read_frame` will report.
    pub fn set_inputs(&mut self, inputs: Vec<bool>) {
        self.inputs = inputs;
    }
}

#[cfg(not(feature = "gpio"))]
impl SensorSource for IoBoard {
    fn read_frame(&mut self) -> Result<Vec<bool>> {
        Ok(self.inputs.clone())
    }
}

// ---------------------------------------------------------------------------
// Simulated frames
// ---------------------------------------------------------------------------

/// Uniformly random channels, for running without the board attached.
pub struct SimulatedFrames {
    rng: fastrand::Rng,
}

impl SimulatedFrames {
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }
}

impl Default for SimulatedFrames {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SimulatedFrames {
    fn read_frame(&mut self) -> Result<Vec<bool>> {
        Ok((0..FRAME_CHANNELS).map(|_| self.rng.bool()).collect())
    }
}

// ---------------------------------------------------------------------------
// Board facade
// ---------------------------------------------------------------------------

/// The hardware board plus a simulator; `simulated` picks one per call.
pub struct Board {
    pub io: IoBoard,
    pub sim: SimulatedFrames,
}

impl Board {
    pub fn new(io: IoBoard, sim: SimulatedFrames) -> Self {
        Self { io, sim }
    }

    pub fn read_frame(&mut self, simulated: bool) -> Result<Vec<bool>> {
        if simulated {
            self.sim.read_frame()
        } else {
            self.io.read_frame()
        }
    }

    /// Switch the grow lights. Simulated mode never touches the relays.
    pub fn set_output(&mut self, on: bool, simulated: bool) {
        if simulated {
            debug!(on, "grow light request ignored in simulated mode");
            return;
        }
        self.io.set_output(on);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
