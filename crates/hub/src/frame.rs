//! Positional decoding of one IO-board poll: five light sensors followed by
//! three voltage relays (low, high, reserved).

use serde::Serialize;

use crate::error::{CoreError, Result};

pub const FRAME_CHANNELS: usize = 8;
pub const LIGHT_CHANNELS: usize = 5;

const RELAY_LOW: usize = LIGHT_CHANNELS;
const RELAY_HIGH: usize = LIGHT_CHANNELS + 1;

const GLYPH_ON: char = '○';
const GLYPH_OFF: char = '−';

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoltageClass {
    High,
    Low,
    Undefined,
}

impl VoltageClass {
    /// Signal colour shown on the battery indicator.
    pub fn label(self) -> &'static str {
        match self {
            Self::High => "blue",
            Self::Low => "green",
            Self::Undefined => "yellow",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedFrame {
    pub light_count: u32,
    pub voltage: VoltageClass,
    pub rendered_log: String,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

pub fn decode(frame: &[bool]) -> Result<DecodedFrame> {
    if frame.len() != FRAME_CHANNELS {
        return Err(CoreError::InvalidFrame {
            channels: frame.len(),
        });
    }

    let light_count = frame[..LIGHT_CHANNELS].iter().filter(|&&on| on).count() as u32;

    // High relay wins when both are set.
    let voltage = if frame[RELAY_HIGH] {
        VoltageClass::High
    } else if frame[RELAY_LOW] {
        VoltageClass::Low
    } else {
        VoltageClass::Undefined
    };

    let rendered_log = frame
        .iter()
        .map(|&on| if on { GLYPH_ON } else { GLYPH_OFF })
        .collect();

    Ok(DecodedFrame {
        light_count,
        voltage,
        rendered_log,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
