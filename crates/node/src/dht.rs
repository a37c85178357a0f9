//! DHT11 temperature/humidity sensor on a single GPIO line.
//!
//! The sensor answers a host start pulse with 40 bits, each encoded as the
//! length of a high pulse (~27 µs for 0, ~70 µs for 1). Bit-banged reads
//! from user space miss edges now and then, so callers retry.

#![cfg_attr(not(feature = "dht"), allow(dead_code))]

use anyhow::{bail, ensure, Result};

/// Attempts before giving up on a sample.
pub const READ_ATTEMPTS: usize = 10;

/// High pulses longer than this are 1 bits.
const ONE_THRESHOLD_US: u128 = 45;

/// Decode the five payload bytes into `(temperature °C, humidity %)`,
/// each rounded to one decimal.
pub fn decode(bytes: [u8; 5]) -> Result<(f64, f64)> {
    let sum = bytes[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    ensure!(
        sum == bytes[4],
        "dht11 checksum mismatch: computed {sum:#04x}, got {:#04x}",
        bytes[4]
    );

    let humidity = bytes[0] as f64 + bytes[1] as f64 / 10.0;
    let magnitude = bytes[2] as f64 + (bytes[3] & 0x7f) as f64 / 10.0;
    let temperature = if bytes[3] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };
    if humidity > 100.0 {
        bail!("dht11 humidity {humidity} out of range");
    }

    Ok((
        (temperature * 10.0).round() / 10.0,
        (humidity * 10.0).round() / 10.0,
    ))
}

/// Pack 40 pulse widths into bytes, MSB first.
pub fn pack_pulses(high_us: &[u128]) -> Result<[u8; 5]> {
    ensure!(high_us.len() == 40, "expected 40 bits, got {}", high_us.len());
    let mut out = [0u8; 5];
    for (i, &w) in high_us.iter().enumerate() {
        if w > ONE_THRESHOLD_US {
            out[i / 8] |= 0x80 >> (i % 8);
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Hardware driver
// ---------------------------------------------------------------------------

#[cfg(feature = "dht")]
pub use driver::Dht11;

#[cfg(feature = "dht")]
mod driver {
    use super::*;
    use rppal::gpio::{Gpio, IoPin, Level, Mode};
    use std::time::{Duration, Instant};

    const EDGE_TIMEOUT: Duration = Duration::from_micros(200);

    pub struct Dht11 {
        pin: IoPin,
    }

    impl Dht11 {
        pub fn new(bcm_pin: u8) -> Result<Self> {
            let pin = Gpio::new()?.get(bcm_pin)?.into_io(Mode::Output);
            tracing::info!(pin = bcm_pin, "dht11 initialised");
            Ok(Self { pin })
        }

        /// Read with up to [`READ_ATTEMPTS`] tries.
        pub fn read(&mut self) -> Result<(f64, f64)> {
            let mut last = None;
            for attempt in 1..=READ_ATTEMPTS {
                match self.read_once() {
                    Ok(v) => return Ok(v),
                    Err(e) => {
                        tracing::debug!(attempt, error = %e, "dht11 read failed");
                        last = Some(e);
                        // The sensor needs ~1 s between conversions.
                        std::thread::sleep(Duration::from_millis(1100));
                    }
                }
            }
            Err(last.unwrap_or_else(|| anyhow::anyhow!("dht11 read failed")))
        }

        fn read_once(&mut self) -> Result<(f64, f64)> {
            // Start signal: hold low for 18 ms, then release.
            self.pin.set_mode(Mode::Output);
            self.pin.set_low();
            std::thread::sleep(Duration::from_millis(18));
            self.pin.set_high();
            self.pin.set_mode(Mode::Input);

            // Sensor response: low 80 µs, high 80 µs.
            self.wait_for(Level::Low)?;
            self.wait_for(Level::High)?;
            self.wait_for(Level::Low)?;

            let mut widths = Vec::with_capacity(40);
            for _ in 0..40 {
                self.wait_for(Level::High)?;
                let rise = Instant::now();
                self.wait_for(Level::Low)?;
                widths.push(rise.elapsed().as_micros());
            }
            decode(pack_pulses(&widths)?)
        }

        fn wait_for(&self, level: Level) -> Result<()> {
            let start = Instant::now();
            while self.pin.read() != level {
                if start.elapsed() > EDGE_TIMEOUT {
                    bail!("dht11 timed out waiting for {level:?}");
                }
            }
            Ok(())
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(b: [u8; 4]) -> [u8; 5] {
        let sum = b.iter().fold(0u8, |a, x| a.wrapping_add(*x));
        [b[0], b[1], b[2], b[3], sum]
    }

    #[test]
    fn decode_integral_values() {
        assert_eq!(decode(with_checksum([55, 0, 24, 0])).unwrap(), (24.0, 55.0));
    }

    #[test]
    fn decode_tenths() {
        assert_eq!(decode(with_checksum([60, 3, 21, 7])).unwrap(), (21.7, 60.3));
    }

    #[test]
    fn decode_negative_temperature() {
        assert_eq!(decode(with_checksum([40, 0, 2, 0x85])).unwrap(), (-2.5, 40.0));
    }

    #[test]
    fn checksum_mismatch_rejected() {
        let mut b = with_checksum([55, 0, 24, 0]);
        b[4] ^= 1;
        assert!(decode(b).is_err());
    }

    #[test]
    fn impossible_humidity_rejected() {
        assert!(decode(with_checksum([120, 0, 20, 0])).is_err());
    }

    #[test]
    fn pulses_pack_msb_first() {
        let mut widths = vec![26u128; 40];
        widths[0] = 70; // byte 0 bit 7
        widths[15] = 70; // byte 1 bit 0
        let bytes = pack_pulses(&widths).unwrap();
        assert_eq!(bytes, [0x80, 0x01, 0, 0, 0]);
    }

    #[test]
    fn short_pulse_train_rejected() {
        assert!(pack_pulses(&[70; 39]).is_err());
    }
}
