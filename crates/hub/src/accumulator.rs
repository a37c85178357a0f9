//! Light-sensor accumulation over a cycle of `sensing_count` polls.
//!
//! The cycle index advances before the reset check, so the poll that wraps
//! the index back to 0 starts a fresh cycle and its own light count is the
//! first contribution to the new sum.

use serde::Serialize;

use crate::error::{CoreError, Result};
use crate::frame::{self, DecodedFrame};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LightCycleState {
    pub sum: u32,
    pub cycle_index: u32,
    /// Rendered frames accumulated in the current cycle, oldest first.
    pub log: Vec<String>,
}

#[derive(Debug, Default)]
pub struct LightAccumulator {
    state: LightCycleState,
}

impl LightAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LightCycleState {
        &self.state
    }

    /// Bring the cycle position inside a new `sensing_count`. The sum and
    /// log carry over; a zero count is left for `observe` to reject.
    pub fn rescale(&mut self, sensing_count: u32) {
        if sensing_count > 0 {
            self.state.cycle_index %= sensing_count;
        }
    }

    /// Fold one frame into the cycle and return the resulting state.
    pub fn accumulate(
        &mut self,
        frame: &[bool],
        participate_in_cycle: bool,
        sensing_count: u32,
    ) -> Result<LightCycleState> {
        self.observe(frame, participate_in_cycle, sensing_count)
            .map(|(_, state)| state)
    }

    /// Like [`accumulate`](Self::accumulate) but also hands back the decoded
    /// frame so callers can report the voltage class.
    ///
    /// Both checks run before any mutation: an invalid frame or a zero
    /// `sensing_count` leaves the state untouched.
    pub fn observe(
        &mut self,
        frame: &[bool],
        participate_in_cycle: bool,
        sensing_count: u32,
    ) -> Result<(DecodedFrame, LightCycleState)> {
        let decoded = frame::decode(frame)?;
        if sensing_count == 0 {
            return Err(CoreError::invalid_config("sensing_count must be positive"));
        }

        if participate_in_cycle {
            let st = &mut self.state;
            st.cycle_index = (st.cycle_index + 1) % sensing_count;
            if st.cycle_index == 0 {
                st.sum = 0;
                st.log.clear();
            }
            st.sum += decoded.light_count;
            st.log.push(decoded.rendered_log.clone());
        }

        Ok((decoded, self.state.clone()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Frame with the first `lit` light channels on and both relays off.
    fn lit(lit: usize) -> Vec<bool> {
        (0..8).map(|i| i < lit).collect()
    }

    #[test]
    fn starts_empty() {
        let acc = LightAccumulator::new();
        assert_eq!(acc.state(), &LightCycleState::default());
    }

    #[test]
    fn wrapping_frame_starts_new_cycle() {
        let mut acc = LightAccumulator::new();

        let s = acc.accumulate(&lit(2), true, 3).unwrap();
        assert_eq!((s.cycle_index, s.sum), (1, 2));

        let s = acc.accumulate(&lit(1), true, 3).unwrap();
        assert_eq!((s.cycle_index, s.sum), (2, 3));

        // Index wraps to 0: reset happens first, then this frame's 4 is added.
        let s = acc.accumulate(&lit(4), true, 3).unwrap();
        assert_eq!((s.cycle_index, s.sum), (0, 4));
        assert_eq!(s.log.len(), 1);

        let s = acc.accumulate(&lit(5), true, 3).unwrap();
        assert_eq!((s.cycle_index, s.sum), (1, 9));
        assert_eq!(s.log.len(), 2);
    }

    #[test]
    fn sensing_count_one_resets_every_poll() {
        let mut acc = LightAccumulator::new();
        for n in [3, 5, 0, 2] {
            let s = acc.accumulate(&lit(n), true, 1).unwrap();
            assert_eq!(s.cycle_index, 0);
            assert_eq!(s.sum, n as u32);
            assert_eq!(s.log.len(), 1);
        }
    }

    #[test]
    fn non_participating_frames_leave_state_alone() {
        let mut acc = LightAccumulator::new();
        acc.accumulate(&lit(3), true, 4).unwrap();
        let before = acc.state().clone();

        for bits in 0..=u8::MAX {
            let f: Vec<bool> = (0..8).map(|i| bits & (1 << i) != 0).collect();
            let s = acc.accumulate(&f, false, 4).unwrap();
            assert_eq!(s, before);
        }
        assert_eq!(acc.state(), &before);
    }

    #[test]
    fn observe_returns_decoded_frame_even_when_not_participating() {
        let mut acc = LightAccumulator::new();
        let f = [true, true, false, false, false, false, true, false];
        let (decoded, state) = acc.observe(&f, false, 2).unwrap();
        assert_eq!(decoded.light_count, 2);
        assert_eq!(decoded.voltage, crate::frame::VoltageClass::High);
        assert_eq!(state.sum, 0);
    }

    #[test]
    fn log_holds_rendered_frames_in_order() {
        let mut acc = LightAccumulator::new();
        acc.accumulate(&lit(1), true, 5).unwrap();
        let s = acc.accumulate(&lit(2), true, 5).unwrap();
        assert_eq!(s.log, vec!["○−−−−−−−".to_string(), "○○−−−−−−".to_string()]);
    }

    #[test]
    fn zero_sensing_count_is_config_error_without_mutation() {
        let mut acc = LightAccumulator::new();
        acc.accumulate(&lit(2), true, 3).unwrap();
        let before = acc.state().clone();

        let err = acc.accumulate(&lit(5), true, 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
        assert_eq!(acc.state(), &before);
    }

    #[test]
    fn invalid_frame_does_not_mutate() {
        let mut acc = LightAccumulator::new();
        acc.accumulate(&lit(2), true, 3).unwrap();
        let before = acc.state().clone();

        let err = acc.accumulate(&[true; 6], true, 3).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFrame { channels: 6 }));
        assert_eq!(acc.state(), &before);
    }

    #[test]
    fn shrinking_sensing_count_stays_in_range() {
        let mut acc = LightAccumulator::new();
        for _ in 0..4 {
            acc.accumulate(&lit(1), true, 10).unwrap();
        }
        assert_eq!(acc.state().cycle_index, 4);

        let s = acc.accumulate(&lit(1), true, 2).unwrap();
        assert!(s.cycle_index < 2);
    }
}
