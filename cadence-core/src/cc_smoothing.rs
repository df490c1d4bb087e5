//! Control-change input smoothing: relative encoders and soft takeover.
//!
//! State is kept per (rule, channel, controller). Values the engine itself
//! sends re-sync every state on the same (channel, controller), so a knob in
//! takeover mode has to come back to the new position before it controls the
//! parameter again.

use std::collections::HashMap;

use crate::rules::CcInputMode;

const RELATIVE_CENTER: i64 = 64;
/// A threshold of 0 still follows a knob moving one value at a time.
const MIN_TOLERANCE: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smoothed {
    pub value: i64,
    pub delta: i64,
}

#[derive(Debug, Clone)]
struct ControlState {
    remembered: i64,
    prev_physical: Option<i64>,
    engaged: bool,
    threshold: i64,
}

#[derive(Debug, Default)]
pub struct CcSmoother {
    states: HashMap<(String, u8, u8), ControlState>,
    sent: HashMap<(u8, u8), u8>,
}

impl CcSmoother {
    /// Returns the value the rule should see, or `None` while a takeover
    /// control is disengaged.
    pub fn process(
        &mut self,
        rule_id: &str,
        mode: CcInputMode,
        threshold: i64,
        channel: u8,
        control: u8,
        raw: u8,
    ) -> Option<Smoothed> {
        let raw = i64::from(raw);
        if mode == CcInputMode::Abs {
            return Some(Smoothed { value: raw, delta: 0 });
        }
        let state = self
            .states
            .entry((rule_id.to_string(), channel, control))
            .or_insert_with(|| ControlState {
                remembered: RELATIVE_CENTER,
                prev_physical: None,
                engaged: true,
                threshold,
            });
        state.threshold = threshold;

        match mode {
            CcInputMode::RelativeSigned | CcInputMode::RelativeTwosComplement => {
                let delta = if mode == CcInputMode::RelativeSigned {
                    raw - RELATIVE_CENTER
                } else if raw < 64 {
                    raw
                } else {
                    raw - 128
                };
                state.remembered = (state.remembered + delta).clamp(0, 127);
                Some(Smoothed {
                    value: state.remembered,
                    delta,
                })
            }
            _ => {
                let Some(prev) = state.prev_physical.replace(raw) else {
                    state.remembered = raw;
                    state.engaged = true;
                    return Some(Smoothed { value: raw, delta: 0 });
                };
                let rem = state.remembered;
                let tolerance = threshold.max(MIN_TOLERANCE);
                let within = (raw - rem).abs() <= tolerance;
                if state.engaged {
                    if !within {
                        log::debug!(target: "filter", "[{}] cc {} released at {} (holding {})", rule_id, control, raw, rem);
                        state.engaged = false;
                        return None;
                    }
                } else {
                    let crossing = (prev <= rem && rem <= raw) || (prev >= rem && rem >= raw);
                    let reengage = crossing || (mode == CcInputMode::AbsRelative && within);
                    if !reengage {
                        return None;
                    }
                    log::debug!(target: "filter", "[{}] cc {} picked up at {}", rule_id, control, raw);
                    state.engaged = true;
                }
                state.remembered = raw;
                Some(Smoothed {
                    value: raw,
                    delta: raw - prev,
                })
            }
        }
    }

    /// Records a control change the engine sent out.
    pub fn record_sent(&mut self, channel: u8, control: u8, value: u8) {
        self.sent.insert((channel, control), value);
        let value = i64::from(value);
        for ((_, ch, cc), state) in self.states.iter_mut() {
            if *ch != channel || *cc != control {
                continue;
            }
            state.remembered = value;
            state.engaged = state
                .prev_physical
                .map_or(true, |p| (p - value).abs() <= state.threshold.max(MIN_TOLERANCE));
        }
    }

    pub fn last_sent(&self, channel: u8, control: u8) -> Option<u8> {
        self.sent.get(&(channel, control)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(s: &mut CcSmoother, mode: CcInputMode, threshold: i64, raw: u8) -> Option<i64> {
        s.process("r", mode, threshold, 0, 7, raw).map(|v| v.value)
    }

    #[test]
    fn test_relative_signed() {
        let mut s = CcSmoother::default();
        assert_eq!(feed(&mut s, CcInputMode::RelativeSigned, 0, 65), Some(65));
        assert_eq!(feed(&mut s, CcInputMode::RelativeSigned, 0, 63), Some(64));
        assert_eq!(feed(&mut s, CcInputMode::RelativeSigned, 0, 127), Some(127));
    }

    #[test]
    fn test_relative_twos_complement() {
        let mut s = CcSmoother::default();
        assert_eq!(feed(&mut s, CcInputMode::RelativeTwosComplement, 0, 1), Some(65));
        assert_eq!(feed(&mut s, CcInputMode::RelativeTwosComplement, 0, 127), Some(64));
        let delta = s
            .process("r", CcInputMode::RelativeTwosComplement, 0, 0, 7, 126)
            .map(|v| v.delta);
        assert_eq!(delta, Some(-2));
    }

    #[test]
    fn test_catchup_waits_for_crossing() {
        let mut s = CcSmoother::default();
        assert_eq!(feed(&mut s, CcInputMode::AbsCatchup, 0, 20), Some(20));
        assert_eq!(feed(&mut s, CcInputMode::AbsCatchup, 0, 21), Some(21));
        s.record_sent(0, 7, 100);
        assert_eq!(feed(&mut s, CcInputMode::AbsCatchup, 0, 30), None);
        assert_eq!(feed(&mut s, CcInputMode::AbsCatchup, 0, 99), None);
        assert_eq!(feed(&mut s, CcInputMode::AbsCatchup, 0, 101), Some(101));
        assert_eq!(s.last_sent(0, 7), Some(100));

        // A jump away from the picked-up value releases the knob again.
        assert_eq!(feed(&mut s, CcInputMode::AbsCatchup, 0, 90), None);
        assert_eq!(feed(&mut s, CcInputMode::AbsCatchup, 0, 100), None);
        assert_eq!(feed(&mut s, CcInputMode::AbsCatchup, 0, 102), Some(102));
    }

    #[test]
    fn test_engaged_jump_beyond_threshold_is_held() {
        let mut c = CcSmoother::default();
        assert_eq!(feed(&mut c, CcInputMode::AbsCatchup, 3, 20), Some(20));
        assert_eq!(feed(&mut c, CcInputMode::AbsCatchup, 3, 100), None);
        assert_eq!(feed(&mut c, CcInputMode::AbsCatchup, 3, 98), None);
        assert_eq!(feed(&mut c, CcInputMode::AbsCatchup, 3, 22), None);
        assert_eq!(feed(&mut c, CcInputMode::AbsCatchup, 3, 19), Some(19));

        let mut r = CcSmoother::default();
        assert_eq!(feed(&mut r, CcInputMode::AbsRelative, 3, 20), Some(20));
        assert_eq!(feed(&mut r, CcInputMode::AbsRelative, 3, 100), None);
        assert_eq!(feed(&mut r, CcInputMode::AbsRelative, 3, 98), None);
        assert_eq!(feed(&mut r, CcInputMode::AbsRelative, 3, 22), Some(22));
    }

    #[test]
    fn test_engaged_knob_follows_small_moves() {
        let mut s = CcSmoother::default();
        feed(&mut s, CcInputMode::AbsCatchup, 0, 40);
        let moved: Vec<_> = (41..=45).map(|raw| feed(&mut s, CcInputMode::AbsCatchup, 0, raw)).collect();
        assert_eq!(moved, vec![Some(41), Some(42), Some(43), Some(44), Some(45)]);
    }

    #[test]
    fn test_abs_relative_reengages_by_proximity() {
        let mut s = CcSmoother::default();
        feed(&mut s, CcInputMode::AbsRelative, 3, 20);
        s.record_sent(0, 7, 100);
        assert_eq!(feed(&mut s, CcInputMode::AbsRelative, 3, 50), None);
        assert_eq!(feed(&mut s, CcInputMode::AbsRelative, 3, 97), Some(97));

        let mut c = CcSmoother::default();
        feed(&mut c, CcInputMode::AbsCatchup, 3, 20);
        c.record_sent(0, 7, 100);
        assert_eq!(feed(&mut c, CcInputMode::AbsCatchup, 3, 50), None);
        assert_eq!(feed(&mut c, CcInputMode::AbsCatchup, 3, 97), None);
    }

    #[test]
    fn test_sent_value_near_knob_stays_engaged() {
        let mut s = CcSmoother::default();
        feed(&mut s, CcInputMode::AbsCatchup, 2, 60);
        s.record_sent(0, 7, 61);
        assert_eq!(feed(&mut s, CcInputMode::AbsCatchup, 2, 62), Some(62));
    }

    #[test]
    fn test_abs_passes_through() {
        let mut s = CcSmoother::default();
        assert_eq!(feed(&mut s, CcInputMode::Abs, 0, 12), Some(12));
    }
}
