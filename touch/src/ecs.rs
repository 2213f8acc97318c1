//! Environmental change system: slow re-centring of idle keys' references.
//!
//! Drift correction is paced by 10 ms credits from the [`crate::timebase`].
//! References move towards the last measurement through a first order
//! filter computed in 8.8 fixed point, with the fractional byte carried in
//! the channel's remainder so repeated small steps do not round away.

use log::trace;

use crate::config::EngineConfig;
use crate::key::{ChannelRecord, Key, KeyState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterStrength {
    Slow,
    Fast,
}

impl FilterStrength {
    fn coefficient(&self, config: &EngineConfig) -> u8 {
        match self {
            FilterStrength::Slow => config.ecs_slow,
            FilterStrength::Fast => config.ecs_fast,
        }
    }
}

/// Move a channel's reference towards its last measurement by `k`/256
pub fn filter(channel: &mut ChannelRecord, k: u8) {
    let current = ((channel.reference as i64) << 8) | channel.remainder as i64;
    let target = (channel.last as i64) << 8;
    let next = (current + (target - current) * k as i64 / 256).clamp(0, 0xff_ffff);
    channel.reference = (next >> 8) as u16;
    channel.remainder = (next & 0xff) as u8;
}

pub struct Ecs {
    time_step: u16,
    prescaler: u16,
    tempo: u16,
    strength: FilterStrength,
}

impl Ecs {
    pub const fn new(config: &EngineConfig) -> Self {
        Self {
            time_step: config.ecs_time_step,
            prescaler: config.ecs_tempo_prescaler,
            tempo: 0,
            strength: FilterStrength::Slow,
        }
    }

    /// Strength chosen on the last unit of credit
    pub fn strength(&self) -> FilterStrength {
        self.strength
    }

    /// Remaining hold-off after a detection, in tempo ticks
    pub fn hold_off(&self) -> u16 {
        self.tempo
    }

    /// Consume `credits` units of 10 ms, filtering idle references whenever
    /// both the time step and the hold-off have run out and no key is mid
    /// detection.
    ///
    /// Returns the number of filter steps applied.
    pub fn run(&mut self, keys: &mut [Key<'_>], credits: u16, config: &EngineConfig) -> u16 {
        let mut steps = 0;
        for _ in 0..credits {
            self.time_step = self.time_step.saturating_sub(1);
            self.prescaler = self.prescaler.saturating_sub(1);
            if self.prescaler == 0 {
                self.prescaler = config.ecs_tempo_prescaler;
                self.tempo = self.tempo.saturating_sub(1);
            }

            let quiet = self.select(keys, config);

            if quiet && self.time_step == 0 && self.tempo == 0 {
                let k = self.strength.coefficient(config);
                for key in keys.iter_mut().filter(|key| key.state == KeyState::Idle) {
                    let channels = key.config.kind.channels();
                    for channel in key.channels[..channels].iter_mut() {
                        filter(channel, k);
                    }
                }
                self.time_step = config.ecs_time_step;
                steps += 1;
            }
        }
        if steps > 0 {
            trace!("ecs: {} step(s), {:?}", steps, self.strength);
        }
        steps
    }

    /// Pick the filter strength: fast only when every idle key drifts the
    /// same way. Any key mid detection forces slow, restarts the hold-off and
    /// blocks filtering for this unit; returns false in that case.
    fn select(&mut self, keys: &[Key<'_>], config: &EngineConfig) -> bool {
        let mut sign = 0;
        let mut agree = true;
        for key in keys.iter() {
            if key.state.is_mid_detection() {
                self.tempo = config.ecs_hold_off;
                self.strength = FilterStrength::Slow;
                return false;
            }
            if key.state != KeyState::Idle {
                continue;
            }
            let s = key.delta().signum();
            if s == 0 {
                continue;
            }
            if sign == 0 {
                sign = s;
            } else if s != sign {
                agree = false;
            }
        }

        self.strength = if agree { FilterStrength::Fast } else { FilterStrength::Slow };
        true
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::config::KeyConfig;

    const CONFIG: EngineConfig = EngineConfig {
        ecs_fast: 64,
        ecs_slow: 8,
        ecs_time_step: 1,
        ecs_tempo_prescaler: 1,
        ecs_hold_off: 5,
        ..EngineConfig::default()
    };

    static KEY: KeyConfig = KeyConfig::key(0);

    fn idle_key(index: u8, reference: u16, last: u16) -> Key<'static> {
        let mut key = Key::new(index, &KEY);
        key.state = KeyState::Idle;
        key.channels[0].reference = reference;
        key.channels[0].last = last;
        key
    }

    #[test]
    fn test_filter_step() {
        let mut channel = ChannelRecord { reference: 100, last: 110, ..Default::default() };
        filter(&mut channel, 64);
        // 100 + 10 * 64 / 256 = 102.5
        assert_eq!(channel.reference, 102);
        assert_eq!(channel.remainder, 128);
    }

    #[test]
    fn test_filter_holds_a_settled_reference() {
        let mut channel = ChannelRecord { reference: 100, last: 100, ..Default::default() };
        for _ in 0..1000 {
            filter(&mut channel, 255);
        }
        assert_eq!(channel.reference, 100);
        assert_eq!(channel.remainder, 0);
    }

    #[test]
    fn test_remainder_carries_small_steps() {
        // Each step is 10 * 8 / 256 of a count, which rounds to nothing in whole counts
        let mut channel = ChannelRecord { reference: 100, last: 110, ..Default::default() };
        for _ in 0..2000 {
            filter(&mut channel, 8);
        }
        assert_eq!(channel.reference, 109);
        assert!(channel.remainder > 200);
    }

    #[test]
    fn test_converges_within_one_count() {
        for k in [1u8, 8, 64, 255] {
            for (start, last) in [(100u16, 140u16), (140, 100), (5000, 4000)] {
                let mut channel = ChannelRecord { reference: start, last, ..Default::default() };
                for _ in 0..10_000 {
                    filter(&mut channel, k);
                }
                let error = channel.reference as i32 - last as i32;
                assert!(
                    error.abs() <= 1,
                    "k={} start={} last={} ref={}",
                    k, start, last, channel.reference
                );
            }
        }
    }

    #[test]
    fn test_agreeing_drift_is_fast() {
        let mut keys = [idle_key(0, 100, 95), idle_key(1, 100, 97), idle_key(2, 100, 100)];
        let mut ecs = Ecs::new(&CONFIG);
        assert_eq!(ecs.run(&mut keys, 1, &CONFIG), 1);
        assert_eq!(ecs.strength(), FilterStrength::Fast);
    }

    #[test]
    fn test_disagreeing_drift_is_slow() {
        let mut keys = [idle_key(0, 100, 95), idle_key(1, 100, 105)];
        let mut ecs = Ecs::new(&CONFIG);
        ecs.run(&mut keys, 1, &CONFIG);
        assert_eq!(ecs.strength(), FilterStrength::Slow);
        // 100*256 - 5*256*8/256
        assert_eq!((keys[0].channels[0].reference, keys[0].channels[0].remainder), (99, 216));
    }

    #[test]
    fn test_detection_holds_off_filter() {
        let mut keys = [idle_key(0, 100, 95), idle_key(1, 100, 80)];
        keys[1].state = KeyState::Detected;
        let mut ecs = Ecs::new(&CONFIG);

        assert_eq!(ecs.run(&mut keys, 10, &CONFIG), 0);
        assert_eq!(ecs.hold_off(), CONFIG.ecs_hold_off);
        assert_eq!(keys[0].reference(), 100);
        assert_eq!(keys[1].reference(), 100);

        // Released: the hold-off has to run out before filtering resumes
        keys[1].state = KeyState::Idle;
        keys[1].channels[0].last = 100;
        assert_eq!(ecs.run(&mut keys, 4, &CONFIG), 0);
        assert_eq!(ecs.run(&mut keys, 1, &CONFIG), 1);
        assert!(keys[0].reference() < 100);
    }

    #[test]
    fn test_detection_blocks_filter_without_hold_off() {
        const NO_HOLD: EngineConfig = EngineConfig { ecs_hold_off: 0, ..CONFIG };
        let mut keys = [idle_key(0, 100, 80), idle_key(1, 100, 97)];
        keys[0].state = KeyState::Detected;
        let mut ecs = Ecs::new(&NO_HOLD);

        assert_eq!(ecs.run(&mut keys, 5, &NO_HOLD), 0);
        assert_eq!(keys[1].reference(), 100);
        assert_eq!(keys[1].channels[0].remainder, 0);

        keys[0].state = KeyState::Idle;
        keys[0].channels[0].last = 100;
        assert_eq!(ecs.run(&mut keys, 1, &NO_HOLD), 1);
        assert_eq!(keys[1].reference(), 99);
    }

    #[test]
    fn test_only_idle_keys_are_filtered() {
        let mut keys = [idle_key(0, 100, 90), idle_key(1, 100, 90), idle_key(2, 100, 90)];
        keys[1].state = KeyState::PreRecalibrate(3);
        keys[2].state = KeyState::Error;
        let mut ecs = Ecs::new(&CONFIG);
        ecs.run(&mut keys, 20, &CONFIG);
        assert_eq!(keys[0].reference(), 90);
        assert_eq!(keys[1].reference(), 100);
        assert_eq!(keys[2].reference(), 100);
    }

    #[test]
    fn test_time_step_paces_filter() {
        const PACED: EngineConfig = EngineConfig { ecs_time_step: 10, ..CONFIG };
        let mut keys = [idle_key(0, 100, 90)];
        let mut ecs = Ecs::new(&PACED);
        assert_eq!(ecs.run(&mut keys, 9, &PACED), 0);
        assert_eq!(ecs.run(&mut keys, 1, &PACED), 1);
        assert_eq!(ecs.run(&mut keys, 25, &PACED), 2);
    }
}
