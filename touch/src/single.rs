//! Debounce and calibration state machine for a single key.
//!
//! Sliders and wheels run the same machine on their summed delta, see
//! [`crate::multi`].

use log::{debug, trace};

use crate::config::{AcquisitionRange, KeyConfig};
use crate::dxs::{self, Exclusion};
use crate::key::{Event, Key, KeyState, Setting};

/// Batch-wide inputs to one state machine pass
#[derive(Clone, Copy, Debug)]
pub(crate) struct Pass {
    /// A 1 s edge was seen since the previous pass
    pub one_second: bool,
    pub negative_recalibration: bool,
}

impl Pass {
    /// Whether `delta` counts as evidence of a touch.
    ///
    /// Without negative recalibration a delta past the recalibrate threshold
    /// also counts, so a key reacts to either polarity.
    fn touch_candidate(&self, config: &KeyConfig, delta: i16) -> bool {
        delta >= config.detect_threshold as i16
            || (!self.negative_recalibration && delta <= config.recalibrate_threshold as i16)
    }

    fn recalibrate_candidate(&self, config: &KeyConfig, delta: i16) -> bool {
        self.negative_recalibration && delta <= config.recalibrate_threshold as i16
    }
}

/// Whether a measurement out of the acquisition range is checked in `state`
fn range_checked(state: KeyState) -> bool {
    matches!(state, KeyState::Idle | KeyState::Detected | KeyState::Calibrating(_))
}

/// Record a fresh set of raw counts on the key
pub(crate) fn load(key: &mut Key<'_>, counts: &[u16], range: &AcquisitionRange) {
    let channels = key.config.kind.channels();
    key.out_of_range = false;
    for (channel, group) in key.channels[..channels].iter_mut().zip(key.config.groups) {
        let count = counts.get(group as usize).copied().unwrap_or(0);
        channel.last = count;
        if !range.contains(count) {
            key.out_of_range = true;
        }
    }
}

/// Run one pass of the state machine for `keys[index]`
pub(crate) fn step(keys: &mut [Key<'_>], index: usize, pass: &Pass) -> Event {
    let key = &mut keys[index];
    if !key.config.implemented {
        return Event::None;
    }

    if !key.enabled {
        key.restart = false;
        if key.state != KeyState::Disabled {
            key.disable();
        }
        return Event::None;
    }

    if key.state == KeyState::Disabled || key.restart {
        key.restart = false;
        key.start_calibration();
        return Event::Recalibrating;
    }

    if key.out_of_range && range_checked(key.state) {
        key.fail();
        return Event::Failed;
    }

    let state = key.state;
    match state {
        KeyState::Disabled | KeyState::Error => Event::None,
        KeyState::Calibrating(remaining) => calibrate(key, remaining),
        KeyState::Idle => idle(keys, index, pass),
        KeyState::PreDetect(integrator) => pre_detect(keys, index, integrator, pass),
        KeyState::Detected => detected(key, pass),
        KeyState::PostDetect(integrator) => post_detect(key, integrator),
        KeyState::PreRecalibrate(integrator) => pre_recalibrate(key, integrator, pass),
    }
}

fn calibrate(key: &mut Key<'_>, remaining: u16) -> Event {
    let channels = key.config.kind.channels();
    for channel in key.channels[..channels].iter_mut() {
        channel.accumulator += channel.last as u32;
    }

    let remaining = remaining.saturating_sub(1);
    if remaining > 0 {
        key.state = KeyState::Calibrating(remaining);
        return Event::None;
    }

    let shift = key.config.calibration_samples.trailing_zeros();
    for channel in key.channels[..channels].iter_mut() {
        channel.reference = (channel.accumulator >> shift) as u16;
        channel.remainder = 0;
        channel.accumulator = 0;
    }
    key.settle();
    debug!("key {}: calibrated, reference {}", key.index, key.channels[0].reference);
    Event::Calibrated
}

fn idle(keys: &mut [Key<'_>], index: usize, pass: &Pass) -> Event {
    let key = &mut keys[index];
    let config = key.config;
    let delta = key.delta();

    if pass.recalibrate_candidate(config, delta) {
        trace!("key {}: recalibration candidate, delta {}", index, delta);
        key.state = KeyState::PreRecalibrate(config.recalibrate_integrator);
        if config.recalibrate_integrator == 0 {
            return pre_recalibrate(key, 0, pass);
        }
    } else if pass.touch_candidate(config, delta) {
        trace!("key {}: touch candidate, delta {}", index, delta);
        key.state = KeyState::PreDetect(config.detect_integrator);
        // The poll that raised the candidate is its first confirmation
        return pre_detect(keys, index, config.detect_integrator, pass);
    }
    Event::None
}

fn pre_detect(keys: &mut [Key<'_>], index: usize, integrator: u8, pass: &Pass) -> Event {
    let key = &mut keys[index];
    if !pass.touch_candidate(key.config, key.delta()) {
        key.settle();
        key.setting.insert(Setting::NOISE);
        trace!("key {}: touch candidate dropped", index);
        return Event::None;
    }

    if !key.locked() {
        if let Exclusion::Vetoed { .. } = dxs::arbitrate(keys, index) {
            keys[index].state = KeyState::PreDetect(integrator.saturating_add(1));
            return Event::None;
        }
    }

    let key = &mut keys[index];
    let integrator = integrator.saturating_sub(1);
    if integrator == 0 {
        key.promote();
        Event::Pressed
    } else {
        key.state = KeyState::PreDetect(integrator);
        Event::None
    }
}

fn detected(key: &mut Key<'_>, pass: &Pass) -> Event {
    let config = key.config;

    if pass.one_second && config.detect_timeout > 0 {
        key.timeout = key.timeout.saturating_sub(1);
        if key.timeout == 0 {
            debug!("key {}: detection timed out", key.index);
            key.start_calibration();
            return Event::Recalibrating;
        }
    }

    if key.delta() < config.end_detect_threshold as i16 {
        key.state = KeyState::PostDetect(config.end_detect_integrator);
        if config.end_detect_integrator == 0 {
            return post_detect(key, 0);
        }
    }
    Event::None
}

fn post_detect(key: &mut Key<'_>, integrator: u8) -> Event {
    if key.delta() >= key.config.end_detect_threshold as i16 {
        key.state = KeyState::Detected;
        return Event::None;
    }

    let integrator = integrator.saturating_sub(1);
    if integrator == 0 {
        key.release();
        Event::Released
    } else {
        key.state = KeyState::PostDetect(integrator);
        Event::None
    }
}

fn pre_recalibrate(key: &mut Key<'_>, integrator: u8, pass: &Pass) -> Event {
    if !pass.recalibrate_candidate(key.config, key.delta()) {
        key.settle();
        key.setting.insert(Setting::NOISE);
        return Event::None;
    }

    let integrator = integrator.saturating_sub(1);
    if integrator == 0 {
        key.start_calibration();
        Event::Recalibrating
    } else {
        key.state = KeyState::PreRecalibrate(integrator);
        Event::None
    }
}
