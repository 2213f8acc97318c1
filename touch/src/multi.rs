use log::trace;

use crate::config::{KeyKind, MAX_CHANNELS};
use crate::key::{Event, Key, KeyState, Rotor, Setting};
use crate::single::{self, Pass};

/// Unscaled positions span 0..UNSCALED_RANGE
pub const UNSCALED_RANGE: u16 = 256;

/// Compute the unscaled position of a touch on a three-channel slider or wheel.
///
/// The weakest channel is taken as common-mode signal and removed. The
/// strongest remaining channel and its stronger neighbour then locate the
/// touch by the ratio of their signals.
///
/// On a slider channel 0 sits at position 0, channel 1 at 128 and channel 2
/// at 255. On a wheel the channels sit a third of a turn apart, starting with
/// channel 0 at position 0, and positions wrap.
pub fn unscaled_position(kind: KeyKind, deltas: &[i16; MAX_CHANNELS]) -> u8 {
    let mut signal = [0i32; MAX_CHANNELS];
    for (s, d) in signal.iter_mut().zip(deltas) {
        // Negative delta is noise, not touch
        *s = (*d).max(0) as i32;
    }
    let floor = signal.iter().copied().min().unwrap_or(0);
    for s in signal.iter_mut() {
        *s -= floor;
    }

    let mut top = 0;
    for i in 1..MAX_CHANNELS {
        if signal[i] > signal[top] {
            top = i;
        }
    }

    let range = UNSCALED_RANGE as i32;
    match kind {
        KeyKind::Wheel => {
            let next = (top + 1) % MAX_CHANNELS;
            let prev = (top + MAX_CHANNELS - 1) % MAX_CHANNELS;
            let (low, high) = if signal[next] >= signal[prev] { (top, next) } else { (prev, top) };
            let sum = signal[low] + signal[high];
            if sum == 0 {
                return ((top as i32 * range) / MAX_CHANNELS as i32) as u8;
            }
            let pos = (low as i32 * range + range * signal[high] / sum) / MAX_CHANNELS as i32;
            (pos % range) as u8
        }
        KeyKind::Slider | KeyKind::Key => {
            let low = match top {
                0 => 0,
                1 if signal[0] > signal[2] => 0,
                1 => 1,
                _ => 1,
            };
            let sum = signal[low] + signal[low + 1];
            let segment = range / 2;
            if sum == 0 {
                return segment as u8;
            }
            let pos = low as i32 * segment + segment * signal[low + 1] / sum;
            pos.min(range - 1) as u8
        }
    }
}

/// Rescale an unscaled position to 0..resolution
pub fn scale(unscaled: u8, resolution: u16) -> u16 {
    ((unscaled as u32 * resolution as u32) / UNSCALED_RANGE as u32) as u16
}

/// Signed movement from `from` to `to`, taking the short way round on a wheel
fn movement(kind: KeyKind, from: u8, to: u8) -> i16 {
    match kind {
        KeyKind::Wheel => to.wrapping_sub(from) as i8 as i16,
        KeyKind::Slider | KeyKind::Key => to as i16 - from as i16,
    }
}

impl Rotor {
    /// Latch the position of a fresh detection
    fn start(&mut self, unscaled: u8, resolution: u16) {
        self.unscaled = unscaled;
        self.position = scale(unscaled, resolution);
        self.direction = 0;
        self.direction_integrator = 0;
    }

    /// Follow a touch that is already detected.
    ///
    /// Moves in the established direction are taken as they come. A move
    /// against it must be seen `threshold` times in a row before it is
    /// accepted. Returns true when the scaled position changed.
    fn track(&mut self, kind: KeyKind, unscaled: u8, resolution: u16, threshold: u8) -> bool {
        let moved = movement(kind, self.unscaled, unscaled);
        if moved == 0 {
            return false;
        }

        let direction = moved.signum() as i8;
        if self.direction != 0 && direction != self.direction {
            self.direction_integrator = self.direction_integrator.saturating_add(1);
            if self.direction_integrator < threshold {
                return false;
            }
        }
        self.direction_integrator = 0;
        self.direction = direction;
        self.unscaled = unscaled;

        let position = scale(unscaled, resolution);
        let changed = position != self.position;
        self.position = position;
        changed
    }
}

/// Run one pass of the slider/wheel state machine for `keys[index]`
pub(crate) fn step(keys: &mut [Key<'_>], index: usize, pass: &Pass) -> Event {
    let event = single::step(keys, index, pass);

    let key = &mut keys[index];
    if key.state != KeyState::Detected {
        return event;
    }

    let config = key.config;
    let unscaled = unscaled_position(config.kind, &key.channel_deltas());
    if event == Event::Pressed {
        key.rotor.start(unscaled, config.resolution);
        trace!("key {}: touched at {}", index, key.rotor.position);
    } else if key.rotor.track(
        config.kind,
        unscaled,
        config.resolution,
        config.direction_change_threshold,
    ) {
        key.setting.insert(Setting::CHANGED);
        trace!("key {}: moved to {}", index, key.rotor.position);
    }
    event
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::config::{AcquisitionRange, KeyConfig};
    use crate::single::load;

    #[test]
    fn test_slider_position() {
        assert_eq!(unscaled_position(KeyKind::Slider, &[50, 0, 0]), 0);
        assert_eq!(unscaled_position(KeyKind::Slider, &[50, 50, 0]), 64);
        assert_eq!(unscaled_position(KeyKind::Slider, &[0, 50, 0]), 128);
        assert_eq!(unscaled_position(KeyKind::Slider, &[0, 50, 50]), 192);
        assert_eq!(unscaled_position(KeyKind::Slider, &[0, 0, 50]), 255);
        // (0*128 + 128 * 20 / 80)
        assert_eq!(unscaled_position(KeyKind::Slider, &[60, 20, 0]), 32);
        // Common mode is removed first
        assert_eq!(unscaled_position(KeyKind::Slider, &[60, 60, 10]), 64);
    }

    #[test]
    fn test_slider_ignores_negative_deltas() {
        assert_eq!(unscaled_position(KeyKind::Slider, &[-30, 40, 0]), 128);
    }

    #[test]
    fn test_wheel_position() {
        assert_eq!(unscaled_position(KeyKind::Wheel, &[50, 0, 0]), 0);
        assert_eq!(unscaled_position(KeyKind::Wheel, &[0, 50, 0]), 85);
        assert_eq!(unscaled_position(KeyKind::Wheel, &[0, 0, 50]), 170);
        // Halfway between channel 2 and channel 0, across the wrap
        assert_eq!(unscaled_position(KeyKind::Wheel, &[50, 0, 50]), 213);
        // Mostly channel 0, leaning towards channel 2
        assert_eq!(unscaled_position(KeyKind::Wheel, &[90, 0, 10]), 247);
    }

    #[test]
    fn test_flat_signal() {
        assert_eq!(unscaled_position(KeyKind::Slider, &[20, 20, 20]), 128);
        assert_eq!(unscaled_position(KeyKind::Wheel, &[20, 20, 20]), 0);
    }

    #[test]
    fn test_scale() {
        assert_eq!(scale(0, 100), 0);
        assert_eq!(scale(255, 100), 99);
        assert_eq!(scale(128, 64), 32);
    }

    #[test]
    fn test_wheel_movement_wraps() {
        assert_eq!(movement(KeyKind::Wheel, 250, 4), 10);
        assert_eq!(movement(KeyKind::Wheel, 4, 250), -10);
        assert_eq!(movement(KeyKind::Slider, 4, 250), 246);
    }

    #[test]
    fn test_reversal_needs_consistent_samples() {
        let mut rotor = Rotor::default();
        rotor.start(100, 256);

        assert!(rotor.track(KeyKind::Slider, 110, 256, 3));
        assert!(rotor.track(KeyKind::Slider, 120, 256, 3));

        // Jitter backwards is held off
        assert!(!rotor.track(KeyKind::Slider, 115, 256, 3));
        assert_eq!(rotor.position, 120);
        // Forward again resets the count
        assert!(rotor.track(KeyKind::Slider, 125, 256, 3));

        assert!(!rotor.track(KeyKind::Slider, 90, 256, 3));
        assert!(!rotor.track(KeyKind::Slider, 85, 256, 3));
        assert!(rotor.track(KeyKind::Slider, 80, 256, 3));
        assert_eq!(rotor.position, 80);
        assert_eq!(rotor.direction, -1);
    }

    #[test]
    fn test_slider_key_reports_position() {
        static SLIDER: KeyConfig = KeyConfig::slider([0, 1, 2])
            .thresholds(30, 15, -20)
            .integrators(2, 1, 4)
            .calibration(2)
            .resolution(64, 2);
        const RANGE: AcquisitionRange = AcquisitionRange { min: 1, max: 8192 };
        const PASS: Pass = Pass { one_second: false, negative_recalibration: true };

        let mut keys = [Key::new(0, &SLIDER)];
        for _ in 0..2 {
            load(&mut keys[0], &[500, 500, 500], &RANGE);
            step(&mut keys, 0, &PASS);
        }
        assert_eq!(keys[0].state(), KeyState::Idle);
        assert_eq!(keys[0].position(), None);

        // Finger between channels 0 and 1
        for _ in 0..2 {
            load(&mut keys[0], &[480, 480, 500], &RANGE);
            step(&mut keys, 0, &PASS);
        }
        assert_eq!(keys[0].state(), KeyState::Detected);
        assert_eq!(keys[0].unscaled_position(), Some(64));
        assert_eq!(keys[0].position(), Some(16));
        keys[0].setting.remove(Setting::CHANGED);

        // Slide towards channel 2
        load(&mut keys[0], &[500, 470, 490], &RANGE);
        step(&mut keys, 0, &PASS);
        assert_eq!(keys[0].position(), Some(40));
        assert!(keys[0].setting().contains(Setting::CHANGED));

        // Lift off
        load(&mut keys[0], &[500, 500, 500], &RANGE);
        step(&mut keys, 0, &PASS);
        load(&mut keys[0], &[500, 500, 500], &RANGE);
        step(&mut keys, 0, &PASS);
        assert_eq!(keys[0].state(), KeyState::Idle);
        assert_eq!(keys[0].position(), None);
    }
}
