use core::ops::{BitOr, BitOrAssign};

use log::{debug, warn};

use crate::config::{KeyConfig, KeyKind, MAX_CHANNELS};

/// State of a key's detection state machine
///
/// Counters ride along with the states that use them: the debounce
/// integrator for the transient states, and the number of samples still to
/// collect while calibrating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyState {
    Disabled,
    Calibrating(u16),
    Idle,
    PreDetect(u8),
    Detected,
    PostDetect(u8),
    PreRecalibrate(u8),
    Error,
}

impl KeyState {
    /// One-hot encoding, used to build the registry-wide summary
    pub const fn bit(&self) -> u8 {
        match self {
            KeyState::Disabled => 1 << 0,
            KeyState::Calibrating(_) => 1 << 1,
            KeyState::Idle => 1 << 2,
            KeyState::PreDetect(_) => 1 << 3,
            KeyState::Detected => 1 << 4,
            KeyState::PostDetect(_) => 1 << 5,
            KeyState::PreRecalibrate(_) => 1 << 6,
            KeyState::Error => 1 << 7,
        }
    }

    /// True from the first suspected touch until the key is idle again
    pub const fn is_mid_detection(&self) -> bool {
        matches!(self, KeyState::PreDetect(_) | KeyState::Detected | KeyState::PostDetect(_))
    }
}

/// Flags written by the engine and read by the application
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Setting(u8);

impl Setting {
    pub const DETECTED: Setting = Setting(1 << 0);
    /// Detection state or position changed since the application last took the status
    pub const CHANGED: Setting = Setting(1 << 1);
    /// The key holds exclusivity over its exclusion groups
    pub const LOCKED: Setting = Setting(1 << 2);
    pub const ERROR: Setting = Setting(1 << 3);
    /// A touch or recalibration candidate was discarded before it was confirmed
    pub const NOISE: Setting = Setting(1 << 4);

    pub const fn empty() -> Self {
        Setting(0)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: Setting) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(&self, other: Setting) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Setting) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Setting) {
        self.0 &= !other.0;
    }
}

impl BitOr for Setting {
    type Output = Setting;

    fn bitor(self, rhs: Setting) -> Setting {
        Setting(self.0 | rhs.0)
    }
}

impl BitOrAssign for Setting {
    fn bitor_assign(&mut self, rhs: Setting) {
        self.0 |= rhs.0;
    }
}

/// Reference tracking for one electrode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelRecord {
    /// Baseline count for the untouched electrode
    pub reference: u16,
    /// Fractional part of the reference, in 1/256 counts, kept by the drift filter
    pub remainder: u8,
    /// Most recent raw count
    pub last: u16,
    pub(crate) accumulator: u32,
}

/// Position tracking for sliders and wheels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rotor {
    pub(crate) position: u16,
    pub(crate) unscaled: u8,
    /// -1, 0 or +1: the direction of the last accepted movement
    pub(crate) direction: i8,
    pub(crate) direction_integrator: u8,
}

/// What a state machine pass did to a key, for those that care
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    None,
    Pressed,
    Released,
    Recalibrating,
    Calibrated,
    Failed,
}

/// One entry of the key registry
#[derive(Clone, Copy, Debug)]
pub struct Key<'a> {
    pub(crate) config: &'a KeyConfig,
    pub(crate) index: u8,
    pub(crate) enabled: bool,
    pub(crate) state: KeyState,
    pub(crate) setting: Setting,
    pub(crate) out_of_range: bool,
    /// Disabled and re-enabled by the application since the last poll
    pub(crate) restart: bool,
    /// Seconds of detection left before a forced recalibration
    pub(crate) timeout: u16,
    pub(crate) channels: [ChannelRecord; MAX_CHANNELS],
    pub(crate) rotor: Rotor,
}

impl<'a> Key<'a> {
    pub fn new(index: u8, config: &'a KeyConfig) -> Self {
        let enabled = config.implemented && config.enabled;
        let mut key = Self {
            config,
            index,
            enabled,
            state: KeyState::Disabled,
            setting: Setting::empty(),
            out_of_range: false,
            restart: false,
            timeout: 0,
            channels: [ChannelRecord::default(); MAX_CHANNELS],
            rotor: Rotor::default(),
        };
        if enabled {
            key.start_calibration();
        }
        key
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Configuration the key was validated against
    pub fn config(&self) -> &'a KeyConfig {
        self.config
    }

    pub fn kind(&self) -> KeyKind {
        self.config.kind
    }

    pub fn state(&self) -> KeyState {
        self.state
    }

    pub fn setting(&self) -> Setting {
        self.setting
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the key. The engine reacts on the next poll: a
    /// disabled key goes to `Disabled`, a re-enabled one recalibrates, even
    /// when both happen between the same two polls.
    pub fn set_enabled(&mut self, enabled: bool) {
        let enabled = enabled && self.config.implemented;
        if enabled && !self.enabled && self.state != KeyState::Disabled {
            self.restart = true;
        }
        self.enabled = enabled;
    }

    pub fn detected(&self) -> bool {
        self.setting.contains(Setting::DETECTED)
    }

    pub fn locked(&self) -> bool {
        self.setting.contains(Setting::LOCKED)
    }

    /// Debounce integrator of the current transient state, if any
    pub fn integrator(&self) -> Option<u8> {
        match self.state {
            KeyState::PreDetect(n) | KeyState::PostDetect(n) | KeyState::PreRecalibrate(n) => {
                Some(n)
            }
            _ => None,
        }
    }

    pub fn channels(&self) -> &[ChannelRecord] {
        &self.channels[..self.config.kind.channels()]
    }

    /// Reference of the first channel
    pub fn reference(&self) -> u16 {
        self.channels[0].reference
    }

    /// Scaled position of a slider or wheel while it is detected
    pub fn position(&self) -> Option<u16> {
        if self.config.kind.is_multi() && self.detected() {
            Some(self.rotor.position)
        } else {
            None
        }
    }

    pub fn unscaled_position(&self) -> Option<u8> {
        if self.config.kind.is_multi() && self.detected() {
            Some(self.rotor.unscaled)
        } else {
            None
        }
    }

    /// Drop a detection and any claim on the exclusion groups
    fn clear_detection(&mut self) {
        if self.setting.contains(Setting::DETECTED) {
            self.setting.insert(Setting::CHANGED);
        }
        self.setting.remove(Setting::DETECTED | Setting::LOCKED);
    }

    pub(crate) fn start_calibration(&mut self) {
        self.clear_detection();
        self.setting.remove(Setting::ERROR);
        for channel in self.channels.iter_mut() {
            channel.accumulator = 0;
        }
        self.state = KeyState::Calibrating(self.config.calibration_samples);
        debug!("key {}: calibrating", self.index);
    }

    pub(crate) fn disable(&mut self) {
        self.clear_detection();
        self.setting.remove(Setting::ERROR);
        self.state = KeyState::Disabled;
        debug!("key {}: disabled", self.index);
    }

    pub(crate) fn fail(&mut self) {
        self.clear_detection();
        self.setting.insert(Setting::ERROR);
        self.state = KeyState::Error;
        warn!("key {}: measurement out of range", self.index);
    }

    /// Return to idle, dropping whatever the key was doing
    pub(crate) fn settle(&mut self) {
        self.clear_detection();
        self.setting.remove(Setting::ERROR);
        self.state = KeyState::Idle;
    }

    pub(crate) fn promote(&mut self) {
        self.setting.insert(Setting::DETECTED | Setting::CHANGED);
        self.timeout = self.config.detect_timeout;
        self.state = KeyState::Detected;
        debug!("key {}: detected", self.index);
    }

    pub(crate) fn release(&mut self) {
        self.settle();
        debug!("key {}: released", self.index);
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::config::DEFAULT_KEY_CONFIG;

    #[test]
    fn test_new_key_calibrates_when_enabled() {
        let key = Key::new(0, &DEFAULT_KEY_CONFIG);
        assert_eq!(key.state(), KeyState::Calibrating(DEFAULT_KEY_CONFIG.calibration_samples));

        static DISABLED: KeyConfig = KeyConfig::key(0).disabled();
        let key = Key::new(1, &DISABLED);
        assert_eq!(key.state(), KeyState::Disabled);
        assert!(!key.enabled());
    }

    #[test]
    fn test_unimplemented_key_cannot_be_enabled() {
        static UNUSED: KeyConfig = KeyConfig::unused();
        let mut key = Key::new(0, &UNUSED);
        key.set_enabled(true);
        assert!(!key.enabled());
    }

    #[test]
    fn test_state_bits_are_one_hot() {
        let states = [
            KeyState::Disabled,
            KeyState::Calibrating(1),
            KeyState::Idle,
            KeyState::PreDetect(1),
            KeyState::Detected,
            KeyState::PostDetect(1),
            KeyState::PreRecalibrate(1),
            KeyState::Error,
        ];
        let mut all = 0u8;
        for state in states {
            assert_eq!(state.bit().count_ones(), 1);
            assert_eq!(all & state.bit(), 0);
            all |= state.bit();
        }
        assert_eq!(all, 0xff);
    }

    #[test]
    fn test_clearing_a_detection_flags_change() {
        let mut key = Key::new(0, &DEFAULT_KEY_CONFIG);
        key.promote();
        key.setting.insert(Setting::LOCKED);
        key.setting.remove(Setting::CHANGED);

        key.release();
        assert_eq!(key.state(), KeyState::Idle);
        assert!(!key.detected());
        assert!(!key.locked());
        assert!(key.setting().contains(Setting::CHANGED));
    }
}
