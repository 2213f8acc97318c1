/// Number of channel records owned by every key. Single keys use only the first.
pub const MAX_CHANNELS: usize = 3;

/// The kind of sensor a key record drives
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyKind {
    /// A single electrode button
    Key,
    /// Three electrodes laid out in a line, with ends at channel 0 and channel 2
    Slider,
    /// Three electrodes laid out in a ring
    Wheel,
}

impl KeyKind {
    /// Number of channels read for this kind of key
    pub const fn channels(&self) -> usize {
        match self {
            KeyKind::Key => 1,
            KeyKind::Slider | KeyKind::Wheel => MAX_CHANNELS,
        }
    }

    pub const fn is_multi(&self) -> bool {
        !matches!(self, KeyKind::Key)
    }
}

/// Per-key configuration, set once before the first poll
///
/// Thresholds are compared against the key's delta (reference minus
/// measurement), so a touch produces a positive delta and a drop in
/// capacitance produces a negative one.
#[derive(Clone, Copy, Debug)]
pub struct KeyConfig {
    pub kind: KeyKind,
    /// Set false for registry slots that have no electrode behind them. Such keys stay disabled.
    pub implemented: bool,
    /// Enabled state at start-up. The application may change it later through `Key::set_enabled`.
    pub enabled: bool,
    /// Acquisition slot read by each channel
    pub groups: [u8; MAX_CHANNELS],
    /// Exclusion groups this key belongs to. Two keys sharing a bit may not both be detected.
    pub exclusion_mask: u8,
    /// Delta at or above which a touch is suspected
    pub detect_threshold: i8,
    /// Once detected, delta must fall below this to begin releasing
    pub end_detect_threshold: i8,
    /// Delta at or below which the reference is assumed stale (negative)
    pub recalibrate_threshold: i8,
    /// Consecutive polls above `detect_threshold` required to report a detection
    pub detect_integrator: u8,
    /// Polls below `end_detect_threshold` required to report a release
    pub end_detect_integrator: u8,
    /// Polls below `recalibrate_threshold` required to start a recalibration
    pub recalibrate_integrator: u8,
    /// Seconds a detection may last before the key is recalibrated. 0 disables the timeout.
    pub detect_timeout: u16,
    /// Samples averaged into the reference during calibration. Must be a power of two.
    pub calibration_samples: u16,
    /// Number of distinct scaled positions reported by a slider or wheel
    pub resolution: u16,
    /// Samples moving against the last direction needed before a reversal is accepted
    pub direction_change_threshold: u8,
}

impl KeyConfig {
    pub const fn default() -> Self {
        Self {
            kind: KeyKind::Key,
            implemented: true,
            enabled: true,
            groups: [0; MAX_CHANNELS],
            exclusion_mask: 0,
            detect_threshold: 20,
            end_detect_threshold: 10,
            recalibrate_threshold: -10,
            detect_integrator: 4,
            end_detect_integrator: 1,
            recalibrate_integrator: 8,
            detect_timeout: 30,
            calibration_samples: 16,
            resolution: 256,
            direction_change_threshold: 3,
        }
    }

    /// A single key reading acquisition slot `group`
    pub const fn key(group: u8) -> Self {
        let mut config = Self::default();
        config.groups = [group, group, group];
        config
    }

    /// A slider reading its three electrodes from `groups`, ordered end to end
    pub const fn slider(groups: [u8; MAX_CHANNELS]) -> Self {
        let mut config = Self::default();
        config.kind = KeyKind::Slider;
        config.groups = groups;
        config
    }

    /// A wheel reading its three electrodes from `groups`, ordered around the ring
    pub const fn wheel(groups: [u8; MAX_CHANNELS]) -> Self {
        let mut config = Self::default();
        config.kind = KeyKind::Wheel;
        config.groups = groups;
        config
    }

    /// A registry slot with no electrode behind it
    pub const fn unused() -> Self {
        let mut config = Self::default();
        config.implemented = false;
        config.enabled = false;
        config
    }

    pub const fn exclusion(mut self, mask: u8) -> Self {
        self.exclusion_mask = mask;
        self
    }

    pub const fn thresholds(mut self, detect: i8, end_detect: i8, recalibrate: i8) -> Self {
        assert!(detect > 0 && recalibrate < 0);
        self.detect_threshold = detect;
        self.end_detect_threshold = end_detect;
        self.recalibrate_threshold = recalibrate;
        self
    }

    pub const fn integrators(mut self, detect: u8, end_detect: u8, recalibrate: u8) -> Self {
        self.detect_integrator = detect;
        self.end_detect_integrator = end_detect;
        self.recalibrate_integrator = recalibrate;
        self
    }

    pub const fn timeout(mut self, seconds: u16) -> Self {
        self.detect_timeout = seconds;
        self
    }

    pub const fn calibration(mut self, samples: u16) -> Self {
        self.calibration_samples = samples;
        self
    }

    pub const fn resolution(mut self, resolution: u16, direction_change_threshold: u8) -> Self {
        self.resolution = resolution;
        self.direction_change_threshold = direction_change_threshold;
        self
    }

    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

pub const DEFAULT_KEY_CONFIG: KeyConfig = KeyConfig::default();

/// Window of raw counts accepted as a valid measurement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcquisitionRange {
    pub min: u16,
    pub max: u16,
}

impl AcquisitionRange {
    pub const fn contains(&self, count: u16) -> bool {
        count >= self.min && count <= self.max
    }
}

/// Configuration shared by every key in the registry
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Filter coefficient (k/256) used when every idle key drifts the same way
    pub ecs_fast: u8,
    /// Filter coefficient (k/256) used otherwise
    pub ecs_slow: u8,
    /// 10 ms units between two filter steps
    pub ecs_time_step: u16,
    /// 10 ms units per tick of the hold-off tempo
    pub ecs_tempo_prescaler: u16,
    /// Tempo ticks during which drift correction is held off after any detection
    pub ecs_hold_off: u16,
    /// When false, large negative deltas are treated as touch candidates instead of
    /// triggering a recalibration.
    pub negative_recalibration: bool,
    /// Raw counts outside this window put the key into the error state
    pub range: AcquisitionRange,
}

impl EngineConfig {
    pub const fn default() -> Self {
        Self {
            ecs_fast: 64,
            ecs_slow: 4,
            ecs_time_step: 10,
            ecs_tempo_prescaler: 10,
            ecs_hold_off: 20,
            negative_recalibration: true,
            range: AcquisitionRange { min: 1, max: u16::MAX },
        }
    }
}

pub const DEFAULT_ENGINE_CONFIG: EngineConfig = EngineConfig::default();

#[cfg(test)]
pub mod test {
    use super::*;

    #[test]
    fn test_builders() {
        const WHEEL: KeyConfig = KeyConfig::wheel([1, 2, 3])
            .exclusion(0b10)
            .thresholds(12, 5, -7)
            .resolution(64, 2);

        assert_eq!(WHEEL.kind, KeyKind::Wheel);
        assert_eq!(WHEEL.kind.channels(), 3);
        assert_eq!(WHEEL.groups, [1, 2, 3]);
        assert_eq!(WHEEL.exclusion_mask, 0b10);
        assert_eq!(WHEEL.recalibrate_threshold, -7);
        assert_eq!(WHEEL.resolution, 64);

        let key = KeyConfig::key(4);
        assert_eq!(key.kind.channels(), 1);
        assert_eq!(key.groups[0], 4);
        assert!(!KeyConfig::unused().implemented);
    }

    #[test]
    fn test_range() {
        let range = AcquisitionRange { min: 10, max: 20 };
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(9));
        assert!(!range.contains(21));
    }
}
