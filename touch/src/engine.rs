//! The key registry and the per-cycle sequencing around it.

use log::{debug, trace};

use crate::acquisition::{Acquisition, AcquisitionPort};
use crate::config::{EngineConfig, KeyConfig};
use crate::ecs::Ecs;
use crate::error::{ConfigError, PollError};
use crate::key::{Event, Key, KeyState, Setting};
use crate::multi;
use crate::single::{self, Pass};
use crate::timebase::Timebase;

/// OR of every key's state and setting bits after a poll
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Summary {
    pub states: u8,
    pub settings: Setting,
}

impl Summary {
    fn fold(&mut self, key: &Key<'_>) {
        self.states |= key.state.bit();
        self.settings |= key.setting;
    }

    pub fn any_detected(&self) -> bool {
        self.settings.contains(Setting::DETECTED)
    }

    pub fn any_changed(&self) -> bool {
        self.settings.contains(Setting::CHANGED)
    }

    pub fn any_error(&self) -> bool {
        self.settings.contains(Setting::ERROR)
    }

    /// Whether some key is in the same state as `state`, ignoring counters
    pub fn any_in(&self, state: KeyState) -> bool {
        self.states & state.bit() != 0
    }
}

/// What the application sees of one key
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyStatus {
    pub detected: bool,
    pub changed: bool,
    pub error: bool,
    pub noise: bool,
    /// Scaled position of a detected slider or wheel
    pub position: Option<u16>,
}

pub struct Engine<'a, P, const K: usize, const G: usize> {
    port: P,
    config: &'a EngineConfig,
    keys: [Key<'a>; K],
    ecs: Ecs,
    acquisition: Acquisition<G>,
    summary: Summary,
}

impl<'a, P, const K: usize, const G: usize> Engine<'a, P, K, G>
where
    P: AcquisitionPort<G>,
{
    /// Build the registry from one configuration per key. Enabled keys start
    /// calibrating on the first poll.
    pub fn new(
        port: P,
        config: &'a EngineConfig,
        keys: &'a [KeyConfig; K],
    ) -> Result<Self, ConfigError> {
        if K > u8::MAX as usize + 1 {
            return Err(ConfigError::TooManyKeys);
        }
        if config.ecs_time_step == 0 {
            return Err(ConfigError::EcsTimeStep);
        }
        if config.ecs_tempo_prescaler == 0 {
            return Err(ConfigError::EcsPrescaler);
        }
        for (index, key) in keys.iter().enumerate().filter(|(_, k)| k.implemented) {
            validate(index, key, G)?;
        }

        let mut index = 0u8;
        let keys = keys.each_ref().map(|config| {
            let key = Key::new(index, config);
            index = index.wrapping_add(1);
            key
        });

        Ok(Self {
            port,
            config,
            keys,
            ecs: Ecs::new(config),
            acquisition: Acquisition::new(),
            summary: Summary::default(),
        })
    }

    /// Run one full cycle: acquire, step every key's state machine, then
    /// spend the elapsed 10 ms credits on drift compensation.
    pub fn poll(&mut self, timebase: &Timebase) -> Result<Summary, PollError<P::Error>> {
        self.port.acquire(&mut self.acquisition).map_err(PollError::Acquisition)?;
        if (0..G).any(|slot| self.acquisition.is_saturated(slot)) {
            trace!("saturated acquisition: {:?}", self.acquisition.counts());
        }

        let pass = Pass {
            one_second: timebase.take_one_second(),
            negative_recalibration: self.config.negative_recalibration,
        };
        let counts = self.acquisition.counts();
        for key in self.keys.iter_mut() {
            single::load(key, counts, &self.config.range);
        }

        let mut summary = Summary::default();
        for index in 0..K {
            let event = if self.keys[index].config.kind.is_multi() {
                multi::step(&mut self.keys, index, &pass)
            } else {
                single::step(&mut self.keys, index, &pass)
            };
            if event != Event::None {
                trace!("key {}: {:?} -> {:?}", index, event, self.keys[index].state);
            }
            summary.fold(&self.keys[index]);
        }

        let credits = timebase.take_credits();
        if credits > 0 {
            self.ecs.run(&mut self.keys, credits, self.config);
        }

        self.summary = summary;
        Ok(summary)
    }

    /// Summary of the last poll
    pub fn summary(&self) -> Summary {
        self.summary
    }

    pub fn keys(&self) -> &[Key<'a>; K] {
        &self.keys
    }

    pub fn key(&self, index: usize) -> Option<&Key<'a>> {
        self.keys.get(index)
    }

    /// Enable or disable a key, taking effect on the next poll
    pub fn set_enabled(&mut self, index: usize, enabled: bool) {
        if let Some(key) = self.keys.get_mut(index) {
            key.set_enabled(enabled);
        }
    }

    /// Read a key's status, acknowledging its `changed` and `noise` flags
    pub fn take_status(&mut self, index: usize) -> Option<KeyStatus> {
        let key = self.keys.get_mut(index)?;
        let setting = key.setting;
        key.setting.remove(Setting::CHANGED | Setting::NOISE);
        Some(KeyStatus {
            detected: setting.contains(Setting::DETECTED),
            changed: setting.contains(Setting::CHANGED),
            error: setting.contains(Setting::ERROR),
            noise: setting.contains(Setting::NOISE),
            position: key.position(),
        })
    }

    /// Throw away a key's reference and measure a new one. Keys that are
    /// disabled or in error are left alone.
    pub fn recalibrate(&mut self, index: usize) {
        if let Some(key) = self.keys.get_mut(index) {
            if !matches!(key.state, KeyState::Disabled | KeyState::Error) {
                debug!("key {}: recalibration requested", index);
                key.start_calibration();
            }
        }
    }

    pub fn recalibrate_all(&mut self) {
        for index in 0..K {
            self.recalibrate(index);
        }
    }

    pub fn ecs(&self) -> &Ecs {
        &self.ecs
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}

fn validate(index: usize, key: &KeyConfig, groups: usize) -> Result<(), ConfigError> {
    let samples = key.calibration_samples;
    if !samples.is_power_of_two() {
        return Err(ConfigError::CalibrationSamples { key: index, samples });
    }
    if let Some(group) = key.groups[..key.kind.channels()].iter().find(|g| **g as usize >= groups) {
        return Err(ConfigError::GroupOutOfRange { key: index, group: *group });
    }
    if key.kind.is_multi() && key.resolution == 0 {
        return Err(ConfigError::Resolution { key: index });
    }
    Ok(())
}
