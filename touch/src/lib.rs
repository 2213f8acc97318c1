//! Capacitive touch key detection.
//!
//! Raw charge-transfer counts come in through an [`AcquisitionPort`]; each
//! poll of the [`Engine`] turns them into debounced key, slider and wheel
//! states. References are calibrated at start-up and kept centred afterwards
//! by a slow drift filter, paced by a [`Timebase`] ticked from a 10 ms
//! interrupt.
#![cfg_attr(not(test), no_std)]

pub mod acquisition;
pub mod config;
pub mod delta;
pub mod dxs;
pub mod ecs;
pub mod engine;
pub mod error;
pub mod key;
pub mod multi;
mod single;
pub mod timebase;
#[cfg(any(feature = "stm32f0x1", feature = "stm32f303"))]
pub mod tsc;

pub use acquisition::{Acquisition, AcquisitionPort};
pub use config::{
    AcquisitionRange, EngineConfig, KeyConfig, KeyKind, DEFAULT_ENGINE_CONFIG, DEFAULT_KEY_CONFIG,
};
pub use engine::{Engine, KeyStatus, Summary};
pub use error::{ConfigError, PollError};
pub use key::{Key, KeyState, Setting};
pub use timebase::Timebase;
