use core::fmt;

/// Rejected engine configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Calibration sample count is zero or not a power of two
    CalibrationSamples { key: usize, samples: u16 },
    /// A channel reads an acquisition slot the port does not provide
    GroupOutOfRange { key: usize, group: u8 },
    /// A slider or wheel with zero resolution
    Resolution { key: usize },
    /// The registry holds more keys than a key index can name
    TooManyKeys,
    EcsTimeStep,
    EcsPrescaler,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::CalibrationSamples { key, samples } => {
                write!(f, "key {}: {} calibration samples is not a power of two", key, samples)
            }
            ConfigError::GroupOutOfRange { key, group } => {
                write!(f, "key {}: acquisition group {} does not exist", key, group)
            }
            ConfigError::Resolution { key } => {
                write!(f, "key {}: resolution must be non-zero", key)
            }
            ConfigError::TooManyKeys => write!(f, "too many keys in the registry"),
            ConfigError::EcsTimeStep => write!(f, "ECS time step must be non-zero"),
            ConfigError::EcsPrescaler => write!(f, "ECS tempo prescaler must be non-zero"),
        }
    }
}

/// Failure of one engine poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollError<E> {
    /// The acquisition port could not produce a measurement
    Acquisition(E),
}

impl<E: fmt::Debug> fmt::Display for PollError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Acquisition(e) => write!(f, "acquisition failed: {:?}", e),
        }
    }
}
