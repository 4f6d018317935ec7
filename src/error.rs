use std::collections::TryReserveError;
use std::fmt;
pub use Error::*;

/// Error codes
#[non_exhaustive]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// The configuration violates a bound or ordering constraint. Nothing was processed.
    InvalidConfig(ConfigError),
    /// The minimum quality set in [`QuantizationConfig`][crate::QuantizationConfig] could not be achieved
    QualityTooLow,
    /// Progress callback said to stop
    Aborted,
    /// There are no pixels or colors to work with
    EmptyInput,
    /// Slice needs to be bigger, or width/height needs to be smaller
    BufferTooSmall,
    /// Function called with invalid arguments
    ValueOutOfRange,
    /// Either the system/process really hit a limit, or some data like image size was ridiculously wrong
    OutOfMemory,
}

/// Which configuration bound was violated
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// Quality must be in 0-100
    QualityOutOfRange,
    /// Minimum quality is higher than the maximum
    QualityOrder,
    /// Speed must be in 1-11
    SpeedOutOfRange,
    /// Dithering strength must be in 0.0-1.0
    DitherOutOfRange,
    /// Palette size must be in 2-256
    MaxColorsOutOfRange,
    /// At most 4 bits can be posterized
    PosterizationOutOfRange,
    /// Gamma must be in 0-1 (0 means sRGB)
    GammaOutOfRange,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::InvalidConfig(e) => write!(f, "INVALID_CONFIG: {e}"),
            Self::QualityTooLow => f.write_str("QUALITY_TOO_LOW"),
            Self::Aborted => f.write_str("ABORTED"),
            Self::EmptyInput => f.write_str("EMPTY_INPUT"),
            Self::BufferTooSmall => f.write_str("BUFFER_TOO_SMALL"),
            Self::ValueOutOfRange => f.write_str("VALUE_OUT_OF_RANGE"),
            Self::OutOfMemory => f.write_str("OUT_OF_MEMORY"),
        }
    }
}

impl fmt::Display for ConfigError {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::QualityOutOfRange => "quality must be in 0-100",
            Self::QualityOrder => "minimum quality is above maximum quality",
            Self::SpeedOutOfRange => "speed must be in 1-11",
            Self::DitherOutOfRange => "dithering strength must be in 0-1",
            Self::MaxColorsOutOfRange => "max colors must be in 2-256",
            Self::PosterizationOutOfRange => "posterization must be in 0-4 bits",
            Self::GammaOutOfRange => "gamma must be >= 0 and < 1",
        })
    }
}

impl From<ConfigError> for Error {
    #[cold]
    fn from(e: ConfigError) -> Self {
        Self::InvalidConfig(e)
    }
}

impl From<TryReserveError> for Error {
    #[cold]
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

#[test]
fn display() {
    assert_eq!("QUALITY_TOO_LOW", QualityTooLow.to_string());
    assert_eq!("INVALID_CONFIG: speed must be in 1-11", Error::from(ConfigError::SpeedOutOfRange).to_string());
}
