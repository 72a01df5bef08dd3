/// Errors which can be returned.
///
/// The fatal paths never return; these only come out of the configuration
/// surface and out of snapshot writers.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, strum::Display)]
#[non_exhaustive]
pub enum Error {
    /// A slot, size or flag value is out of range. Nothing was changed.
    InvalidArgument,
    /// An error which originates from the embedded-storage implementation.
    Storage,
}

impl core::error::Error for Error {}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Error::InvalidArgument => embedded_io::ErrorKind::InvalidInput,
            Error::Storage => embedded_io::ErrorKind::Other,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{}", self)
    }
}
