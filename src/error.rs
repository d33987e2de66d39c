use std::fmt;
use std::io;

/// Errors produced by the bus engine.
#[derive(Debug)]
pub enum Error {
    /// The GPIO memory device could not be opened or mapped.
    Init(io::Error),
    /// A pin that must always be defined (`rscd`, `enwr`, or an 8-bit
    /// mode's `d7..d4`) was outside the valid `0..=27` range.
    InvalidPin(u8),
    /// A read was attempted on a descriptor with `rwrd` unset.
    WriteOnly,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Init(e) => write!(f, "failed to map GPIO registers: {}", e),
            Error::InvalidPin(p) => write!(f, "pin {} is out of range 0..=27", p),
            Error::WriteOnly => write!(f, "descriptor has no read/write-strobe pin (rwrd)"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Init(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Init(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
