//! Error related data structures to be shared and used.
//!
//! This module contains the [`Error`] enum, which is used to represent
//! errors that can occur within the greyboy domain.

use std::fmt::{self, Display, Formatter};

/// Top level enum for error handling within greyboy.
///
/// Most of the time, you will want to use the `CustomError` variant
/// to provide a more detailed error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidData,
    RomSize,
    InvalidRom,
    UnsupportedMbc,
    StateVersionMismatch,
    StateCorrupt,
    InvalidParameter(String),
    CustomError(String),
}

impl Error {
    pub fn description(&self) -> String {
        match self {
            Error::InvalidData => String::from("Invalid data format"),
            Error::RomSize => String::from("Invalid ROM size"),
            Error::InvalidRom => String::from("Invalid ROM header"),
            Error::UnsupportedMbc => String::from("Unsupported cartridge controller"),
            Error::StateVersionMismatch => String::from("Incompatible save state version"),
            Error::StateCorrupt => String::from("Corrupted save state"),
            Error::InvalidParameter(message) => format!("Invalid parameter: {}", message),
            Error::CustomError(message) => String::from(message),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl From<std::io::Error> for Error {
    fn from(_error: std::io::Error) -> Self {
        Error::InvalidData
    }
}
