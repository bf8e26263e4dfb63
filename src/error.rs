//! Error handling for the WiFi driver.
//!
//! Commands report failure through `Result<T, Error>`. The variants follow
//! the three ways an AT exchange can go wrong: the modem answers `ERROR` or
//! `FAIL`, the modem answers nothing relevant before the step deadline, or
//! the caller hands the driver an argument the modem would reject anyway.

use core::fmt;

/// Driver error type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
	/// The modem reported the command failed
	AtCommand,
	/// No matching response arrived before the step deadline
	Timeout,
	/// Transmit payload empty or larger than the modem accepts
	PayloadSize,
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::AtCommand => write!(f, "AT command failed"),
			Error::Timeout => write!(f, "Operation timed out"),
			Error::PayloadSize => write!(f, "Payload size out of range"),
		}
	}
}

/// Result type alias for this crate.
pub type Result<T> = core::result::Result<T, Error>;
