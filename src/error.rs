//! PC/SC-style status codes.
//!
//! The numeric values follow the WinSCard convention so that embedders can
//! surface them unchanged. Only a subset is ever produced by this crate;
//! the rest is carried so that [`ScardError::is_fatal`] is total over the
//! code space a client may encounter.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, ScardError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u16)]
pub enum ScardError {
	#[error("internal error")]
	InternalError = 0x0001,
	#[error("operation cancelled")]
	Cancelled = 0x0002,
	#[error("invalid handle")]
	InvalidHandle = 0x0003,
	#[error("invalid parameter")]
	InvalidParameter = 0x0004,
	#[error("invalid target")]
	InvalidTarget = 0x0005,
	#[error("not enough memory")]
	NoMemory = 0x0006,
	#[error("waited too long")]
	WaitedTooLong = 0x0007,
	#[error("receive buffer is too small")]
	InsufficientBuffer = 0x0008,
	#[error("unknown reader")]
	UnknownReader = 0x0009,
	#[error("timeout")]
	Timeout = 0x000A,
	#[error("sharing violation")]
	SharingViolation = 0x000B,
	#[error("no smartcard in the slot")]
	NoSmartcard = 0x000C,
	#[error("unknown card")]
	UnknownCard = 0x000D,
	#[error("cannot dispose handle")]
	CantDispose = 0x000E,
	#[error("protocol mismatch")]
	ProtoMismatch = 0x000F,
	#[error("nothing received")]
	NotReady = 0x0010,
	#[error("invalid value")]
	InvalidValue = 0x0011,
	#[error("cancelled by the system")]
	SystemCancelled = 0x0012,
	#[error("communication error")]
	CommError = 0x0013,
	#[error("unknown error")]
	UnknownError = 0x0014,
	#[error("invalid ATR")]
	InvalidAtr = 0x0015,
	#[error("transaction failed")]
	NotTransacted = 0x0016,
	#[error("reader unavailable")]
	ReaderUnavailable = 0x0017,
	#[error("system shutdown")]
	Shutdown = 0x0018,
	#[error("PCI receive buffer too small")]
	PciTooSmall = 0x0019,
	#[error("reader not supported")]
	ReaderUnsupported = 0x001A,
	#[error("duplicate reader")]
	DuplicateReader = 0x001B,
	#[error("card not supported")]
	CardUnsupported = 0x001C,
	#[error("no service")]
	NoService = 0x001D,
	#[error("service stopped")]
	ServiceStopped = 0x001E,
	#[error("unexpected response")]
	Unexpected = 0x001F,
	#[error("unsupported feature")]
	UnsupportedFeature = 0x0022,
	#[error("no readers available")]
	NoReadersAvailable = 0x002E,
	#[error("communication data lost")]
	CommDataLost = 0x002F,
	#[error("unsupported card")]
	UnsupportedCard = 0x0065,
	#[error("unresponsive card")]
	UnresponsiveCard = 0x0066,
	#[error("unpowered card")]
	UnpoweredCard = 0x0067,
	#[error("card was reset")]
	ResetCard = 0x0068,
	#[error("card removed")]
	RemovedCard = 0x0069,
	#[error("card inserted")]
	InsertedCard = 0x006A,
}

impl ScardError {
	/// The WinSCard-style numeric code of this status.
	pub fn code(self) -> u16 {
		self as u16
	}

	/// Card warnings: the card in the slot is mute, gone or otherwise
	/// unusable, but the link to the coupler itself is fine.
	pub fn is_card_warning(self) -> bool {
		matches!(
			self,
			Self::UnsupportedCard
				| Self::UnresponsiveCard
				| Self::UnpoweredCard
				| Self::ResetCard
				| Self::RemovedCard
				| Self::InsertedCard
		)
	}

	/// Whether this status denotes a fatal communication error with the
	/// coupler, as opposed to one only related to the card in the slot.
	///
	/// A fatal error latches the driver invalid; card-related outcomes
	/// leave it operational.
	pub fn is_fatal(self) -> bool {
		!matches!(
			self,
			Self::UnsupportedCard
				| Self::UnresponsiveCard
				| Self::UnpoweredCard
				| Self::ResetCard
				| Self::RemovedCard
				| Self::InsertedCard
				| Self::NoSmartcard
				| Self::SharingViolation
				| Self::ProtoMismatch
				| Self::UnknownCard
				| Self::InvalidAtr
		)
	}
}

/// [`ScardError::is_fatal`] lifted over operation outcomes; success is
/// never fatal.
pub fn is_fatal<T>(outcome: &Result<T>) -> bool {
	match outcome {
		Ok(_) => false,
		Err(err) => err.is_fatal(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn card_warnings_are_not_fatal() {
		for err in [
			ScardError::UnsupportedCard,
			ScardError::UnresponsiveCard,
			ScardError::UnpoweredCard,
			ScardError::ResetCard,
			ScardError::RemovedCard,
			ScardError::InsertedCard,
		] {
			assert!(err.is_card_warning());
			assert!(!err.is_fatal());
		}
	}

	#[test]
	fn card_errors_are_not_fatal() {
		for err in [
			ScardError::NoSmartcard,
			ScardError::SharingViolation,
			ScardError::ProtoMismatch,
			ScardError::UnknownCard,
			ScardError::InvalidAtr,
		] {
			assert!(!err.is_card_warning());
			assert!(!err.is_fatal());
		}
	}

	#[test]
	fn everything_else_is_fatal() {
		for err in [
			ScardError::InternalError,
			ScardError::Cancelled,
			ScardError::InvalidParameter,
			ScardError::NoMemory,
			ScardError::WaitedTooLong,
			ScardError::InsufficientBuffer,
			ScardError::Timeout,
			ScardError::NotReady,
			ScardError::CommError,
			ScardError::UnknownError,
			ScardError::ReaderUnavailable,
			ScardError::ReaderUnsupported,
			ScardError::Unexpected,
		] {
			assert!(err.is_fatal());
		}
	}

	#[test]
	fn success_is_never_fatal() {
		assert!(!is_fatal(&Ok(())));
		assert!(is_fatal::<()>(&Err(ScardError::CommError)));
		assert!(!is_fatal::<()>(&Err(ScardError::RemovedCard)));
	}

	#[test]
	fn codes_follow_winscard() {
		assert_eq!(ScardError::Timeout.code(), 0x000A);
		assert_eq!(ScardError::ReaderUnsupported.code(), 0x001A);
		assert_eq!(ScardError::RemovedCard.code(), 0x0069);
	}
}
