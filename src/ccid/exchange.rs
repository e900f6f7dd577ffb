//! Matched request/response exchanges.
//!
//! An exchange sends one packet and loops on the receiver until the frame
//! that answers it arrives: notifications that show up in the middle are
//! discarded, time extensions refresh the wait, and everything else must
//! match the request by endpoint and, for bulk traffic, slot and sequence.

use log::debug;

use crate::ccid::packet::{BulkIn, HeaderData};
use crate::ccid::{CcidDriver, Endpoint, Opcode, Packet, sender};
use crate::config::{MAX_SLOT_COUNT, TIME_EXTENSION_LIMIT};
use crate::error::{Result, ScardError};
use crate::hal::{SerialPort, Wakeup};

/// CCID slot error codes, from the `bError` field of a failed bulk
/// response. Codes up to 0x10 name the offset of the faulty parameter in
/// the request header.
mod slot_error {
	pub const CMD_ABORTED: u8 = 0xFF;
	pub const ICC_MUTE: u8 = 0xFE;
	pub const XFR_PARITY_ERROR: u8 = 0xFD;
	pub const XFR_OVERRUN: u8 = 0xFC;
	pub const HW_ERROR: u8 = 0xFB;
	pub const BAD_ATR_TS: u8 = 0xF8;
	pub const BAD_ATR_TCK: u8 = 0xF7;
	pub const ICC_PROTOCOL_NOT_SUPPORTED: u8 = 0xF6;
	pub const ICC_CLASS_NOT_SUPPORTED: u8 = 0xF5;
	pub const PROCEDURE_BYTE_CONFLICT: u8 = 0xF4;
	pub const DEACTIVATED_PROTOCOL: u8 = 0xF3;
	pub const BUSY_WITH_AUTO_SEQUENCE: u8 = 0xF2;
	pub const CMD_SLOT_BUSY: u8 = 0xE0;
}

/// Translate the error code of a failed bulk response.
fn slot_error_outcome(code: u8) -> Result<()> {
	use slot_error::*;

	match code {
		CMD_ABORTED | BUSY_WITH_AUTO_SEQUENCE | CMD_SLOT_BUSY => Err(ScardError::Unexpected),
		0x01..=0x10 => Err(ScardError::Unexpected),
		ICC_MUTE | XFR_PARITY_ERROR | XFR_OVERRUN | HW_ERROR => {
			Err(ScardError::UnresponsiveCard)
		}
		BAD_ATR_TS
		| BAD_ATR_TCK
		| ICC_PROTOCOL_NOT_SUPPORTED
		| ICC_CLASS_NOT_SUPPORTED
		| PROCEDURE_BYTE_CONFLICT
		| DEACTIVATED_PROTOCOL => Err(ScardError::UnsupportedCard),
		_ => Ok(()),
	}
}

/// Translate the slot-status byte of a bulk response.
///
/// [`ScardError::Timeout`] here means a time extension: the device asks the
/// host to keep waiting. The exchange loop absorbs it; it is never
/// surfaced.
fn slot_status_outcome(bulk: &BulkIn) -> Result<()> {
	match bulk.slot_status & 0xC0 {
		0x00 => match bulk.slot_status & 0x03 {
			0x00 => Ok(()),
			0x01 => Err(ScardError::UnresponsiveCard),
			0x02 => Err(ScardError::RemovedCard),
			_ => Err(ScardError::ReaderUnsupported),
		},
		0x40 => slot_error_outcome(bulk.slot_error),
		0x80 => Err(ScardError::Timeout),
		_ => Err(ScardError::ReaderUnsupported),
	}
}

impl<P: SerialPort, W: Wakeup> CcidDriver<'_, P, W> {
	/// The current sequence number of `slot`, `0xFF` for a slot the driver
	/// does not track.
	pub fn sequence(&self, slot: u8) -> u8 {
		self.sequences
			.get(usize::from(slot))
			.copied()
			.unwrap_or(0xFF)
	}

	/// Advance the sequence number of `slot`, wrapping at 256.
	pub fn next_sequence(&mut self, slot: u8) {
		if let Some(sequence) = self.sequences.get_mut(usize::from(slot)) {
			*sequence = sequence.wrapping_add(1);
		}
	}

	/// Restart every slot at sequence 0.
	pub fn reset_sequences(&mut self) {
		self.sequences = [0; MAX_SLOT_COUNT];
	}

	/// Send `packet` and receive the response that answers it, within
	/// `timeout_ms` per response.
	///
	/// The response overwrites `packet` in place: header, endpoint and, if
	/// a receive buffer is attached, payload. A matched bulk completion
	/// advances the slot's sequence number.
	pub fn exchange(&mut self, packet: &mut Packet<'_>, timeout_ms: u64) -> Result<()> {
		let request_endpoint = packet.endpoint;
		let (value, index) = match packet.header.control() {
			Some(control) => (control.value, control.index),
			None => (0, 0),
		};
		let (slot, sequence) = match packet.header.data {
			HeaderData::BulkOut(bulk) => (bulk.slot, bulk.sequence),
			_ => (0, 0),
		};

		if let Err(err) = sender::send(&mut self.port, packet) {
			self.raise_error("failed to send the request");
			return Err(err);
		}

		let mut extensions: u16 = 0;
		loop {
			if let Err(err) = self.receiver.recv(packet, timeout_ms) {
				self.raise_error("failed to receive the response");
				return Err(err);
			}

			if packet.endpoint == u8::from(Endpoint::InterruptIn) {
				// An asynchronous notification, not the response; it is
				// safe to discard mid-exchange.
				debug!("notification discarded mid-exchange");
				continue;
			}

			match Endpoint::try_from(request_endpoint) {
				Ok(Endpoint::ControlOut) => {
					if packet.endpoint != u8::from(Endpoint::ControlIn) {
						self.raise_error("wrong endpoint in the response");
						return self.latch_fatal(Err(ScardError::ReaderUnsupported));
					}
					return match packet.header.control() {
						Some(control) if control.value == value && control.index == index => {
							Ok(())
						}
						_ => {
							self.raise_error("wrong value/index in the response");
							self.latch_fatal(Err(ScardError::ReaderUnsupported))
						}
					};
				}
				Ok(Endpoint::BulkOut) => {
					if packet.endpoint != u8::from(Endpoint::BulkIn) {
						self.raise_error("wrong endpoint in the response");
						return self.latch_fatal(Err(ScardError::ReaderUnsupported));
					}
					let Some(bulk) = packet.header.bulk_in() else {
						self.raise_error("malformed bulk response");
						return self.latch_fatal(Err(ScardError::ReaderUnsupported));
					};
					if bulk.slot != slot || bulk.sequence != sequence {
						self.raise_error("wrong slot/sequence in the response");
						return self.latch_fatal(Err(ScardError::ReaderUnsupported));
					}

					let mut outcome = slot_status_outcome(bulk);
					if outcome == Err(ScardError::Timeout) {
						extensions += 1;
						if extensions <= TIME_EXTENSION_LIMIT {
							debug!("time extension {extensions}");
							continue;
						}
						// More than two minutes seems too much.
						outcome = Err(ScardError::WaitedTooLong);
					}
					self.next_sequence(slot);
					return self.latch_fatal(outcome);
				}
				_ => {
					self.raise_error("unsupported request endpoint");
					return self.latch_fatal(Err(ScardError::ReaderUnsupported));
				}
			}
		}
	}

	/// Receive the next slot-change notification, within `timeout_ms`.
	pub fn wait_interrupt(&mut self, packet: &mut Packet<'_>, timeout_ms: u64) -> Result<()> {
		if let Err(err) = self.receiver.recv(packet, timeout_ms) {
			self.raise_error("failed to receive a notification");
			return Err(err);
		}

		if packet.endpoint != u8::from(Endpoint::InterruptIn) {
			self.raise_error("wrong endpoint for a notification");
			return self.latch_fatal(Err(ScardError::ReaderUnsupported));
		}
		if packet.header.request != u8::from(Opcode::Interrupt) {
			self.raise_error("wrong opcode for a notification");
			return self.latch_fatal(Err(ScardError::ReaderUnsupported));
		}
		Ok(())
	}
}
