//! PC/SC-style operations on top of the CCID exchange engine.
//!
//! The prototypes are not those of the PC/SC standard, but each operation
//! provides the same feature: slot status, card power on/off, APDU
//! pass-through, vendor escape, and slot-change notifications. Card-related
//! outcomes come back as warnings and leave the driver operational; fatal
//! outcomes latch it invalid.

use log::debug;

use crate::ccid::{CcidDriver, Opcode, Packet};
use crate::config::{BULK_TIMEOUT_MS, MAX_INTERRUPT_PAYLOAD_LEN, MAX_PAYLOAD_LEN};
use crate::error::{Result, ScardError};
use crate::hal::{SerialPort, Wakeup};

/// Presence and power state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotState {
	pub present: bool,
	pub powered: bool,
}

/// Slot bitmaps decoded from a slot-change notification: one bit per slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusChange {
	pub present: u32,
	pub changed: u32,
}

/// Decode a notification payload: bit `2k` of the stream is "card present
/// in slot k", bit `2k + 1` is "slot k changed", packed little-endian, so
/// up to 16 slots in 4 bytes.
fn decode_slot_bits(payload: &[u8]) -> StatusChange {
	let mut bits = StatusChange::default();
	for (i, &byte) in payload.iter().take(MAX_INTERRUPT_PAYLOAD_LEN).enumerate() {
		for pair in 0..4 {
			let slot = i * 4 + pair;
			if byte & (1 << (2 * pair)) != 0 {
				bits.present |= 1 << slot;
			}
			if byte & (1 << (2 * pair + 1)) != 0 {
				bits.changed |= 1 << slot;
			}
		}
	}
	bits
}

impl<P: SerialPort, W: Wakeup> CcidDriver<'_, P, W> {
	/// Whether a card is in `slot` and whether it is powered.
	///
	/// There is no need to loop over `status` to wait for an insertion;
	/// looping over [`connect`](Self::connect) is more efficient since it
	/// returns the ATR at once. Looping over `status` is useful to wait
	/// for removal after [`disconnect`](Self::disconnect).
	pub fn status(&mut self, slot: u8) -> Result<SlotState> {
		self.ensure_valid()?;
		let mut packet = Packet::bulk_out(Opcode::GetSlotStatus, slot, self.sequence(slot));

		let outcome = self.exchange(&mut packet, BULK_TIMEOUT_MS);
		if let Err(err) = outcome {
			if err.is_fatal() {
				return Err(err);
			}
		}

		if packet.header.request != u8::from(Opcode::SlotStatus) {
			self.raise_error("wrong opcode in the slot-status response");
			return Err(ScardError::ReaderUnsupported);
		}
		let Some(bulk) = packet.header.bulk_in() else {
			self.raise_error("malformed slot-status response");
			return Err(ScardError::ReaderUnsupported);
		};
		match bulk.slot_status & 0x03 {
			0x00 => Ok(SlotState {
				present: true,
				powered: true,
			}),
			0x01 => Ok(SlotState {
				present: true,
				powered: false,
			}),
			0x02 => Ok(SlotState {
				present: false,
				powered: false,
			}),
			_ => {
				self.raise_error("wrong status value in the slot-status response");
				Err(ScardError::ReaderUnsupported)
			}
		}
	}

	/// Power on the card in `slot` and copy its ATR into `atr`; returns
	/// the ATR length.
	pub fn connect(&mut self, slot: u8, atr: &mut [u8]) -> Result<u32> {
		self.ensure_valid()?;
		let mut packet = Packet::bulk_out(Opcode::IccPowerOn, slot, self.sequence(slot));
		packet.recv_payload = Some(atr);

		self.exchange(&mut packet, BULK_TIMEOUT_MS)?;
		if packet.header.request != u8::from(Opcode::DataBlock) {
			return Err(self.fatal(ScardError::ReaderUnsupported));
		}
		Ok(packet.header.length)
	}

	/// Power off the card in `slot`. A card that is already mute, gone or
	/// unsupported counts as success: it is unpowered either way.
	pub fn disconnect(&mut self, slot: u8) -> Result<()> {
		self.ensure_valid()?;
		let mut packet = Packet::bulk_out(Opcode::IccPowerOff, slot, self.sequence(slot));

		match self.exchange(&mut packet, BULK_TIMEOUT_MS) {
			Err(
				ScardError::UnsupportedCard
				| ScardError::UnresponsiveCard
				| ScardError::RemovedCard,
			) => Ok(()),
			outcome => outcome,
		}
	}

	/// Send a command APDU to the card in `slot` and copy the response
	/// APDU into `response`; returns the response length.
	pub fn transmit(&mut self, slot: u8, apdu: &[u8], response: &mut [u8]) -> Result<u32> {
		self.ensure_valid()?;
		if apdu.len() > MAX_PAYLOAD_LEN {
			return Err(ScardError::NoMemory);
		}

		let mut packet = Packet::bulk_out(Opcode::XfrBlock, slot, self.sequence(slot));
		packet.header.length = apdu.len() as u32;
		packet.send_payload = Some(apdu);
		packet.recv_payload = Some(response);

		match self.exchange(&mut packet, BULK_TIMEOUT_MS) {
			Ok(()) => Ok(packet.header.length),
			Err(
				ScardError::UnsupportedCard
				| ScardError::UnresponsiveCard
				| ScardError::UnpoweredCard
				| ScardError::ResetCard,
			) => Err(ScardError::RemovedCard),
			Err(err) => Err(err),
		}
	}

	/// Send a vendor escape command to the coupler itself; returns the
	/// response length.
	///
	/// Without a `response` buffer the device may still answer with a
	/// single status byte; a non-zero one is reported as
	/// [`ScardError::UnknownError`].
	pub fn control(&mut self, command: &[u8], response: Option<&mut [u8]>) -> Result<u32> {
		self.ensure_valid()?;
		if command.len() > MAX_PAYLOAD_LEN {
			return Err(ScardError::NoMemory);
		}

		let mut status_byte = [0u8; 1];
		let has_response = response.is_some();
		let mut packet = Packet::bulk_out(Opcode::Escape, 0, 0);
		packet.header.length = command.len() as u32;
		packet.send_payload = Some(command);
		packet.recv_payload = match response {
			Some(buf) => Some(buf),
			None => Some(&mut status_byte),
		};

		let outcome = self.exchange(&mut packet, BULK_TIMEOUT_MS);
		let request = packet.header.request;
		let length = packet.header.length;

		if let Err(err) = outcome {
			if err.is_fatal() {
				return Err(err);
			}
		}

		if request != u8::from(Opcode::EscapeResponse) {
			return Err(self.fatal(ScardError::ReaderUnsupported));
		}
		if !has_response && length > 0 && status_byte[0] != 0 {
			// The device has returned an error.
			return Err(self.fatal(ScardError::UnknownError));
		}
		Ok(length)
	}

	/// Read the number of slots of the device.
	///
	/// Answered by the device itself through an escape command: cheaper
	/// than fetching and parsing the descriptors.
	pub fn get_slot_count(&mut self) -> Result<u8> {
		const GET_SLOT_COUNT: [u8; 3] = [0x58, 0x20, 0x80];

		let mut reply = [0u8; 2];
		let length = self.control(&GET_SLOT_COUNT, Some(&mut reply))?;
		if length < 2 || reply[0] != 0x00 {
			return Err(self.fatal(ScardError::ReaderUnsupported));
		}
		Ok(reply[1])
	}

	/// Wait for the next slot-change notification and decode which slots
	/// hold a card and which changed.
	///
	/// Only meaningful when the notification endpoint was enabled in
	/// [`start`](Self::start).
	pub fn get_status_change_ex(&mut self, timeout_ms: u64) -> Result<StatusChange> {
		self.ensure_valid()?;
		let mut payload = [0u8; MAX_INTERRUPT_PAYLOAD_LEN];
		let mut packet = Packet::new();
		packet.recv_payload = Some(&mut payload);

		self.wait_interrupt(&mut packet, timeout_ms)?;

		let length = (packet.header.length as usize).min(MAX_INTERRUPT_PAYLOAD_LEN);
		let bits = decode_slot_bits(&payload[..length]);
		debug!(
			"slots present {:#010x}, changed {:#010x}",
			bits.present, bits.changed
		);
		Ok(bits)
	}

	/// Wait for the next slot-change notification, discarding its content.
	pub fn get_status_change(&mut self, timeout_ms: u64) -> Result<()> {
		self.get_status_change_ex(timeout_ms).map(|_| ())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn slot_bits_come_in_pairs() {
		let bits = decode_slot_bits(&[0x02, 0x00]);
		assert_eq!(bits.present, 0);
		assert_eq!(bits.changed, 0x0000_0001);

		let bits = decode_slot_bits(&[0x01]);
		assert_eq!(bits.present, 0x0000_0001);
		assert_eq!(bits.changed, 0);

		let bits = decode_slot_bits(&[0x0B]);
		assert_eq!(bits.present, 0b01);
		assert_eq!(bits.changed, 0b11);
	}

	#[test]
	fn sixteen_slots_fit_in_four_bytes() {
		let bits = decode_slot_bits(&[0xFF; 4]);
		assert_eq!(bits.present, 0x0000_FFFF);
		assert_eq!(bits.changed, 0x0000_FFFF);
	}

	#[test]
	fn extra_payload_bytes_are_ignored() {
		let bits = decode_slot_bits(&[0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF]);
		assert_eq!(bits, StatusChange::default());
	}

	#[test]
	fn empty_payload_decodes_to_nothing() {
		assert_eq!(decode_slot_bits(&[]), StatusChange::default());
	}
}
