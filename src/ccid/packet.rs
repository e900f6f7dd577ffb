//! The in-memory shape of a frame.
//!
//! On the wire every frame carries the same fixed 10-byte header; which of
//! its trailing bytes mean what depends on the endpoint the frame travels
//! on. The header is kept as a tagged variant here and flattened to the
//! wire layout only at the transmit/receive boundary.

use crate::ccid::{Endpoint, HEADER_LEN, Opcode};
use crate::codec;

/// Position of the little-endian payload length inside the wire header.
pub(crate) const LENGTH_POS: usize = 1;

/// Trailing header bytes of a control frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Control {
	pub value: u16,
	pub index: u16,
	/// `bOutOption` on the way out, `bInStatus` on the way back.
	pub in_out: u8,
}

/// Trailing header bytes of a host-to-device bulk frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOut {
	pub slot: u8,
	pub sequence: u8,
	pub param1: u8,
	pub param2: u8,
	pub param3: u8,
}

/// Trailing header bytes of a device-to-host bulk frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkIn {
	pub slot: u8,
	pub sequence: u8,
	pub slot_status: u8,
	pub slot_error: u8,
	pub status_or_rfu: u8,
}

/// The endpoint-dependent view of the trailing header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderData {
	Control(Control),
	BulkOut(BulkOut),
	BulkIn(BulkIn),
}

/// The fixed frame header: opcode, payload length and the trailing bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
	pub request: u8,
	pub length: u32,
	pub data: HeaderData,
}

impl Header {
	/// Flatten to the 10-byte wire layout. Multi-byte fields go out
	/// little-endian.
	pub(crate) fn to_wire(&self) -> [u8; HEADER_LEN] {
		let mut raw = [0u8; HEADER_LEN];
		raw[0] = self.request;
		codec::put_u32_le(&mut raw[LENGTH_POS..LENGTH_POS + 4], self.length);
		match self.data {
			HeaderData::Control(control) => {
				codec::put_u16_le(&mut raw[5..7], control.value);
				codec::put_u16_le(&mut raw[7..9], control.index);
				raw[9] = control.in_out;
			}
			HeaderData::BulkOut(bulk) => {
				raw[5] = bulk.slot;
				raw[6] = bulk.sequence;
				raw[7] = bulk.param1;
				raw[8] = bulk.param2;
				raw[9] = bulk.param3;
			}
			HeaderData::BulkIn(bulk) => {
				raw[5] = bulk.slot;
				raw[6] = bulk.sequence;
				raw[7] = bulk.slot_status;
				raw[8] = bulk.slot_error;
				raw[9] = bulk.status_or_rfu;
			}
		}
		raw
	}

	/// Rebuild the tagged view from a received wire header. The variant is
	/// keyed on the endpoint the frame arrived on; frames on unknown or
	/// notification endpoints keep the device-to-host bulk view, whose
	/// fields are never interpreted for them.
	pub(crate) fn from_wire(endpoint: u8, raw: &[u8]) -> Self {
		let data = match Endpoint::try_from(endpoint) {
			Ok(Endpoint::ControlOut | Endpoint::ControlIn) => HeaderData::Control(Control {
				value: codec::get_u16_le(&raw[5..7]),
				index: codec::get_u16_le(&raw[7..9]),
				in_out: raw[9],
			}),
			Ok(Endpoint::BulkOut) => HeaderData::BulkOut(BulkOut {
				slot: raw[5],
				sequence: raw[6],
				param1: raw[7],
				param2: raw[8],
				param3: raw[9],
			}),
			_ => HeaderData::BulkIn(BulkIn {
				slot: raw[5],
				sequence: raw[6],
				slot_status: raw[7],
				slot_error: raw[8],
				status_or_rfu: raw[9],
			}),
		};
		Self {
			request: raw[0],
			length: codec::get_u32_le(&raw[LENGTH_POS..LENGTH_POS + 4]),
			data,
		}
	}

	pub fn control(&self) -> Option<&Control> {
		match &self.data {
			HeaderData::Control(control) => Some(control),
			_ => None,
		}
	}

	pub fn bulk_in(&self) -> Option<&BulkIn> {
		match &self.data {
			HeaderData::BulkIn(bulk) => Some(bulk),
			_ => None,
		}
	}
}

/// A packet under construction or decode.
///
/// The payloads are borrowed from the caller: the send payload is read-only
/// and sent verbatim after the header, the receive payload is filled with
/// the decoded payload of the matched response and its length published in
/// `header.length`.
pub struct Packet<'a> {
	/// Raw endpoint tag; see [`Endpoint`].
	pub endpoint: u8,
	pub header: Header,
	pub send_payload: Option<&'a [u8]>,
	pub recv_payload: Option<&'a mut [u8]>,
}

impl<'a> Packet<'a> {
	/// A zeroed packet, to be filled by a receive operation.
	pub fn new() -> Self {
		Self::control(Opcode::GetStatus)
	}

	/// A fresh control-out packet for `request`.
	pub fn control(request: Opcode) -> Self {
		Self {
			endpoint: Endpoint::ControlOut.into(),
			header: Header {
				request: request.into(),
				length: 0,
				data: HeaderData::Control(Control::default()),
			},
			send_payload: None,
			recv_payload: None,
		}
	}

	/// A fresh bulk-out packet for `request`, addressed to `slot` and
	/// stamped with that slot's current `sequence`.
	pub fn bulk_out(request: Opcode, slot: u8, sequence: u8) -> Self {
		Self {
			endpoint: Endpoint::BulkOut.into(),
			header: Header {
				request: request.into(),
				length: 0,
				data: HeaderData::BulkOut(BulkOut {
					slot,
					sequence,
					..BulkOut::default()
				}),
			},
			send_payload: None,
			recv_payload: None,
		}
	}
}

impl Default for Packet<'_> {
	fn default() -> Self {
		Self::new()
	}
}
