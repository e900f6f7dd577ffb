//! Frame serialization towards the coupler.

use log::trace;

use crate::ccid::{Packet, START_BYTE};
use crate::error::{Result, ScardError};
use crate::hal::SerialPort;

/// Serialize `packet` and push it down the port.
///
/// The wire order is start byte, endpoint tag, the 10 header bytes with all
/// integer fields little-endian, the payload if any, and the XOR checksum
/// over everything but the start byte. Any transport failure aborts the
/// frame immediately; there is no partial retry.
pub fn send<P: SerialPort>(port: &mut P, packet: &Packet<'_>) -> Result<()> {
	let length = packet.header.length as usize;
	let payload = match packet.send_payload {
		Some(payload) => {
			if payload.len() != length {
				return Err(ScardError::InvalidParameter);
			}
			payload
		}
		None => {
			if length != 0 {
				return Err(ScardError::InvalidParameter);
			}
			&[]
		}
	};

	let header = packet.header.to_wire();
	let mut checksum = packet.endpoint;
	for byte in header.iter().chain(payload) {
		checksum ^= byte;
	}

	trace!(
		"sending endpoint {:#04x}, request {:#04x}, {length} payload byte(s)",
		packet.endpoint, packet.header.request
	);

	if !port.send_byte(START_BYTE)
		|| !port.send_byte(packet.endpoint)
		|| !port.send_bytes(&header)
		|| (!payload.is_empty() && !port.send_bytes(payload))
		|| !port.send_byte(checksum)
	{
		return Err(ScardError::CommError);
	}

	Ok(())
}
