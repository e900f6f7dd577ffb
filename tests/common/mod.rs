//! Test doubles standing in for the platform HAL: an in-memory serial
//! port, a condition-variable wakeup, and wire-frame builders.

#![allow(dead_code)]

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use pcsc_serial::ccid::{HEADER_LEN, START_BYTE};
use pcsc_serial::{SerialPort, Wakeup};

/// Serial port that records everything the driver sends.
#[derive(Default)]
pub struct MockPort {
	pub sent: Vec<u8>,
	pub closed: bool,
}

impl SerialPort for MockPort {
	fn open(&mut self) -> bool {
		self.closed = false;
		true
	}

	fn close(&mut self) {
		self.closed = true;
	}

	fn is_open(&self) -> bool {
		!self.closed
	}

	fn send_byte(&mut self, value: u8) -> bool {
		self.sent.push(value);
		true
	}

	fn send_bytes(&mut self, buf: &[u8]) -> bool {
		self.sent.extend_from_slice(buf);
		true
	}
}

/// Condition-variable wakeup, the shape a hosted OS integration takes.
#[derive(Default)]
pub struct CondvarWakeup {
	flag: Mutex<bool>,
	cond: Condvar,
}

impl CondvarWakeup {
	/// Whether the consumer has re-armed the signal, i.e. entered its next
	/// receive.
	pub fn is_cleared(&self) -> bool {
		!*self.flag.lock().unwrap()
	}
}

impl Wakeup for CondvarWakeup {
	fn signal(&self) {
		let mut flag = self.flag.lock().unwrap();
		*flag = true;
		self.cond.notify_one();
	}

	fn clear(&self) {
		*self.flag.lock().unwrap() = false;
	}

	fn wait(&self, timeout_ms: u64) -> bool {
		let deadline = Instant::now() + Duration::from_millis(timeout_ms);
		let mut flag = self.flag.lock().unwrap();
		while !*flag {
			let now = Instant::now();
			if now >= deadline {
				return false;
			}
			let (guard, _) = self.cond.wait_timeout(flag, deadline - now).unwrap();
			flag = guard;
		}
		true
	}
}

/// Assemble a complete wire frame: start byte, endpoint, header, payload
/// and the XOR checksum.
pub fn frame(endpoint: u8, header: [u8; HEADER_LEN], payload: &[u8]) -> Vec<u8> {
	let mut bytes = vec![START_BYTE, endpoint];
	bytes.extend_from_slice(&header);
	bytes.extend_from_slice(payload);
	let checksum = bytes[1..].iter().fold(0u8, |acc, b| acc ^ b);
	bytes.push(checksum);
	bytes
}

/// Header of a control-in response echoing `value` and `index`.
pub fn control_in_header(request: u8, length: u32, value: u16, index: u16, in_status: u8) -> [u8; HEADER_LEN] {
	let mut header = [0u8; HEADER_LEN];
	header[0] = request;
	header[1..5].copy_from_slice(&length.to_le_bytes());
	header[5..7].copy_from_slice(&value.to_le_bytes());
	header[7..9].copy_from_slice(&index.to_le_bytes());
	header[9] = in_status;
	header
}

/// Header of a bulk-in response for `slot`/`sequence`.
pub fn bulk_in_header(
	request: u8,
	length: u32,
	slot: u8,
	sequence: u8,
	slot_status: u8,
	slot_error: u8,
) -> [u8; HEADER_LEN] {
	let mut header = [0u8; HEADER_LEN];
	header[0] = request;
	header[1..5].copy_from_slice(&length.to_le_bytes());
	header[5] = slot;
	header[6] = sequence;
	header[7] = slot_status;
	header[8] = slot_error;
	header
}

/// Header of a slot-change notification.
pub fn interrupt_header(request: u8, length: u32) -> [u8; HEADER_LEN] {
	let mut header = [0u8; HEADER_LEN];
	header[0] = request;
	header[1..5].copy_from_slice(&length.to_le_bytes());
	header
}
