//! The CCID-over-serial driver core.
//!
//! The coupler speaks the USB/CCID message set, flattened onto a single
//! byte stream: every frame carries the endpoint tag it would have
//! travelled on, a fixed header, an optional payload and an XOR checksum.
//! This module owns frame (re)assembly, the matched request/response
//! engine and the lifecycle surface; the PC/SC-style operations above it
//! live in [`crate::scard`].

mod exchange;
mod packet;
mod receiver;
mod sender;

use log::{error, warn};
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub use self::packet::{BulkIn, BulkOut, Control, Header, HeaderData, Packet};
pub use self::receiver::Receiver;
use crate::config::CONTROL_TIMEOUT_MS;
use crate::error::{Result, ScardError};
use crate::hal::{SerialPort, Wakeup};

/// Every frame on the link opens with this byte.
pub const START_BYTE: u8 = 0xCD;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 10;

/// Endpoint tags, naming the USB endpoint a frame would have travelled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Endpoint {
	ControlOut = 0x00,
	ControlIn = 0x80,
	BulkOut = 0x02,
	BulkIn = 0x81,
	InterruptIn = 0x83,
}

/// Frame opcodes: USB standard requests, CCID commands and CCID responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum Opcode {
	GetStatus = 0x00,
	GetDescriptor = 0x06,
	SetConfiguration = 0x09,
	IccPowerOn = 0x62,
	IccPowerOff = 0x63,
	GetSlotStatus = 0x65,
	Escape = 0x6B,
	XfrBlock = 0x6F,
	Interrupt = 0x50,
	DataBlock = 0x80,
	SlotStatus = 0x81,
	EscapeResponse = 0x83,
}

/// The driver: one serial-attached coupler, one consumer thread.
///
/// Owns the transmit path and the per-slot sequence table; shares the
/// [`Receiver`] with the producer context that feeds
/// [`Receiver::push_byte`]. All operations are `&mut self`: concurrent
/// clients are not a supported mode.
pub struct CcidDriver<'r, P: SerialPort, W: Wakeup> {
	port: P,
	receiver: &'r Receiver<W>,
	sequences: [u8; crate::config::MAX_SLOT_COUNT],
	valid: bool,
	cancelled_hook: Option<fn() -> bool>,
}

impl<'r, P: SerialPort, W: Wakeup> CcidDriver<'r, P, W> {
	/// Take ownership of an opened `port` and attach to the `receiver` the
	/// platform feeds with received bytes.
	pub fn new(port: P, receiver: &'r Receiver<W>) -> Self {
		let mut driver = Self {
			port,
			receiver,
			sequences: [0; crate::config::MAX_SLOT_COUNT],
			valid: false,
			cancelled_hook: None,
		};
		driver.init();
		driver
	}

	/// Reset the receive state machine and mark the driver operational.
	pub fn init(&mut self) {
		self.receiver.reset();
		self.valid = true;
	}

	/// Install a hook polled by [`is_valid`](Self::is_valid); returning
	/// `true` latches the driver invalid so the next operation
	/// short-circuits.
	pub fn set_cancelled_hook(&mut self, hook: fn() -> bool) {
		self.cancelled_hook = Some(hook);
	}

	/// Whether the driver is up and running: no fatal error latched, not
	/// cancelled, serial port still open.
	pub fn is_valid(&mut self) -> bool {
		if self.valid {
			if self.cancelled_hook.is_some_and(|cancelled| cancelled()) {
				warn!("operation cancelled by the user");
				self.valid = false;
			}
			if !self.port.is_open() {
				warn!("serial port is no longer open");
				self.valid = false;
			}
		}
		self.valid
	}

	pub fn port(&self) -> &P {
		&self.port
	}

	pub fn port_mut(&mut self) -> &mut P {
		&mut self.port
	}

	pub(crate) fn ensure_valid(&mut self) -> Result<()> {
		if self.is_valid() {
			Ok(())
		} else {
			Err(ScardError::ReaderUnavailable)
		}
	}

	pub(crate) fn raise_error(&mut self, msg: &str) {
		error!("driver error: {msg}");
		self.valid = false;
	}

	/// Latch the driver invalid when returning a fatal error; card
	/// warnings pass through untouched.
	pub(crate) fn fatal(&mut self, err: ScardError) -> ScardError {
		if err.is_fatal() {
			self.valid = false;
		}
		err
	}

	/// [`fatal`](Self::fatal) lifted over outcomes.
	pub(crate) fn latch_fatal(&mut self, outcome: Result<()>) -> Result<()> {
		outcome.map_err(|err| self.fatal(err))
	}

	/// Probe the device with a `GET_STATUS` control exchange.
	pub fn ping(&mut self) -> Result<()> {
		self.ensure_valid()?;
		let mut packet = Packet::control(Opcode::GetStatus);
		self.exchange(&mut packet, CONTROL_TIMEOUT_MS)
	}

	/// Activate PC/SC operation in the device, with or without the
	/// notification endpoint, and restart every slot at sequence 0.
	pub fn start(&mut self, use_interrupts: bool) -> Result<()> {
		self.ensure_valid()?;
		let mut packet = Packet::control(Opcode::SetConfiguration);
		if let HeaderData::Control(control) = &mut packet.header.data {
			control.value = 1;
			control.index = 0;
			control.in_out = u8::from(use_interrupts);
		}

		let mut outcome = self.exchange(&mut packet, CONTROL_TIMEOUT_MS);
		if outcome.is_ok() {
			match packet.header.control() {
				Some(control) if control.in_out == 0x01 => {}
				_ => outcome = self.latch_fatal(Err(ScardError::Unexpected)),
			}
		}

		self.reset_sequences();
		outcome
	}

	/// Disable PC/SC operation in the device.
	pub fn stop(&mut self) -> Result<()> {
		self.ensure_valid()?;
		let mut packet = Packet::control(Opcode::SetConfiguration);
		if let HeaderData::Control(control) = &mut packet.header.data {
			control.value = 0;
			control.index = 0;
			control.in_out = 0;
		}

		let outcome = self.exchange(&mut packet, CONTROL_TIMEOUT_MS);
		if outcome.is_ok() {
			match packet.header.control() {
				Some(control) if control.in_out == 0x00 => {}
				_ => return self.latch_fatal(Err(ScardError::Unexpected)),
			}
		}
		outcome
	}

	/// Read a USB descriptor from the device into `descriptor`; returns
	/// the descriptor length.
	pub fn get_descriptor(
		&mut self,
		desc_type: u8,
		desc_index: u8,
		descriptor: &mut [u8],
	) -> Result<u32> {
		self.ensure_valid()?;
		let mut packet = Packet::control(Opcode::GetDescriptor);
		if let HeaderData::Control(control) = &mut packet.header.data {
			// Descriptor type in the low byte, index in the high byte.
			control.value = u16::from_le_bytes([desc_type, desc_index]);
		}
		packet.recv_payload = Some(descriptor);

		self.exchange(&mut packet, CONTROL_TIMEOUT_MS)?;
		let status_ok = matches!(packet.header.control(), Some(control) if control.in_out == 0x00);
		if !status_ok {
			self.latch_fatal(Err(ScardError::Unexpected))?;
		}
		Ok(packet.header.length)
	}
}
