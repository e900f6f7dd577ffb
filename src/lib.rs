//! Host-side driver for CCID smart-card couplers reached over a serial
//! link.
//!
//! The coupler is a USB/CCID device whose endpoints are flattened onto a
//! single framed byte stream (typically a UART). Two execution contexts
//! cooperate around this crate:
//!
//! - a *producer* (UART RX interrupt or reader thread) feeds every
//!   received byte to [`Receiver::push_byte`];
//! - a *consumer* thread drives the [`CcidDriver`]: lifecycle
//!   ([`ping`](CcidDriver::ping), [`start`](CcidDriver::start),
//!   [`stop`](CcidDriver::stop), descriptors) and the PC/SC-style
//!   operations ([`status`](CcidDriver::status),
//!   [`connect`](CcidDriver::connect), [`transmit`](CcidDriver::transmit),
//!   [`control`](CcidDriver::control),
//!   [`get_status_change`](CcidDriver::get_status_change)).
//!
//! The platform supplies the [`SerialPort`] transmit path and a [`Wakeup`]
//! signal pairing the two contexts; everything else, including the frame
//! buffers, lives in this crate without dynamic allocation.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod ccid;
pub mod codec;
pub mod config;
pub mod error;
pub mod hal;
pub mod scard;

pub use self::ccid::{CcidDriver, Endpoint, Opcode, Packet, Receiver};
pub use self::error::{Result, ScardError};
pub use self::hal::{SerialPort, SpinWakeup, Wakeup};
pub use self::scard::{SlotState, StatusChange};
