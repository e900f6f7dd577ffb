//! Contracts the driver consumes from the platform.
//!
//! The driver never opens a UART or parks a thread itself. The integrator
//! provides a [`SerialPort`] for the transmit path and wires the receive
//! path (UART RX interrupt or reader thread) to
//! [`Receiver::push_byte`](crate::ccid::Receiver::push_byte). A [`Wakeup`]
//! pairs the two: the producer context signals it once per complete frame
//! and the consumer blocks on it with a timeout.

use core::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::Backoff;

/// Byte transport towards the coupler.
///
/// `send_byte` and `send_bytes` are synchronous and may block the caller;
/// they return `false` on any partial write.
pub trait SerialPort {
	fn open(&mut self) -> bool;
	fn close(&mut self);
	fn is_open(&self) -> bool;
	fn send_byte(&mut self, value: u8) -> bool;
	fn send_bytes(&mut self, buf: &[u8]) -> bool;
}

/// One-slot signal from the producer context to the blocked consumer.
///
/// `wait` must return no later than `timeout_ms` milliseconds after the
/// call, granularity permitting. Implementations map onto a condition
/// variable on a hosted OS or a polled flag on bare metal.
pub trait Wakeup: Sync {
	/// Producer side; must be callable from interrupt context.
	fn signal(&self);
	/// Consumer-side reset, called before starting to wait.
	fn clear(&self);
	/// Block until signalled. Returns `true` on a signal, `false` once
	/// `timeout_ms` milliseconds have elapsed without one.
	fn wait(&self, timeout_ms: u64) -> bool;
}

/// Polled-flag [`Wakeup`] for targets without an OS.
///
/// The caller supplies a monotonic millisecond clock. The wait loop backs
/// off between polls instead of hammering the flag.
pub struct SpinWakeup {
	flag: AtomicBool,
	now_ms: fn() -> u64,
}

impl SpinWakeup {
	pub const fn new(now_ms: fn() -> u64) -> Self {
		Self {
			flag: AtomicBool::new(false),
			now_ms,
		}
	}
}

impl Wakeup for SpinWakeup {
	fn signal(&self) {
		self.flag.store(true, Ordering::Release);
	}

	fn clear(&self) {
		self.flag.store(false, Ordering::Release);
	}

	fn wait(&self, timeout_ms: u64) -> bool {
		let deadline = (self.now_ms)().saturating_add(timeout_ms);
		let backoff = Backoff::new();
		loop {
			if self.flag.load(Ordering::Acquire) {
				return true;
			}
			if (self.now_ms)() >= deadline {
				return false;
			}
			backoff.snooze();
		}
	}
}
