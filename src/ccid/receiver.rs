//! Frame reassembly from the byte stream.
//!
//! [`Receiver::push_byte`] is fed one byte at a time from the producer
//! context (UART RX interrupt or reader thread) and never blocks. Complete
//! frames land in one of two fixed buffers; [`Receiver::recv`] blocks the
//! consumer on the wakeup signal and copies the frame out. The state byte
//! of each buffer arbitrates ownership between the two contexts: a release
//! store of `Ready` publishes the frame bytes, an acquire load on the
//! consumer side observes them.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use log::{debug, error, trace};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::ccid::packet::{Header, LENGTH_POS, Packet};
use crate::ccid::{HEADER_LEN, START_BYTE};
use crate::codec;
use crate::config::MAX_PAYLOAD_LEN;
use crate::error::{Result, ScardError};
use crate::hal::Wakeup;

const BUF_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
enum State {
	Idle = 0,
	RecvEndpoint,
	RecvHeader,
	RecvPayload,
	RecvChecksum,
	Ready,
	ErrProtocol,
	ErrOverflow,
	ErrChecksum,
	ErrOverrun,
	ErrUnexpected,
}

struct FrameData {
	endpoint: u8,
	/// Total number of bytes expected in `bytes` for the current frame.
	expected: usize,
	offset: usize,
	/// Running XOR over endpoint, header and payload bytes.
	checksum: u8,
	bytes: [u8; BUF_LEN],
}

impl FrameData {
	const fn new() -> Self {
		Self {
			endpoint: 0,
			expected: 0,
			offset: 0,
			checksum: 0,
			bytes: [0; BUF_LEN],
		}
	}

	fn reset(&mut self) {
		*self = Self::new();
	}
}

struct FrameBuf {
	state: AtomicU8,
	data: UnsafeCell<FrameData>,
}

impl FrameBuf {
	const fn new() -> Self {
		Self {
			state: AtomicU8::new(State::Idle as u8),
			data: UnsafeCell::new(FrameData::new()),
		}
	}

	fn state(&self) -> State {
		State::try_from(self.state.load(Ordering::Acquire)).unwrap_or(State::ErrUnexpected)
	}

	fn set_state(&self, state: State) {
		self.state.store(state.into(), Ordering::Release);
	}
}

/// Double-buffered frame receiver shared between the producer context and
/// the consumer thread.
///
/// The producer only ever touches the buffer selected by `push`, the
/// consumer the one selected by `pop`; a buffer changes sides through the
/// `Ready`/`Idle` transitions of its state byte. Once an error is latched
/// the producer drops every byte until the consumer has acknowledged the
/// error in [`recv`](Self::recv) and reset the receiver.
pub struct Receiver<W: Wakeup> {
	bufs: [FrameBuf; 2],
	push: AtomicU8,
	pop: AtomicU8,
	error: AtomicBool,
	wakeup: W,
}

// SAFETY: the per-buffer state byte arbitrates which side may access the
// frame data; every handoff is a release store observed by an acquire load.
unsafe impl<W: Wakeup> Sync for Receiver<W> {}

impl<W: Wakeup> Receiver<W> {
	pub const fn new(wakeup: W) -> Self {
		Self {
			bufs: [FrameBuf::new(), FrameBuf::new()],
			push: AtomicU8::new(0),
			pop: AtomicU8::new(0),
			error: AtomicBool::new(false),
			wakeup,
		}
	}

	/// The wakeup signal paired with this receiver, e.g. to interrupt a
	/// consumer blocked in [`recv`](Self::recv).
	pub fn wakeup(&self) -> &W {
		&self.wakeup
	}

	/// Return both buffers to `Idle` and clear the error latch.
	///
	/// Consumer-side. The producer is parked behind the error latch for
	/// the duration of the sweep; a producer preempted in the middle of
	/// [`push_byte`](Self::push_byte) when the sweep starts loses at most
	/// the frame it was assembling.
	pub fn reset(&self) {
		self.error.store(true, Ordering::Release);
		for buf in &self.bufs {
			// SAFETY: the producer drops every byte while the error latch
			// is set, leaving both buffers to us.
			unsafe { (*buf.data.get()).reset() };
			buf.set_state(State::Idle);
		}
		self.push.store(0, Ordering::Release);
		self.pop.store(0, Ordering::Relaxed);
		self.error.store(false, Ordering::Release);
	}

	/// Feed one byte received from the link.
	///
	/// Called from the producer context, including from an ISR; never
	/// blocks. Signals the wakeup once per complete frame and once per
	/// latched error.
	pub fn push_byte(&self, value: u8) {
		if self.error.load(Ordering::Acquire) {
			// Drop everything until the consumer acknowledges the error.
			return;
		}

		let index = usize::from(self.push.load(Ordering::Relaxed) & 1);
		let buf = &self.bufs[index];

		match buf.state() {
			State::Idle => {
				if value == START_BYTE {
					// SAFETY: an idle buffer belongs to the producer.
					unsafe { (*buf.data.get()).reset() };
					buf.set_state(State::RecvEndpoint);
				} else {
					trace!("byte {value:#04x} outside a frame");
					self.latch(buf, State::ErrProtocol);
				}
			}
			State::RecvEndpoint => {
				// SAFETY: a buffer in a receiving state belongs to the
				// producer.
				let data = unsafe { &mut *buf.data.get() };
				data.endpoint = value;
				data.checksum = value;
				data.expected = HEADER_LEN;
				data.offset = 0;
				buf.set_state(State::RecvHeader);
			}
			State::RecvHeader => {
				// SAFETY: as above.
				let data = unsafe { &mut *buf.data.get() };
				data.checksum ^= value;
				data.bytes[data.offset] = value;
				data.offset += 1;
				if data.offset >= HEADER_LEN {
					let length =
						codec::get_u32_le(&data.bytes[LENGTH_POS..LENGTH_POS + 4]) as usize;
					if length > MAX_PAYLOAD_LEN {
						self.latch(buf, State::ErrOverflow);
					} else if length > 0 {
						data.expected = HEADER_LEN + length;
						buf.set_state(State::RecvPayload);
					} else {
						buf.set_state(State::RecvChecksum);
					}
				}
			}
			State::RecvPayload => {
				// SAFETY: as above.
				let data = unsafe { &mut *buf.data.get() };
				data.checksum ^= value;
				data.bytes[data.offset] = value;
				data.offset += 1;
				if data.offset >= data.expected {
					buf.set_state(State::RecvChecksum);
				}
			}
			State::RecvChecksum => {
				// SAFETY: as above.
				let data = unsafe { &mut *buf.data.get() };
				data.checksum ^= value;
				if data.checksum == 0 {
					if self.bufs[index ^ 1].state() == State::Ready {
						// The previous frame has not been consumed yet;
						// this one is lost.
						error!("receive overrun, frame lost");
						self.latch(buf, State::ErrOverrun);
					} else {
						// The release store publishes the frame bytes.
						buf.set_state(State::Ready);
						self.push.store((index as u8) ^ 1, Ordering::Release);
						self.wakeup.signal();
					}
				} else {
					self.latch(buf, State::ErrChecksum);
				}
			}
			State::Ready => {
				error!("byte {value:#04x} while the frame is still unconsumed");
				self.latch(buf, State::ErrOverrun);
			}
			_ => {
				self.latch(buf, State::ErrUnexpected);
			}
		}
	}

	fn latch(&self, buf: &FrameBuf, state: State) {
		self.error.store(true, Ordering::Release);
		buf.set_state(state);
		self.wakeup.signal();
	}

	/// Retrieve the next received frame, blocking for at most `timeout_ms`
	/// milliseconds.
	///
	/// On success the endpoint tag and decoded header land in `packet` and
	/// the payload, if any, is copied into `packet.recv_payload`
	/// ([`ScardError::InsufficientBuffer`] if it does not fit; the frame is
	/// consumed either way). A latched receive error is translated to its
	/// precise cause and acknowledged by resetting the receiver.
	pub fn recv(&self, packet: &mut Packet<'_>, timeout_ms: u64) -> Result<()> {
		let index = usize::from(self.pop.load(Ordering::Relaxed) & 1);
		let buf = &self.bufs[index];

		self.wakeup.clear();
		if buf.state() != State::Ready {
			let signalled = self.wakeup.wait(timeout_ms);
			if !signalled
				&& buf.state() != State::Ready
				&& !self.error.load(Ordering::Acquire)
			{
				return Err(ScardError::Timeout);
			}
		}

		match buf.state() {
			State::Ready => {
				// SAFETY: a ready buffer belongs to the consumer until we
				// hand it back below.
				let data = unsafe { &*buf.data.get() };
				packet.endpoint = data.endpoint;
				packet.header = Header::from_wire(data.endpoint, &data.bytes[..HEADER_LEN]);

				let length = packet.header.length as usize;
				let mut outcome = Ok(());
				if length > 0 {
					match packet.recv_payload.as_deref_mut() {
						Some(out) if out.len() >= length => {
							out[..length]
								.copy_from_slice(&data.bytes[HEADER_LEN..HEADER_LEN + length]);
						}
						_ => outcome = Err(ScardError::InsufficientBuffer),
					}
				}
				trace!(
					"frame on endpoint {:#04x}, request {:#04x}, {length} payload byte(s)",
					packet.endpoint, packet.header.request
				);

				// Hand the buffer back to the producer and read the other
				// one next time.
				buf.set_state(State::Idle);
				self.pop.store((index as u8) ^ 1, Ordering::Relaxed);
				outcome
			}
			State::Idle
			| State::RecvEndpoint
			| State::RecvHeader
			| State::RecvPayload
			| State::RecvChecksum
				if !self.error.load(Ordering::Acquire) =>
			{
				// Woken with nothing to deliver; a frame may still be
				// assembling, so the buffers are left alone.
				Err(ScardError::NotReady)
			}
			state => {
				let outcome = match state {
					State::ErrProtocol => Err(ScardError::ReaderUnsupported),
					State::ErrChecksum => Err(ScardError::CommError),
					State::ErrOverflow => Err(ScardError::NoMemory),
					State::ErrOverrun => Err(ScardError::InternalError),
					State::ErrUnexpected => Err(ScardError::Unexpected),
					_ => Err(ScardError::UnknownError),
				};
				self.dump();
				self.reset();
				outcome
			}
		}
	}

	fn dump(&self) {
		debug!(
			"receiver error={} push={} pop={} states=[{:?}, {:?}]",
			self.error.load(Ordering::Relaxed),
			self.push.load(Ordering::Relaxed),
			self.pop.load(Ordering::Relaxed),
			self.bufs[0].state(),
			self.bufs[1].state(),
		);
	}
}
