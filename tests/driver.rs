//! Lifecycle operations against a scripted device.

mod common;

use common::{CondvarWakeup, MockPort, control_in_header, frame};
use pcsc_serial::ccid::Receiver;
use pcsc_serial::{CcidDriver, Endpoint, Opcode, ScardError};

fn feed(receiver: &Receiver<CondvarWakeup>, bytes: &[u8]) {
	for &byte in bytes {
		receiver.push_byte(byte);
	}
}

#[test]
fn ping_round_trip() {
	let receiver = Receiver::new(CondvarWakeup::default());
	let mut driver = CcidDriver::new(MockPort::default(), &receiver);

	// GET_STATUS response: InStatus = 0x01, value and index echoed as 0.
	let header = control_in_header(u8::from(Opcode::GetStatus), 0, 0, 0, 0x01);
	let response = frame(Endpoint::ControlIn.into(), header, &[]);
	assert_eq!(*response.last().unwrap(), 0x81);
	feed(&receiver, &response);

	driver.ping().unwrap();
	assert!(driver.is_valid());

	// The request is a bare GET_STATUS control frame whose checksum is 0.
	assert_eq!(
		driver.port().sent,
		[0xCD, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
	);
}

#[test]
fn ping_rejects_a_mismatched_echo() {
	let receiver = Receiver::new(CondvarWakeup::default());
	let mut driver = CcidDriver::new(MockPort::default(), &receiver);

	// Value echoed as 1 instead of 0.
	let header = control_in_header(u8::from(Opcode::GetStatus), 0, 1, 0, 0x01);
	feed(&receiver, &frame(Endpoint::ControlIn.into(), header, &[]));

	assert_eq!(driver.ping(), Err(ScardError::ReaderUnsupported));
	assert!(!driver.is_valid());
}

#[test]
fn ping_times_out_without_a_device() {
	let receiver = Receiver::new(CondvarWakeup::default());
	let mut driver = CcidDriver::new(MockPort::default(), &receiver);

	assert_eq!(driver.ping(), Err(ScardError::Timeout));
	assert!(!driver.is_valid());
	// Further operations short-circuit until the driver is re-initialized.
	assert_eq!(driver.ping(), Err(ScardError::ReaderUnavailable));
}

#[test]
fn start_enables_the_configuration() {
	let receiver = Receiver::new(CondvarWakeup::default());
	let mut driver = CcidDriver::new(MockPort::default(), &receiver);
	driver.next_sequence(3);

	let header = control_in_header(u8::from(Opcode::SetConfiguration), 0, 1, 0, 0x01);
	feed(&receiver, &frame(Endpoint::ControlIn.into(), header, &[]));

	driver.start(true).unwrap();
	// Starting resets every slot to sequence 0.
	assert_eq!(driver.sequence(3), 0);
	// bOutOption rides in the last header byte of the request.
	assert_eq!(driver.port().sent[11], 0x01);
}

#[test]
fn start_rejects_a_refused_configuration() {
	let receiver = Receiver::new(CondvarWakeup::default());
	let mut driver = CcidDriver::new(MockPort::default(), &receiver);

	let header = control_in_header(u8::from(Opcode::SetConfiguration), 0, 1, 0, 0x00);
	feed(&receiver, &frame(Endpoint::ControlIn.into(), header, &[]));

	assert_eq!(driver.start(false), Err(ScardError::Unexpected));
	assert!(!driver.is_valid());
}

#[test]
fn stop_expects_a_cleared_status() {
	let receiver = Receiver::new(CondvarWakeup::default());
	let mut driver = CcidDriver::new(MockPort::default(), &receiver);

	let header = control_in_header(u8::from(Opcode::SetConfiguration), 0, 0, 0, 0x00);
	feed(&receiver, &frame(Endpoint::ControlIn.into(), header, &[]));
	driver.stop().unwrap();

	let header = control_in_header(u8::from(Opcode::SetConfiguration), 0, 0, 0, 0x01);
	feed(&receiver, &frame(Endpoint::ControlIn.into(), header, &[]));
	assert_eq!(driver.stop(), Err(ScardError::Unexpected));
}

#[test]
fn get_descriptor_returns_the_payload() {
	let receiver = Receiver::new(CondvarWakeup::default());
	let mut driver = CcidDriver::new(MockPort::default(), &receiver);

	// Device descriptor type 0x01, index 0: value echoes type in the low
	// byte.
	let descriptor = [0x12, 0x01, 0x00, 0x02];
	let header = control_in_header(
		u8::from(Opcode::GetDescriptor),
		descriptor.len() as u32,
		0x0001,
		0,
		0x00,
	);
	feed(&receiver, &frame(Endpoint::ControlIn.into(), header, &descriptor));

	let mut buf = [0u8; 64];
	let length = driver.get_descriptor(0x01, 0, &mut buf).unwrap();
	assert_eq!(length, descriptor.len() as u32);
	assert_eq!(buf[..descriptor.len()], descriptor);
}

#[test]
fn get_descriptor_rejects_a_device_error() {
	let receiver = Receiver::new(CondvarWakeup::default());
	let mut driver = CcidDriver::new(MockPort::default(), &receiver);

	let header = control_in_header(u8::from(Opcode::GetDescriptor), 0, 0x0001, 0, 0x01);
	feed(&receiver, &frame(Endpoint::ControlIn.into(), header, &[]));

	let mut buf = [0u8; 64];
	assert_eq!(
		driver.get_descriptor(0x01, 0, &mut buf),
		Err(ScardError::Unexpected)
	);
}
