//! A minimal in-memory Modbus RTU device standing in for real hardware,
//! grounded in the teacher's `MockModbusServer` (controllable fault
//! injection over a real transport), adapted from Modbus TCP framing to RTU
//! framing and from a bound TCP socket to an in-memory `tokio::io::duplex`
//! half.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const FN_READ_HOLDING: u8 = 0x03;
const FN_WRITE_HOLDING: u8 = 0x06;

/// How the mock should respond to the next matching request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Reply normally.
    None,
    /// Reply with a Modbus exception (illegal data address, code 0x02).
    Exception,
    /// Reply with an otherwise well-formed frame whose CRC is wrong.
    BadCrc,
    /// Don't reply at all; exercises the real bus's transaction timeout.
    NoReply,
}

struct State {
    registers: HashMap<u16, u16>,
    fault: Fault,
    fault_remaining: u32,
    requests_seen: u32,
}

/// A mock RTU device driving one half of an in-memory duplex.
#[derive(Clone)]
pub struct MockRtuDevice {
    state: Arc<Mutex<State>>,
}

impl MockRtuDevice {
    /// Spawn the device loop over `transport`, the mock's end of a
    /// `tokio::io::duplex` pair (the other end is handed to
    /// `SerialBus::from_transport`).
    pub fn spawn<T>(transport: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let state = Arc::new(Mutex::new(State {
            registers: HashMap::new(),
            fault: Fault::None,
            fault_remaining: 0,
            requests_seen: 0,
        }));
        tokio::spawn(run(transport, Arc::clone(&state)));
        Self { state }
    }

    /// Set a single holding register's raw value.
    pub fn set_register(&self, addr: u16, value: u16) {
        self.state.lock().unwrap().registers.insert(addr, value);
    }

    /// Set an IEEE-754 float value at `addr` through the vendor's
    /// `0x8000 + 2*addr` indirection, low word first, matching what
    /// `GenericDriver::read_floats` expects to unpack.
    pub fn set_float(&self, addr: u16, value: f32) {
        let bytes = value.to_ne_bytes();
        let lo = u16::from_ne_bytes([bytes[0], bytes[1]]);
        let hi = u16::from_ne_bytes([bytes[2], bytes[3]]);
        let float_addr = 0x8000 + 2 * addr;
        let mut state = self.state.lock().unwrap();
        state.registers.insert(float_addr, lo);
        state.registers.insert(float_addr + 1, hi);
    }

    /// Read back a raw holding register, e.g. to assert a driver write
    /// landed where expected.
    pub fn get_register(&self, addr: u16) -> Option<u16> {
        self.state.lock().unwrap().registers.get(&addr).copied()
    }

    /// Apply `fault` to the next `times` requests, then resume normal
    /// behaviour.
    pub fn inject_fault(&self, fault: Fault, times: u32) {
        let mut state = self.state.lock().unwrap();
        state.fault = fault;
        state.fault_remaining = times;
    }

    /// Total number of well-formed requests this device has parsed.
    pub fn requests_seen(&self) -> u32 {
        self.state.lock().unwrap().requests_seen
    }
}

async fn run<T>(mut transport: T, state: Arc<Mutex<State>>)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        // Every request this mock understands (read/write holding) is
        // exactly 8 bytes: unit, function, 2 address bytes, 2 data bytes, CRC.
        let mut frame = [0u8; 8];
        if transport.read_exact(&mut frame).await.is_err() {
            return;
        }
        let unit = frame[0];
        let function = frame[1];
        let register = u16::from_be_bytes([frame[2], frame[3]]);
        let arg = u16::from_be_bytes([frame[4], frame[5]]);

        let fault = {
            let mut s = state.lock().unwrap();
            s.requests_seen += 1;
            if s.fault_remaining > 0 {
                s.fault_remaining -= 1;
                s.fault
            } else {
                Fault::None
            }
        };

        if fault == Fault::NoReply {
            continue;
        }

        let mut response = if fault == Fault::Exception {
            vec![unit, function | 0x80, 0x02]
        } else {
            match function {
                FN_READ_HOLDING => {
                    let count = arg;
                    let mut body = vec![unit, function, (2 * count) as u8];
                    let s = state.lock().unwrap();
                    for i in 0..count {
                        let value = s.registers.get(&(register + i)).copied().unwrap_or(0);
                        body.extend_from_slice(&value.to_be_bytes());
                    }
                    body
                }
                FN_WRITE_HOLDING => {
                    state.lock().unwrap().registers.insert(register, arg);
                    vec![unit, function, frame[2], frame[3], frame[4], frame[5]]
                }
                other => vec![unit, other | 0x80, 0x01],
            }
        };

        let crc = crc16(&response);
        if fault == Fault::BadCrc {
            response.push(((crc & 0xff) as u8) ^ 0xFF);
            response.push((crc >> 8) as u8);
        } else {
            response.extend_from_slice(&crc.to_le_bytes());
        }

        if transport.write_all(&response).await.is_err() {
            return;
        }
    }
}

/// CRC-16/MODBUS, duplicated from `eurotherm_fieldbus::bus`'s private
/// implementation since this mock is a separate crate and deliberately
/// doesn't depend on the production codec it is testing against.
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
