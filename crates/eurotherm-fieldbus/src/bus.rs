//! `SerialBus` — exclusive, serialised access to one Modbus RTU port.
//!
//! A process-wide registry keys buses by port name so that devices sharing
//! a physical port share one actor; `SerialBus::open` is idempotent.
//! Requests are serialised onto a single background task via a bounded
//! `mpsc` channel, which is the FIFO point spec.md §5 requires: callers may
//! invoke `read_holding`/`write_holding` concurrently from many tasks, but
//! only one transaction is ever in flight on the wire.

use eurotherm_common::{EurothermError, EurothermResult};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// How long a single request/response transaction may take before the bus
/// gives up and reports a `BusError`. Driver-level retry (§4.2) happens on
/// top of this, not inside it.
const TRANSACTION_TIMEOUT: Duration = Duration::from_millis(300);

type Transport = dyn AsyncReadWrite + Send;

trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin {}
impl<T: AsyncRead + AsyncWrite + Unpin> AsyncReadWrite for T {}

enum BusRequest {
    ReadHolding {
        unit: u8,
        register: u16,
        count: u16,
        reply: oneshot::Sender<EurothermResult<Vec<u16>>>,
    },
    WriteHolding {
        unit: u8,
        register: u16,
        value: u16,
        reply: oneshot::Sender<EurothermResult<()>>,
    },
}

/// A cheap, cloneable handle onto a background actor owning one serial
/// port. Construct via [`SerialBus::open`], never directly.
#[derive(Clone)]
pub struct SerialBus {
    port: String,
    tx: mpsc::Sender<BusRequest>,
}

static REGISTRY: OnceLock<Mutex<HashMap<String, SerialBus>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, SerialBus>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl SerialBus {
    /// Open (or reuse) the bus for `port` at `baud_rate`. If a bus for this
    /// port name is already registered it is returned unchanged — opening
    /// with a different baud rate does not reconfigure it, matching
    /// spec.md §4.1's "construction with a port name already present
    /// returns the existing bus".
    pub fn open(port: &str, baud_rate: u32) -> EurothermResult<Self> {
        let mut reg = registry().lock().expect("serial bus registry poisoned");
        if let Some(existing) = reg.get(port) {
            return Ok(existing.clone());
        }

        let builder = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One);
        let stream = builder
            .open_native_async()
            .map_err(|e| EurothermError::Bus(format!("opening {port}: {e}")))?;

        let bus = Self::spawn(port.to_string(), stream);
        reg.insert(port.to_string(), bus.clone());
        Ok(bus)
    }

    /// Spawn the actor task over an arbitrary transport. Used directly by
    /// `open` for a real `tokio-serial` port, and by tests to drive the
    /// same actor loop over an in-memory duplex.
    fn spawn<T>(port: String, transport: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(run_actor(port.clone(), Box::new(transport), rx));
        Self { port, tx }
    }

    /// Build a bus directly over an arbitrary transport, bypassing the
    /// registry and real serial port. Gated behind `test-util` so it is
    /// only reachable from this crate's own tests and its `tests/`
    /// integration suite, never from production callers.
    #[cfg(feature = "test-util")]
    pub fn from_transport<T>(port: &str, transport: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::spawn(port.to_string(), transport)
    }

    /// Port name this bus serialises access to.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Read `count` consecutive holding registers starting at `register`.
    pub async fn read_holding(&self, unit: u8, register: u16, count: u16) -> EurothermResult<Vec<u16>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BusRequest::ReadHolding {
                unit,
                register,
                count,
                reply,
            })
            .await
            .map_err(|_| EurothermError::Bus(format!("bus actor for {} has stopped", self.port)))?;
        rx.await
            .map_err(|_| EurothermError::Bus(format!("bus actor for {} dropped reply", self.port)))?
    }

    /// Write a single holding register.
    pub async fn write_holding(&self, unit: u8, register: u16, value: u16) -> EurothermResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BusRequest::WriteHolding {
                unit,
                register,
                value,
                reply,
            })
            .await
            .map_err(|_| EurothermError::Bus(format!("bus actor for {} has stopped", self.port)))?;
        rx.await
            .map_err(|_| EurothermError::Bus(format!("bus actor for {} dropped reply", self.port)))?
    }
}

async fn run_actor(port: String, mut transport: Box<Transport>, mut rx: mpsc::Receiver<BusRequest>) {
    debug!(%port, "serial bus actor started");
    while let Some(request) = rx.recv().await {
        match request {
            BusRequest::ReadHolding {
                unit,
                register,
                count,
                reply,
            } => {
                let result = read_holding_transaction(&mut transport, unit, register, count).await;
                let _ = reply.send(result);
            }
            BusRequest::WriteHolding {
                unit,
                register,
                value,
                reply,
            } => {
                let result = write_holding_transaction(&mut transport, unit, register, value).await;
                let _ = reply.send(result);
            }
        }
    }
    debug!(%port, "serial bus actor stopped (all handles dropped)");
}

const FN_READ_HOLDING: u8 = 0x03;
const FN_WRITE_HOLDING: u8 = 0x06;
const EXCEPTION_BIT: u8 = 0x80;

async fn read_holding_transaction(
    transport: &mut Transport,
    unit: u8,
    register: u16,
    count: u16,
) -> EurothermResult<Vec<u16>> {
    let mut frame = Vec::with_capacity(8);
    frame.push(unit);
    frame.push(FN_READ_HOLDING);
    frame.extend_from_slice(&register.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    append_crc(&mut frame);

    let expected_len = 3 + 2 * count as usize + 2;
    let response = transact(transport, &frame, expected_len).await?;
    check_frame(&response, unit, FN_READ_HOLDING)?;

    let byte_count = response[2] as usize;
    if byte_count != 2 * count as usize {
        return Err(EurothermError::Bus(format!(
            "unexpected byte count {byte_count} (wanted {})",
            2 * count
        )));
    }
    let registers = response[3..3 + byte_count]
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    Ok(registers)
}

async fn write_holding_transaction(
    transport: &mut Transport,
    unit: u8,
    register: u16,
    value: u16,
) -> EurothermResult<()> {
    let mut frame = Vec::with_capacity(8);
    frame.push(unit);
    frame.push(FN_WRITE_HOLDING);
    frame.extend_from_slice(&register.to_be_bytes());
    frame.extend_from_slice(&value.to_be_bytes());
    append_crc(&mut frame);

    let response = transact(transport, &frame, frame.len()).await?;
    check_frame(&response, unit, FN_WRITE_HOLDING)?;
    Ok(())
}

/// Write the request frame, then read a response, recognising an exception
/// reply (5 bytes: unit, function|0x80, code, crc-lo, crc-hi) as soon as the
/// function byte's top bit appears so the actor doesn't block waiting for
/// bytes the device will never send.
async fn transact(transport: &mut Transport, request: &[u8], expected_len: usize) -> EurothermResult<Vec<u8>> {
    tokio::time::timeout(TRANSACTION_TIMEOUT, async {
        transport
            .write_all(request)
            .await
            .map_err(|e| EurothermError::Bus(format!("write failed: {e}")))?;

        let mut buf = vec![0u8; expected_len.max(5)];
        let mut filled = 0usize;
        let mut target = expected_len;
        while filled < target {
            let n = transport
                .read(&mut buf[filled..target])
                .await
                .map_err(|e| EurothermError::Bus(format!("read failed: {e}")))?;
            if n == 0 {
                return Err(EurothermError::Bus("connection closed mid-frame".into()));
            }
            filled += n;
            if filled >= 2 && buf[1] & EXCEPTION_BIT != 0 {
                target = 5;
            }
        }
        buf.truncate(target);
        Ok(buf)
    })
    .await
    .map_err(|_| EurothermError::Bus("transaction timed out".into()))?
}

fn check_frame(response: &[u8], unit: u8, function: u8) -> EurothermResult<()> {
    if response.len() < 5 {
        return Err(EurothermError::Bus("response too short".into()));
    }
    let received_crc = u16::from_le_bytes([response[response.len() - 2], response[response.len() - 1]]);
    let computed_crc = crc16(&response[..response.len() - 2]);
    if received_crc != computed_crc {
        return Err(EurothermError::Bus(format!(
            "CRC mismatch: received {received_crc:04x}, computed {computed_crc:04x}"
        )));
    }
    if response[0] != unit {
        return Err(EurothermError::Bus(format!(
            "unit address mismatch: expected {unit}, got {}",
            response[0]
        )));
    }
    if response[1] & EXCEPTION_BIT != 0 {
        let code = response.get(2).copied().unwrap_or(0);
        warn!(unit, function, code, "modbus exception response");
        return Err(EurothermError::Bus(format!(
            "exception response: function 0x{function:02x}, code 0x{code:02x}"
        )));
    }
    if response[1] != function {
        return Err(EurothermError::Bus(format!(
            "function code mismatch: expected 0x{function:02x}, got 0x{:02x}",
            response[1]
        )));
    }
    Ok(())
}

/// CRC-16/MODBUS: init 0xFFFF, poly 0xA001 (reflected 0x8005), appended
/// low byte first.
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

fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_matches_known_vector() {
        // 01 03 00 00 00 0A -> CRC 0xC5CD (low byte 0xCD, high byte 0xC5)
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert_eq!(crc16(&frame), 0xC5CD);
    }

    #[tokio::test]
    async fn open_is_idempotent_per_port_name() {
        let (a, _b) = tokio::io::duplex(64);
        let bus1 = SerialBus::from_transport("/dev/fake0", a);
        registry()
            .lock()
            .unwrap()
            .insert("/dev/fake0".into(), bus1.clone());
        let bus2 = registry().lock().unwrap().get("/dev/fake0").cloned().unwrap();
        assert_eq!(bus1.port(), bus2.port());
    }
}
