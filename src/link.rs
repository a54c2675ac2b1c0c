// Byte transports for the host <-> amplifier link
//
// The real link is a serial port opened non-blocking. `MemoryPort` pairs give
// an in-process link for simulation and tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

/// Error on the serial link
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// Anything bytes can be pushed through
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// Open a serial port whose reads return immediately
pub fn open_serial(port_name: &str, baudrate: u32) -> Result<Box<dyn serialport::SerialPort>> {
    let port = serialport::new(port_name, baudrate)
        .timeout(Duration::ZERO)
        .open()?;
    info!("Opened {} at {} baud", port_name, baudrate);
    Ok(port)
}

/// Read whatever is available without blocking.
///
/// Timeouts and would-block are "no data", not errors.
pub fn read_available(transport: &mut (impl Read + ?Sized), out: &mut Vec<u8>) -> Result<usize> {
    let mut buf = [0u8; 256];
    let mut total = 0;
    loop {
        match transport.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                out.extend_from_slice(&buf[..n]);
                total += n;
                if n < buf.len() {
                    break;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total)
}

/// One end of an in-memory, full-duplex byte link
#[derive(Debug, Clone)]
pub struct MemoryPort {
    rx: Arc<Mutex<VecDeque<u8>>>,
    tx: Arc<Mutex<VecDeque<u8>>>,
}

impl MemoryPort {
    /// Two connected ends: bytes written to one are read from the other
    pub fn pair() -> (MemoryPort, MemoryPort) {
        let a_to_b = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a = Arc::new(Mutex::new(VecDeque::new()));
        (
            MemoryPort {
                rx: Arc::clone(&b_to_a),
                tx: Arc::clone(&a_to_b),
            },
            MemoryPort {
                rx: a_to_b,
                tx: b_to_a,
            },
        )
    }

    /// Bytes written by the peer and not yet read
    pub fn pending(&self) -> usize {
        self.rx.lock().map(|q| q.len()).unwrap_or(0)
    }
}

fn poisoned() -> io::Error {
    io::Error::other("memory port mutex poisoned")
}

impl Read for MemoryPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.rx.lock().map_err(|_| poisoned())?;
        if rx.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(rx.len());
        for (slot, byte) in buf.iter_mut().zip(rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx.lock().map_err(|_| poisoned())?.extend(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pair_is_full_duplex() {
        let (mut host, mut device) = MemoryPort::pair();
        host.write_all(&[1, 2, 3]).unwrap();
        device.write_all(&[9]).unwrap();

        let mut from_host = Vec::new();
        assert_eq!(read_available(&mut device, &mut from_host).unwrap(), 3);
        assert_eq!(from_host, vec![1, 2, 3]);

        let mut from_device = Vec::new();
        read_available(&mut host, &mut from_device).unwrap();
        assert_eq!(from_device, vec![9]);
    }

    #[test]
    fn test_empty_read_is_not_an_error() {
        let (mut host, _device) = MemoryPort::pair();
        let mut out = Vec::new();
        assert_eq!(read_available(&mut host, &mut out).unwrap(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_large_reads_drain_everything() {
        let (mut host, mut device) = MemoryPort::pair();
        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        host.write_all(&data).unwrap();

        let mut out = Vec::new();
        assert_eq!(read_available(&mut device, &mut out).unwrap(), 1000);
        assert_eq!(out, data);
        assert_eq!(device.pending(), 0);
    }
}
