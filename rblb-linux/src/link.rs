//! Serial link: the physical side of the bus. Writes go straight to the port; reads run on a
//! blocking thread and are forwarded to the async side in chunks.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use anyhow::Context;
use rblb_core::Transport;
use tokio::sync::mpsc;
use tracing::warn;

/// Read timeout; bounds how long the reader takes to notice shutdown.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

pub type Port = Box<dyn serialport::SerialPort>;

pub fn open(path: &str, baud_rate: u32) -> anyhow::Result<Port> {
    serialport::new(path, baud_rate)
        .timeout(READ_TIMEOUT)
        .open()
        .with_context(|| format!("opening serial port {} at {} baud", path, baud_rate))
}

/// Bus transport writing whole frames to the port.
pub struct SerialTransport {
    port: Port,
}

impl SerialTransport {
    pub fn new(port: Port) -> Self {
        Self { port }
    }
}

impl Transport for SerialTransport {
    fn transmit(&mut self, bytes: &[u8]) {
        if let Err(e) = self.port.write_all(bytes).and_then(|_| self.port.flush()) {
            warn!(error = %e, len = bytes.len(), "serial write failed");
        }
    }
}

/// Blocking read loop. Returns when the receiving side is gone or the port fails.
pub fn read_loop<R: Read>(mut port: R, tx: mpsc::UnboundedSender<Vec<u8>>) -> std::io::Result<()> {
    let mut buf = [0u8; 512];
    loop {
        if tx.is_closed() {
            return Ok(());
        }
        match port.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    return Ok(());
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}
