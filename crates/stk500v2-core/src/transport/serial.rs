//! serialport-based transport implementation.
//!
//! A serial link has no request/reply pairing of its own: bytes show up
//! whenever the programmer sends them. A background thread reads the port,
//! cuts the stream into frames and queues one message per frame. `read`
//! hands out the next queued message instead of touching the port.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, instrument, trace, warn};

use super::traits::{Transport, TransportError, TransportKind};
use crate::protocol::constants::{
    SERIAL_DEFAULT_BAUD, SERIAL_READ_TIMEOUT_MS, SERIAL_SETTLE_DELAY_MS,
};
use crate::protocol::frame::FrameReader;

/// Write timeout of the port handle.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the reader thread checks for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

struct ReaderThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Serial port transport.
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    settle_delay: Duration,
    read_timeout: Duration,
    strip_envelope: bool,
    port: Option<Box<dyn SerialPort>>,
    inbox: Option<Receiver<Vec<u8>>>,
    reader: Option<ReaderThread>,
}

impl SerialTransport {
    /// Transport for the port at `path`. Nothing is opened yet.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: SERIAL_DEFAULT_BAUD,
            settle_delay: Duration::from_millis(SERIAL_SETTLE_DELAY_MS),
            read_timeout: Duration::from_millis(SERIAL_READ_TIMEOUT_MS),
            strip_envelope: false,
            port: None,
            inbox: None,
            reader: None,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Pause after each drained write so the programmer can act on it.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// How long `read` waits for the next message.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Queue bare message bodies instead of whole frames.
    ///
    /// Pair this with a frameless session.
    pub fn with_stripped_envelope(mut self, strip: bool) -> Self {
        self.strip_envelope = strip;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    fn start_reader(&mut self) -> Result<(), TransportError> {
        if self.reader.is_some() {
            return Ok(());
        }
        let port = self.port.as_ref().ok_or(TransportError::NotOpen)?;
        let mut reader_port = port
            .try_clone()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        reader_port
            .set_timeout(POLL_INTERVAL)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let strip_envelope = self.strip_envelope;
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("stk500v2-serial-rx".into())
            .spawn(move || pump(reader_port, tx, thread_stop, strip_envelope))?;

        self.inbox = Some(rx);
        self.reader = Some(ReaderThread { stop, handle });
        debug!("Serial reader started");
        Ok(())
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop.store(true, Ordering::Relaxed);
            if reader.handle.join().is_err() {
                warn!("Serial reader thread panicked");
            }
        }
        if let Some(inbox) = self.inbox.take() {
            let discarded = inbox.try_iter().count();
            if discarded > 0 {
                debug!(discarded, "Discarded unread messages");
            }
        }
    }
}

impl Transport for SerialTransport {
    #[instrument(level = "info", skip(self), fields(path = %self.path, baud = self.baud_rate))]
    fn open(&mut self) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(WRITE_TIMEOUT)
            .open()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        info!("Serial port opened");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.stop_reader();
        if self.port.take().is_some() {
            info!(path = %self.path, "Serial port closed");
        }
        Ok(())
    }

    fn set_up_interface(&mut self) -> Result<(), TransportError> {
        self.start_reader()
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        port.write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        // flush() waits until the output buffer has drained
        port.flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        thread::sleep(self.settle_delay);
        debug!(bytes_written = data.len(), "Write complete");
        Ok(())
    }

    #[instrument(skip(self))]
    fn read(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        let inbox = self.inbox.as_ref().ok_or(TransportError::NotOpen)?;
        match inbox.recv_timeout(self.read_timeout) {
            Ok(mut message) => {
                if message.len() > count {
                    trace!(len = message.len(), count, "Truncating message");
                    message.truncate(count);
                }
                debug!(bytes_read = message.len(), "Read complete");
                Ok(message)
            }
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout {
                timeout_ms: self.read_timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    fn discard_input(&mut self) -> Result<usize, TransportError> {
        let inbox = self.inbox.as_ref().ok_or(TransportError::NotOpen)?;
        let discarded = inbox.try_iter().count();
        if discarded > 0 {
            debug!(discarded, "Discarded stale messages");
        }
        Ok(discarded)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

/// Reader thread body: port bytes in, queued messages out.
fn pump(
    mut port: Box<dyn SerialPort>,
    tx: Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
    strip_envelope: bool,
) {
    let mut frames = FrameReader::new();
    let mut buf = [0u8; 512];

    while !stop.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                trace!(len = n, "Serial data");
                frames.push(&buf[..n]);
                for message in take_messages(&mut frames, strip_envelope) {
                    if tx.send(message).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!(error = %e, "Serial reader stopped");
                return;
            }
        }
    }
}

/// Pull every complete frame out of `frames`. Malformed frames are dropped.
fn take_messages(frames: &mut FrameReader, strip_envelope: bool) -> Vec<Vec<u8>> {
    let mut messages = Vec::new();
    while let Some(result) = frames.next_frame() {
        match result {
            Ok(frame) if strip_envelope => messages.push(frame.payload),
            Ok(frame) => messages.push(frame.to_bytes()),
            Err(e) => warn!(error = %e, "Dropping malformed frame"),
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::encode;

    #[test]
    fn test_builder_defaults() {
        let transport = SerialTransport::new("/dev/ttyACM0");
        assert_eq!(transport.path(), "/dev/ttyACM0");
        assert_eq!(transport.baud_rate(), 115_200);
        assert_eq!(transport.settle_delay(), Duration::from_millis(400));
        assert_eq!(transport.kind(), TransportKind::Serial);

        let transport = transport
            .with_baud_rate(57_600)
            .with_settle_delay(Duration::from_millis(200));
        assert_eq!(transport.baud_rate(), 57_600);
        assert_eq!(transport.settle_delay(), Duration::from_millis(200));
    }

    #[test]
    fn test_io_requires_open_port() {
        let mut transport = SerialTransport::new("/dev/null-port");
        assert!(matches!(transport.write(&[0x01]), Err(TransportError::NotOpen)));
        assert!(matches!(transport.read(2), Err(TransportError::NotOpen)));
        assert!(matches!(transport.discard_input(), Err(TransportError::NotOpen)));
        assert!(matches!(
            transport.set_up_interface(),
            Err(TransportError::NotOpen)
        ));
        assert!(transport.close().is_ok());
    }

    #[test]
    fn test_messages_keep_arrival_order() {
        let mut frames = FrameReader::new();
        frames.push(&encode(&[0x01, 0x00], 0).unwrap());
        frames.push(&encode(&[0x06, 0x00], 1).unwrap());

        let messages = take_messages(&mut frames, true);
        assert_eq!(messages, vec![vec![0x01, 0x00], vec![0x06, 0x00]]);
    }

    #[test]
    fn test_messages_keep_envelope_when_asked() {
        let framed = encode(&[0x02, 0x00], 9).unwrap();
        let mut frames = FrameReader::new();
        frames.push(&framed[..3]);
        assert!(take_messages(&mut frames, false).is_empty());

        frames.push(&framed[3..]);
        assert_eq!(take_messages(&mut frames, false), vec![framed]);
    }

    #[test]
    fn test_discard_input_drops_queued_messages() {
        let (tx, rx) = mpsc::channel();
        tx.send(vec![0x01, 0x00]).unwrap();
        tx.send(vec![0x01, 0x00]).unwrap();
        let mut transport =
            SerialTransport::new("/dev/ttyACM0").with_read_timeout(Duration::from_millis(1));
        transport.inbox = Some(rx);

        assert_eq!(transport.discard_input().unwrap(), 2);
        assert!(matches!(transport.read(2), Err(TransportError::Timeout { .. })));

        tx.send(vec![0x02, 0x00]).unwrap();
        assert_eq!(transport.read(2).unwrap(), [0x02, 0x00]);
    }
}
