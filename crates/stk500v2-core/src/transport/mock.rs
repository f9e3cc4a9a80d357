//! Mock transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{Transport, TransportError, TransportKind};

/// Mock transport for unit testing session logic.
///
/// Clones share their queues and logs, so a test can keep one handle while
/// a session owns another.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued replies to return on read.
    reply_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Byte counts requested by reads.
    read_log: Arc<Mutex<Vec<usize>>>,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
    /// Whether open() has been called without a matching close().
    opened: Arc<Mutex<bool>>,
    /// Writes allowed before every further write fails.
    write_budget: Arc<Mutex<Option<usize>>>,
    kind: TransportKind,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_kind(TransportKind::Usb)
    }

    /// Mock that reports itself as the given link type.
    pub fn with_kind(kind: TransportKind) -> Self {
        Self {
            reply_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            read_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
            opened: Arc::new(Mutex::new(false)),
            write_budget: Arc::new(Mutex::new(None)),
            kind,
        }
    }

    /// Queue a reply to be returned on next read.
    pub fn queue_reply(&self, reply: &[u8]) {
        self.reply_queue.lock().unwrap().push_back(reply.to_vec());
    }

    /// Number of replies not consumed yet.
    pub fn pending_replies(&self) -> usize {
        self.reply_queue.lock().unwrap().len()
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Get the byte counts requested by every read.
    pub fn get_reads(&self) -> Vec<usize> {
        self.read_log.lock().unwrap().clone()
    }

    /// Let `count` more writes succeed, then fail every write after that.
    pub fn fail_writes_after(&self, count: usize) {
        *self.write_budget.lock().unwrap() = Some(count);
    }

    pub fn is_open(&self) -> bool {
        *self.opened.lock().unwrap()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        *self.opened.lock().unwrap() = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        *self.opened.lock().unwrap() = false;
        self.reply_queue.lock().unwrap().clear();
        Ok(())
    }

    fn set_up_interface(&mut self) -> Result<(), TransportError> {
        if !*self.opened.lock().unwrap() {
            return Err(TransportError::NotOpen);
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        if let Some(budget) = self.write_budget.lock().unwrap().as_mut() {
            if *budget == 0 {
                return Err(TransportError::WriteFailed("write budget exhausted".into()));
            }
            *budget -= 1;
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn read(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.read_log.lock().unwrap().push(count);
        let mut reply = self
            .reply_queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms: 1000 })?;
        reply.truncate(count);
        Ok(reply)
    }

    fn discard_input(&mut self) -> Result<usize, TransportError> {
        let mut queue = self.reply_queue.lock().unwrap();
        let discarded = queue.len();
        queue.clear();
        Ok(discarded)
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }
}
