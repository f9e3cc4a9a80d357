//! Transport layer abstraction.
//!
//! Defines the `Transport` trait for moving bytes to and from the
//! programmer, allowing different implementations (nusb, serial, mock).

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Device is not open")]
    NotOpen,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which physical link a transport drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Bulk endpoint pair; the link has its own connection state.
    Usb,
    /// Stateless byte stream; needs a sign-on handshake before use.
    Serial,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Usb => write!(f, "USB"),
            TransportKind::Serial => write!(f, "serial"),
        }
    }
}

/// Byte channel to the programmer.
///
/// This trait enables:
/// - USB implementation using nusb
/// - Serial implementation using serialport
/// - Mock implementation for unit testing
///
/// Errors are surfaced as-is; retrying is left to the caller.
pub trait Transport: Send {
    /// Acquire the underlying device.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Release the device, dropping anything still buffered.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Prepare the opened device for transfers.
    fn set_up_interface(&mut self) -> Result<(), TransportError>;

    /// Send one message.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive one message of at most `count` bytes.
    fn read(&mut self, count: usize) -> Result<Vec<u8>, TransportError>;

    /// Drop every message received but not read yet. Returns how many were dropped.
    fn discard_input(&mut self) -> Result<usize, TransportError>;

    /// Physical link type.
    fn kind(&self) -> TransportKind;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn set_up_interface(&mut self) -> Result<(), TransportError> {
        (**self).set_up_interface()
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(data)
    }

    fn read(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        (**self).read(count)
    }

    fn discard_input(&mut self) -> Result<usize, TransportError> {
        (**self).discard_input()
    }

    fn kind(&self) -> TransportKind {
        (**self).kind()
    }
}
