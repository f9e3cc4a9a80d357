//! Event system for UI decoupling.
//!
//! Allows a CLI or GUI to follow session activity (traffic, page
//! progress, mode changes) without tight coupling to the core logic.

use std::fmt;

use crate::transport::TransportKind;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Long-running operations that report progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    WriteFlash,
    WriteEeprom,
    ReadSignature,
    ReadFuses,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::WriteFlash => write!(f, "Write Flash"),
            Operation::WriteEeprom => write!(f, "Write EEPROM"),
            Operation::ReadSignature => write!(f, "Read Signature"),
            Operation::ReadFuses => write!(f, "Read Fuses"),
        }
    }
}

/// Events emitted by a session.
#[derive(Debug, Clone)]
pub enum Stk500Event {
    /// Transport opened and interface ready.
    Connected { transport: TransportKind },
    /// Serial link answered the sign-on handshake.
    Synced { attempts: u32 },
    /// Programming mode entered (`true`) or left (`false`).
    ProgModeChanged { active: bool },
    /// Progress update for current operation.
    Progress {
        operation: Operation,
        current: u64,
        total: u64,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Bytes sent/received.
    Packet {
        direction: PacketDirection,
        seq: Option<u8>,
        length: usize,
        data: Option<Vec<u8>>,
    },
    /// Session closed.
    Closed,
}

/// Packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Transmit (Host -> Programmer)
    Rx, // Receive (Programmer -> Host)
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait SessionObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &Stk500Event);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: &Stk500Event) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &Stk500Event) {
        match event {
            Stk500Event::Connected { transport } => {
                tracing::info!(transport = %transport, "Programmer connected");
            }
            Stk500Event::Synced { attempts } => {
                tracing::info!(attempts, "Link synchronized");
            }
            Stk500Event::ProgModeChanged { active } => {
                tracing::info!(active, "Programming mode changed");
            }
            Stk500Event::Progress {
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            Stk500Event::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            Stk500Event::Packet {
                direction,
                seq,
                length,
                data,
            } => {
                tracing::trace!(
                    dir = %direction,
                    seq = ?seq,
                    len = length,
                    data = ?data,
                    "Packet"
                );
            }
            Stk500Event::Closed => {
                tracing::info!("Session closed");
            }
        }
    }
}
