//! Session error types.

use std::fmt;

use thiserror::Error;

use crate::protocol::{FrameError, Status};
use crate::transport::TransportError;

/// Step of an operation, used to tell the user what failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Open,
    SetUpInterface,
    Close,
    Sync,
    Write,
    Read,
    SendCommand,
    SignOn,
    SetParameter,
    GetParameter,
    LoadAddress,
    EnterProgMode,
    LeaveProgMode,
    EraseChip,
    WritePage,
    ReadMemory,
    ReadSignature,
    ReadFuse,
    WriteFuse,
    ReadLock,
    WriteLock,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Phase::Open => "open device",
            Phase::SetUpInterface => "set up interface",
            Phase::Close => "close device",
            Phase::Sync => "sync with programmer",
            Phase::Write => "write",
            Phase::Read => "read",
            Phase::SendCommand => "send command",
            Phase::SignOn => "sign on",
            Phase::SetParameter => "set parameter",
            Phase::GetParameter => "get parameter",
            Phase::LoadAddress => "load address",
            Phase::EnterProgMode => "enter programming mode",
            Phase::LeaveProgMode => "leave programming mode",
            Phase::EraseChip => "erase chip",
            Phase::WritePage => "write page",
            Phase::ReadMemory => "read memory",
            Phase::ReadSignature => "read chip signature",
            Phase::ReadFuse => "read fuse",
            Phase::WriteFuse => "write fuse",
            Phase::ReadLock => "read lock bits",
            Phase::WriteLock => "write lock bits",
        };
        f.write_str(text)
    }
}

/// Coarse error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Physical I/O failed.
    Transport,
    /// Serial handshake ran out of attempts.
    Sync,
    /// The programmer answered, but not with success or not with what was expected.
    ChecksumOrStatus,
    /// The caller passed something unusable.
    Argument,
}

#[derive(Error, Debug)]
pub enum Stk500Error {
    #[error("Failed to {phase}: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: TransportError,
    },

    #[error("Failed to sync with programmer after {attempts} attempts")]
    Sync { attempts: u32 },

    #[error("Failed to {phase}: programmer returned {status}")]
    Status { phase: Phase, status: Status },

    #[error("Failed to {phase}: reply too short (need {expected} bytes, got {actual})")]
    ShortReply {
        phase: Phase,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to {phase}: signature does not match (expected {expected:02X?}, got {actual:02X?})")]
    SignatureMismatch {
        phase: Phase,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    #[error("Failed to frame message: {0}")]
    Frame(#[from] FrameError),

    #[error("Failed to access memory: programming mode could not be entered")]
    ProgModeUnavailable,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Stk500Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Stk500Error::Transport { .. } => ErrorKind::Transport,
            Stk500Error::Sync { .. } => ErrorKind::Sync,
            Stk500Error::Status { .. }
            | Stk500Error::ShortReply { .. }
            | Stk500Error::SignatureMismatch { .. }
            | Stk500Error::Frame(_)
            | Stk500Error::ProgModeUnavailable => ErrorKind::ChecksumOrStatus,
            Stk500Error::InvalidArgument(_) => ErrorKind::Argument,
        }
    }

    /// Phase the error was raised in, when known.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Stk500Error::Transport { phase, .. }
            | Stk500Error::Status { phase, .. }
            | Stk500Error::ShortReply { phase, .. }
            | Stk500Error::SignatureMismatch { phase, .. } => Some(*phase),
            Stk500Error::Sync { .. } => Some(Phase::Sync),
            _ => None,
        }
    }

    pub(crate) fn transport(phase: Phase) -> impl FnOnce(TransportError) -> Self {
        move |source| Stk500Error::Transport { phase, source }
    }
}

pub type Result<T> = std::result::Result<T, Stk500Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::STATUS_CMD_FAILED;

    #[test]
    fn test_messages_name_the_phase() {
        let err = Stk500Error::Status {
            phase: Phase::LoadAddress,
            status: Status::from(STATUS_CMD_FAILED),
        };
        assert_eq!(
            err.to_string(),
            "Failed to load address: programmer returned STATUS_CMD_FAILED (0xC0)"
        );

        let err = Stk500Error::transport(Phase::EraseChip)(TransportError::Disconnected);
        assert_eq!(err.to_string(), "Failed to erase chip: Device disconnected");
        assert_eq!(err.phase(), Some(Phase::EraseChip));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Stk500Error::Sync { attempts: 10 }.kind(), ErrorKind::Sync);
        assert_eq!(
            Stk500Error::InvalidArgument("x".into()).kind(),
            ErrorKind::Argument
        );
        assert_eq!(
            Stk500Error::SignatureMismatch {
                phase: Phase::SignOn,
                expected: vec![1],
                actual: vec![2]
            }
            .kind(),
            ErrorKind::ChecksumOrStatus
        );
    }
}
