//! Reply status byte parsing.
//!
//! Every STK500v2 reply carries a status byte right after the echoed
//! command id. This module gives it a type with readable names.

use std::fmt;

use super::constants::*;

/// Status byte returned by the programmer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u8);

impl Status {
    pub const OK: Status = Status(STATUS_CMD_OK);

    pub const fn from_byte(value: u8) -> Self {
        Self(value)
    }

    /// Raw value.
    pub const fn value(&self) -> u8 {
        self.0
    }

    /// Command completed.
    pub const fn is_ok(&self) -> bool {
        self.0 == STATUS_CMD_OK
    }

    /// Warning range (0x80..=0xBF): the command ran but did not complete cleanly.
    pub const fn is_warning(&self) -> bool {
        self.0 >= 0x80 && self.0 < 0xC0
    }

    /// Error range (0xC0 and above).
    pub const fn is_error(&self) -> bool {
        self.0 >= 0xC0
    }

    /// Symbolic name, if the code is known.
    pub fn name(&self) -> Option<&'static str> {
        let name = match self.0 {
            STATUS_CMD_OK => "STATUS_CMD_OK",
            STATUS_CMD_TOUT => "STATUS_CMD_TOUT",
            STATUS_RDY_BSY_TOUT => "STATUS_RDY_BSY_TOUT",
            STATUS_SET_PARAM_MISSING => "STATUS_SET_PARAM_MISSING",
            ANSWER_CKSUM_ERROR => "ANSWER_CKSUM_ERROR",
            STATUS_CMD_FAILED => "STATUS_CMD_FAILED",
            STATUS_CKSUM_ERROR => "STATUS_CKSUM_ERROR",
            STATUS_CMD_UNKNOWN => "STATUS_CMD_UNKNOWN",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({self})")
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:02X})", name, self.0),
            None => write!(f, "unknown status (0x{:02X})", self.0),
        }
    }
}

impl From<u8> for Status {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_status() {
        let status = Status::from_byte(0x00);
        assert!(status.is_ok());
        assert!(!status.is_warning());
        assert_eq!(status, Status::OK);
    }

    #[test]
    fn test_error_ranges() {
        assert!(Status::from(STATUS_CMD_TOUT).is_warning());
        assert!(Status::from(STATUS_CMD_FAILED).is_error());
        assert!(Status::from(STATUS_CMD_UNKNOWN).is_error());
        assert!(!Status::from(STATUS_CKSUM_ERROR).is_ok());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Status::from(STATUS_CMD_FAILED).to_string(),
            "STATUS_CMD_FAILED (0xC0)"
        );
        assert_eq!(Status::from(0x42).to_string(), "unknown status (0x42)");
    }
}
