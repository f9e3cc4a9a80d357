//! stk500v2-core: host side of the Atmel STK500v2 in-system programming protocol.
//!
//! Talks to STK500v2 programmers (AVRISP mkII over USB, STK500v2-compatible
//! boards over a serial line) to program AVR flash, EEPROM, fuses and lock
//! bits.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, status codes, frame codec, reply layouts
//! - **Transport**: Link abstraction (nusb, serialport, mock)
//! - **Sync**: Sign-on handshake for serial links
//! - **Session**: Command/response engine
//! - **Memory**: Paged memory, signature, fuse and lock access
//! - **Chip**: Target descriptors loaded from TOML
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use stk500v2_core::{ChipDescriptor, NusbTransport, Session, SessionConfig};
//!
//! let chip = ChipDescriptor::load_from_file("chips/atmega2560.toml").unwrap();
//! let mut session = Session::new(NusbTransport::avrisp_mkii(), chip, SessionConfig::default());
//!
//! session.set_up().unwrap();
//! session.sign_on(b"AVRISP_2").unwrap();
//! session.enter_programming_mode().unwrap();
//! session.erase_chip().unwrap();
//! session.write_flash(&std::fs::read("firmware.bin").unwrap()).unwrap();
//! session.exit_programming_mode().unwrap();
//! session.close().unwrap();
//! ```

pub mod chip;
pub mod error;
pub mod events;
pub mod memory;
pub mod protocol;
pub mod session;
pub mod sync;
pub mod transport;

// Re-exports for convenience
pub use chip::{ChipDescriptor, ChipError, MemoryType};
pub use error::{ErrorKind, Phase, Result, Stk500Error};
pub use events::{
    LogLevel, NullObserver, Operation, PacketDirection, SessionObserver, Stk500Event,
    TracingObserver,
};
pub use memory::PageCursor;
pub use protocol::{Frame, FrameError, ReplyLayout, Status};
pub use session::{ProgMode, ProgrammerVersion, Session, SessionConfig, verify_signature};
pub use sync::{LinkSynchronizer, SyncConfig, SyncState};
pub use transport::{
    MockTransport, NusbTransport, SerialTransport, Transport, TransportError, TransportKind,
};
