//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod serial;
pub mod traits;

pub use mock::MockTransport;
pub use nusb::{EndpointPair, NusbTransport};
pub use serial::SerialTransport;
pub use traits::{Transport, TransportError, TransportKind};
