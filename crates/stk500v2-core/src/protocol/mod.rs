//! Protocol module - STK500v2 wire definitions.

pub mod constants;
pub mod frame;
pub mod layout;
pub mod status;

pub use constants::*;
pub use frame::{Frame, FrameError, FrameReader};
pub use layout::ReplyLayout;
pub use status::Status;
