//! Protocol constants from the Atmel AVR068 STK500v2 communication protocol.

// ============================================================================
// Device Identification
// ============================================================================

/// Atmel Corporation Vendor ID
pub const ATMEL_VENDOR_ID: u16 = 0x03EB;

/// AVRISP mkII Product ID
pub const AVRISP_MKII_PRODUCT_ID: u16 = 0x2104;

/// USB interface carrying the bulk endpoint pair.
pub const PROGRAMMER_INTERFACE: u8 = 0;

// ============================================================================
// Message Envelope
// ============================================================================

/// First byte of every framed message.
pub const MESSAGE_START: u8 = 0x1B;

/// Fixed token separating the header from the message body.
pub const TOKEN: u8 = 0x0E;

/// START, SEQ, LEN_HI, LEN_LO, TOKEN
pub const FRAME_HEADER_LEN: usize = 5;

/// Trailing checksum byte.
pub const FRAME_CHECKSUM_LEN: usize = 1;

/// Largest body a 16-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

// ============================================================================
// General Commands
// ============================================================================

pub const CMD_SIGN_ON: u8 = 0x01;
pub const CMD_SET_PARAMETER: u8 = 0x02;
pub const CMD_GET_PARAMETER: u8 = 0x03;
pub const CMD_SET_DEVICE_PARAMETERS: u8 = 0x04;
pub const CMD_OSCCAL: u8 = 0x05;
pub const CMD_LOAD_ADDRESS: u8 = 0x06;
pub const CMD_FIRMWARE_UPGRADE: u8 = 0x07;

// ============================================================================
// ISP Commands
// ============================================================================

pub const CMD_ENTER_PROGMODE_ISP: u8 = 0x10;
pub const CMD_LEAVE_PROGMODE_ISP: u8 = 0x11;
pub const CMD_CHIP_ERASE_ISP: u8 = 0x12;
pub const CMD_PROGRAM_FLASH_ISP: u8 = 0x13;
pub const CMD_READ_FLASH_ISP: u8 = 0x14;
pub const CMD_PROGRAM_EEPROM_ISP: u8 = 0x15;
pub const CMD_READ_EEPROM_ISP: u8 = 0x16;
pub const CMD_PROGRAM_FUSE_ISP: u8 = 0x17;
pub const CMD_READ_FUSE_ISP: u8 = 0x18;
pub const CMD_PROGRAM_LOCK_ISP: u8 = 0x19;
pub const CMD_READ_LOCK_ISP: u8 = 0x1A;
pub const CMD_READ_SIGNATURE_ISP: u8 = 0x1B;
pub const CMD_READ_OSCCAL_ISP: u8 = 0x1C;
pub const CMD_SPI_MULTI: u8 = 0x1D;

// ============================================================================
// Status Codes (Programmer -> Host)
// ============================================================================

/// Success
pub const STATUS_CMD_OK: u8 = 0x00;

// Warnings
pub const STATUS_CMD_TOUT: u8 = 0x80;
pub const STATUS_RDY_BSY_TOUT: u8 = 0x81;
pub const STATUS_SET_PARAM_MISSING: u8 = 0x82;

// Errors
pub const STATUS_CMD_FAILED: u8 = 0xC0;
pub const STATUS_CKSUM_ERROR: u8 = 0xC1;
pub const STATUS_CMD_UNKNOWN: u8 = 0xC9;

/// Sent in place of a reply when the programmer rejects a frame checksum.
pub const ANSWER_CKSUM_ERROR: u8 = 0xB0;

// ============================================================================
// Programmer Parameters
// ============================================================================

pub const PARAM_BUILD_NUMBER_LOW: u8 = 0x80;
pub const PARAM_BUILD_NUMBER_HIGH: u8 = 0x81;
pub const PARAM_HW_VER: u8 = 0x90;
pub const PARAM_SW_MAJOR: u8 = 0x91;
pub const PARAM_SW_MINOR: u8 = 0x92;
pub const PARAM_VTARGET: u8 = 0x94;
pub const PARAM_VADJUST: u8 = 0x95;
pub const PARAM_OSC_PSCALE: u8 = 0x96;
pub const PARAM_OSC_CMATCH: u8 = 0x97;
pub const PARAM_SCK_DURATION: u8 = 0x98;
pub const PARAM_TOPCARD_DETECT: u8 = 0x9A;
pub const PARAM_STATUS: u8 = 0x9C;
pub const PARAM_DATA: u8 = 0x9D;
pub const PARAM_RESET_POLARITY: u8 = 0x9E;
pub const PARAM_CONTROLLER_INIT: u8 = 0x9F;

// ============================================================================
// Addressing
// ============================================================================

/// Set in the address MSB of LOAD_ADDRESS when addressing flash.
pub const FLASH_ADDRESS_FLAG: u8 = 0x80;

// ============================================================================
// Link Timing
// ============================================================================

/// Sign-on attempts made by the serial synchronizer before giving up.
pub const SYNC_ATTEMPTS: u32 = 10;

/// Pause between a sync attempt and checking for its reply.
pub const SYNC_RETRY_DELAY_MS: u64 = 10;

/// Processing time granted to the programmer after every serial write.
pub const SERIAL_SETTLE_DELAY_MS: u64 = 400;

/// How long a serial read waits for the next inbound message.
pub const SERIAL_READ_TIMEOUT_MS: u64 = 1000;

/// Default serial baud rate.
pub const SERIAL_DEFAULT_BAUD: u32 = 115_200;

/// Sign-on command as a complete frame with sequence number 0.
pub const SIGN_ON_FRAME: [u8; 7] = [MESSAGE_START, 0x00, 0x00, 0x01, TOKEN, CMD_SIGN_ON, 0x15];

/// Length of a framed sign-on reply carrying the 8-byte "AVRISP_2" identity.
pub const SIGN_ON_REPLY_LEN: usize = 17;
