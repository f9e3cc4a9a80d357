//! STK500v2 message envelope.
//!
//! ```text
//! 0x1B | SEQ | LEN_HI | LEN_LO | 0x0E | BODY[LEN] | CHECKSUM
//! ```
//!
//! The checksum is the XOR of every preceding byte. `FrameReader` splits a
//! raw byte stream back into frames for links that do not delimit messages
//! themselves.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use super::constants::{
    FRAME_CHECKSUM_LEN, FRAME_HEADER_LEN, MAX_PAYLOAD_LEN, MESSAGE_START, TOKEN,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Bad start byte: 0x{0:02X}")]
    BadStart(u8),
    #[error("Bad token: 0x{0:02X}")]
    BadToken(u8),
    #[error("Length mismatch: header declares {declared} body bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("Checksum mismatch: computed 0x{expected:02X}, frame carries 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },
    #[error("Payload too large: {len} bytes (max {MAX_PAYLOAD_LEN})")]
    PayloadTooLarge { len: usize },
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Re-encode into wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        // A decoded payload always fits the 16-bit length field.
        wrap(&self.payload, self.seq)
    }
}

/// XOR of all bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, &b| acc ^ b)
}

/// Wrap `payload` in the message envelope using sequence number `seq`.
pub fn encode(payload: &[u8], seq: u8) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge { len: payload.len() });
    }
    Ok(wrap(payload, seq))
}

fn wrap(payload: &[u8], seq: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len() + FRAME_CHECKSUM_LEN);
    let mut len = [0u8; 2];
    BigEndian::write_u16(&mut len, payload.len() as u16);

    frame.push(MESSAGE_START);
    frame.push(seq);
    frame.extend_from_slice(&len);
    frame.push(TOKEN);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    frame
}

/// Validate a complete frame and extract its body.
pub fn decode(data: &[u8]) -> Result<Frame, FrameError> {
    let minimum = FRAME_HEADER_LEN + FRAME_CHECKSUM_LEN;
    if data.len() < minimum {
        return Err(FrameError::Truncated {
            expected: minimum,
            actual: data.len(),
        });
    }
    if data[0] != MESSAGE_START {
        return Err(FrameError::BadStart(data[0]));
    }
    if data[4] != TOKEN {
        return Err(FrameError::BadToken(data[4]));
    }

    let declared = BigEndian::read_u16(&data[2..4]) as usize;
    let total = FRAME_HEADER_LEN + declared + FRAME_CHECKSUM_LEN;
    if data.len() < total {
        return Err(FrameError::Truncated {
            expected: total,
            actual: data.len(),
        });
    }
    if data.len() > total {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: data.len() - minimum,
        });
    }

    let expected = checksum(&data[..total - 1]);
    let actual = data[total - 1];
    if expected != actual {
        return Err(FrameError::Checksum { expected, actual });
    }

    Ok(Frame {
        seq: data[1],
        payload: data[FRAME_HEADER_LEN..total - 1].to_vec(),
    })
}

/// Incremental frame splitter for byte streams.
///
/// Bytes before a start byte are discarded. A frame with a bad token or
/// checksum is reported once and dropped so the stream can resynchronize.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes received from the link.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        match self.buf.iter().position(|&b| b == MESSAGE_START) {
            None => {
                self.buf.clear();
                return None;
            }
            Some(0) => {}
            Some(skip) => {
                self.buf.drain(..skip);
            }
        }

        if self.buf.len() < FRAME_HEADER_LEN {
            return None;
        }
        if self.buf[4] != TOKEN {
            let token = self.buf[4];
            self.buf.drain(..1);
            return Some(Err(FrameError::BadToken(token)));
        }

        let declared = BigEndian::read_u16(&self.buf[2..4]) as usize;
        let total = FRAME_HEADER_LEN + declared + FRAME_CHECKSUM_LEN;
        if self.buf.len() < total {
            return None;
        }

        let raw: Vec<u8> = self.buf.drain(..total).collect();
        Some(decode(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_frame() {
        let framed = encode(&[0xFF, 0xFF, 0xFF, 0xFF], 0).unwrap();
        assert_eq!(
            framed,
            [0x1B, 0x00, 0x00, 0x04, 0x0E, 0xFF, 0xFF, 0xFF, 0xFF, 0x11]
        );
    }

    #[test]
    fn test_checksum_covers_header_and_body() {
        let framed = encode(&[0x10, 0xC8, 0x64], 0x2A).unwrap();
        let (body, last) = framed.split_at(framed.len() - 1);
        assert_eq!(checksum(body), last[0]);
    }

    #[test]
    fn test_decode_recovers_payload() {
        let payloads: [&[u8]; 3] = [&[], &[0x01], &[0x13, 0x00, 0x05, 0xC1, 0x0A, 0x40]];
        for (seq, payload) in payloads.iter().enumerate() {
            let frame = decode(&encode(payload, seq as u8 * 100).unwrap()).unwrap();
            assert_eq!(frame.payload, *payload);
            assert_eq!(frame.seq, seq as u8 * 100);
        }
    }

    #[test]
    fn test_large_payload_uses_both_length_bytes() {
        let payload = vec![0xA5; 0x0123];
        let framed = encode(&payload, 7).unwrap();
        assert_eq!(framed[2], 0x01);
        assert_eq!(framed[3], 0x23);
        assert_eq!(decode(&framed).unwrap().payload.len(), 0x0123);
    }

    #[test]
    fn test_payload_too_large() {
        let payload = vec![0; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            encode(&payload, 0),
            Err(FrameError::PayloadTooLarge {
                len: MAX_PAYLOAD_LEN + 1
            })
        );
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let mut framed = encode(&[0x01, 0x00], 3).unwrap();
        framed[5] ^= 0x40;
        assert!(matches!(decode(&framed), Err(FrameError::Checksum { .. })));

        let mut framed = encode(&[0x01], 3).unwrap();
        framed[0] = 0x1C;
        assert_eq!(decode(&framed), Err(FrameError::BadStart(0x1C)));

        let framed = encode(&[0x01, 0x02, 0x03], 3).unwrap();
        assert!(matches!(
            decode(&framed[..framed.len() - 1]),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_reader_reassembles_split_frames() {
        let first = encode(&[0x01, 0x00, 0x08], 0).unwrap();
        let second = encode(&[0x06, 0x00], 1).unwrap();
        let mut stream = vec![0x00, 0x42];
        stream.extend_from_slice(&first);
        stream.extend_from_slice(&second);

        let mut reader = FrameReader::new();
        reader.push(&stream[..6]);
        assert!(reader.next_frame().is_none());

        reader.push(&stream[6..]);
        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.payload, [0x01, 0x00, 0x08]);
        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.seq, 1);
        assert_eq!(frame.to_bytes(), second);
        assert!(reader.next_frame().is_none());
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn test_reader_drops_bad_frame_and_resyncs() {
        let mut bad = encode(&[0x03, 0x00, 0x11], 4).unwrap();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let good = encode(&[0x03, 0x00, 0x22], 5).unwrap();

        let mut reader = FrameReader::new();
        reader.push(&bad);
        reader.push(&good);

        assert!(matches!(
            reader.next_frame(),
            Some(Err(FrameError::Checksum { .. }))
        ));
        assert_eq!(reader.next_frame().unwrap().unwrap().payload, [0x03, 0x00, 0x22]);
    }
}
