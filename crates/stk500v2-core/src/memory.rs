//! Memory programming: paged flash/EEPROM access, device signature, fuses
//! and lock bits.
//!
//! Multi-step operations are strictly sequential. The programmer keeps the
//! current address as session state, so page N+1 is only addressed once
//! page N has been confirmed. Any failure aborts the remaining steps; pages
//! already written stay written.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, info, instrument};

use crate::chip::MemoryType;
use crate::error::{Phase, Result, Stk500Error};
use crate::events::{Operation, SessionObserver, Stk500Event};
use crate::protocol::constants::*;
use crate::session::{Session, compare_signature, reply_byte};
use crate::transport::Transport;

/// Page tracking state for paginated writes.
#[derive(Debug, Default, Clone)]
pub struct PageCursor {
    /// Pages handed out so far.
    pub current: usize,
    /// Total number of pages.
    pub total: usize,
    /// Byte offset of the next page.
    pub offset: usize,
    pub page_size: usize,
    pub data_size: usize,
}

impl PageCursor {
    pub fn new(data_size: usize, page_size: usize) -> Self {
        let total = if data_size == 0 || page_size == 0 {
            0
        } else {
            data_size.div_ceil(page_size)
        };
        Self {
            current: 0,
            total,
            offset: 0,
            page_size,
            data_size,
        }
    }

    /// Next page and its byte offset, advancing the cursor.
    pub fn next_page<'a>(&mut self, data: &'a [u8]) -> Option<(usize, &'a [u8])> {
        if self.is_done() || self.offset >= data.len() {
            return None;
        }

        let start = self.offset;
        let len = (data.len() - start).min(self.page_size);
        self.offset += len;
        self.current += 1;
        Some((start, &data[start..start + len]))
    }

    pub fn is_done(&self) -> bool {
        self.current >= self.total
    }
}

fn program_opcode(mem: MemoryType) -> u8 {
    match mem {
        MemoryType::Flash => CMD_PROGRAM_FLASH_ISP,
        MemoryType::Eeprom => CMD_PROGRAM_EEPROM_ISP,
    }
}

fn read_opcode(mem: MemoryType) -> u8 {
    match mem {
        MemoryType::Flash => CMD_READ_FLASH_ISP,
        MemoryType::Eeprom => CMD_READ_EEPROM_ISP,
    }
}

/// Command bytes in front of the data of a program page command.
const PAGE_HEADER_LEN: usize = 10;

fn length_u16(what: &str, len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| {
        Stk500Error::InvalidArgument(format!("{what} of {len} bytes does not fit a 16-bit length"))
    })
}

impl<T: Transport, O: SessionObserver> Session<T, O> {
    /// Program one page at the address last loaded.
    pub fn load_page(&mut self, mem: MemoryType, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Stk500Error::InvalidArgument(format!(
                "empty {mem} page"
            )));
        }
        if data.len() > MAX_PAYLOAD_LEN - PAGE_HEADER_LEN {
            return Err(Stk500Error::InvalidArgument(format!(
                "{mem} page of {} bytes exceeds {} bytes",
                data.len(),
                MAX_PAYLOAD_LEN - PAGE_HEADER_LEN
            )));
        }
        let len = length_u16("page", data.len())?;

        let desc = self.chip().memory(mem);
        let mut header: [u8; PAGE_HEADER_LEN] = [
            program_opcode(mem),
            0,
            0,
            desc.mode,
            desc.delay,
            desc.write[0],
            desc.write[1],
            desc.write[2],
            desc.poll1,
            desc.poll2,
        ];
        BigEndian::write_u16(&mut header[1..3], len);

        let mut cmd = Vec::with_capacity(header.len() + data.len());
        cmd.extend_from_slice(&header);
        cmd.extend_from_slice(data);
        self.command(Phase::WritePage, &cmd)
    }

    /// Write `data` to `mem` from address 0, one page at a time.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn write_mem(&mut self, mem: MemoryType, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Stk500Error::InvalidArgument(format!(
                "no data to write to {mem}"
            )));
        }
        self.require_prog_mode()?;

        let desc = self.chip().memory(mem);
        let shift = desc.address_offset;
        let mut cursor = PageCursor::new(data.len(), desc.page_size);
        let operation = match mem {
            MemoryType::Flash => Operation::WriteFlash,
            MemoryType::Eeprom => Operation::WriteEeprom,
        };

        while let Some((offset, page)) = cursor.next_page(data) {
            let address = u32::try_from(offset >> shift).map_err(|_| {
                Stk500Error::InvalidArgument(format!("{mem} offset {offset} is out of range"))
            })?;
            debug!(page = cursor.current, address, len = page.len(), "Programming page");

            self.load_address(mem, address)?;
            self.load_page(mem, page)?;

            self.emit(&Stk500Event::Progress {
                operation,
                current: cursor.offset as u64,
                total: data.len() as u64,
            });
        }

        info!(%mem, bytes = data.len(), pages = cursor.total, "Memory written");
        Ok(())
    }

    /// Read `length` bytes of `mem` in one command.
    ///
    /// Returns the raw reply, `length` plus the reply header bytes long.
    #[instrument(skip(self))]
    pub fn read_mem(&mut self, mem: MemoryType, length: usize) -> Result<Vec<u8>> {
        if length == 0 {
            return Err(Stk500Error::InvalidArgument(format!(
                "nothing to read from {mem}"
            )));
        }
        let len = length_u16("read", length)?;
        self.require_prog_mode()?;

        let mut cmd = [read_opcode(mem), 0, 0, self.chip().memory(mem).read[0]];
        BigEndian::write_u16(&mut cmd[1..3], len);

        let reply_len = length + self.layout().read_header_len;
        let reply = self.transact(Phase::ReadMemory, &cmd, reply_len)?;
        debug!(%mem, len = reply.len(), "Memory read");
        Ok(reply)
    }

    /// The `length` memory bytes carried by a [`read_mem`](Self::read_mem) reply.
    pub fn memory_data<'a>(&self, reply: &'a [u8], length: usize) -> Result<&'a [u8]> {
        let start = self.layout().status + 1;
        reply.get(start..start + length).ok_or(Stk500Error::ShortReply {
            phase: Phase::ReadMemory,
            expected: start + length,
            actual: reply.len(),
        })
    }

    /// Read `length` bytes of `mem` and return just the memory contents.
    ///
    /// A framed reply carries its data one byte further in than the read
    /// header allows for, so one extra byte is requested to cover it.
    pub fn dump_mem(&mut self, mem: MemoryType, length: usize) -> Result<Vec<u8>> {
        let request = length + self.layout().footer;
        let reply = self.read_mem(mem, request)?;
        Ok(self.memory_data(&reply, length)?.to_vec())
    }

    pub fn write_flash(&mut self, data: &[u8]) -> Result<()> {
        self.write_mem(MemoryType::Flash, data)
    }

    pub fn write_eeprom(&mut self, data: &[u8]) -> Result<()> {
        self.write_mem(MemoryType::Eeprom, data)
    }

    pub fn read_flash(&mut self, length: usize) -> Result<Vec<u8>> {
        self.read_mem(MemoryType::Flash, length)
    }

    pub fn read_eeprom(&mut self, length: usize) -> Result<Vec<u8>> {
        self.read_mem(MemoryType::Eeprom, length)
    }

    /// Read the device signature, one byte per round trip.
    #[instrument(skip(self))]
    pub fn get_chip_signature(&mut self) -> Result<Vec<u8>> {
        self.require_prog_mode()?;

        let sig = &self.chip().signature;
        let count = u8::try_from(sig.size).map_err(|_| {
            Stk500Error::InvalidArgument(format!("signature size {} is out of range", sig.size))
        })?;
        let mut cmd = [
            CMD_READ_SIGNATURE_ISP,
            sig.start_address,
            sig.read[0],
            sig.read[1],
            sig.read[2],
            sig.read[3],
        ];
        let layout = self.layout();

        let mut signature = Vec::with_capacity(usize::from(count));
        for index in 0..count {
            cmd[4] = index;
            let reply = self.transact(Phase::ReadSignature, &cmd, layout.value_reply_len)?;
            signature.push(reply_byte(Phase::ReadSignature, &reply, layout.value)?);

            self.emit(&Stk500Event::Progress {
                operation: Operation::ReadSignature,
                current: u64::from(index) + 1,
                total: u64::from(count),
            });
        }

        info!(signature = ?signature, "Device signature read");
        Ok(signature)
    }

    /// Read the device signature and compare it with the descriptor's, if set.
    pub fn verify_chip_signature(&mut self) -> Result<Vec<u8>> {
        let signature = self.get_chip_signature()?;
        if let Some(expected) = &self.chip().signature.value {
            compare_signature(Phase::ReadSignature, expected, &signature)?;
        }
        Ok(signature)
    }

    #[instrument(skip(self))]
    pub fn read_fuse(&mut self, name: &str) -> Result<u8> {
        self.require_prog_mode()?;

        let fuses = &self.chip().fuses;
        let opcode = fuses
            .read
            .get(name)
            .ok_or_else(|| Stk500Error::InvalidArgument(format!("unknown fuse '{name}'")))?;
        let mut cmd = Vec::with_capacity(2 + opcode.len());
        cmd.push(CMD_READ_FUSE_ISP);
        cmd.push(fuses.start_address);
        cmd.extend_from_slice(opcode);

        let layout = self.layout();
        let reply = self.transact(Phase::ReadFuse, &cmd, layout.value_reply_len)?;
        let value = reply_byte(Phase::ReadFuse, &reply, layout.value)?;
        debug!(fuse = name, value = format!("{value:02X}"), "Fuse read");
        Ok(value)
    }

    /// Read every fuse the descriptor knows, one after another.
    pub fn read_fuses(&mut self) -> Result<BTreeMap<String, u8>> {
        let names: Vec<String> = self.chip().fuse_names().map(str::to_owned).collect();
        let total = names.len() as u64;

        let mut fuses = BTreeMap::new();
        for (i, name) in names.into_iter().enumerate() {
            let value = self.read_fuse(&name)?;
            fuses.insert(name, value);
            self.emit(&Stk500Event::Progress {
                operation: Operation::ReadFuses,
                current: i as u64 + 1,
                total,
            });
        }
        Ok(fuses)
    }

    #[instrument(skip(self))]
    pub fn write_fuse(&mut self, name: &str, value: u8) -> Result<()> {
        self.require_prog_mode()?;

        let write = *self
            .chip()
            .fuses
            .write
            .get(name)
            .ok_or_else(|| Stk500Error::InvalidArgument(format!("unknown fuse '{name}'")))?;
        let cmd = [CMD_PROGRAM_FUSE_ISP, write[0], write[1], write[2], value];

        let reply_len = self.layout().program_reply_len;
        self.transact(Phase::WriteFuse, &cmd, reply_len)?;
        info!(fuse = name, value = format!("{value:02X}"), "Fuse written");
        Ok(())
    }

    pub fn read_lock_bits(&mut self) -> Result<u8> {
        self.require_prog_mode()?;

        let lock = self.chip().lock.as_ref().ok_or_else(|| {
            Stk500Error::InvalidArgument(format!("{} has no lock bits", self.chip().name))
        })?;
        let mut cmd = Vec::with_capacity(2 + lock.read.len());
        cmd.push(CMD_READ_LOCK_ISP);
        cmd.push(lock.start_address);
        cmd.extend_from_slice(&lock.read);

        let layout = self.layout();
        let reply = self.transact(Phase::ReadLock, &cmd, layout.value_reply_len)?;
        reply_byte(Phase::ReadLock, &reply, layout.value)
    }

    pub fn write_lock_bits(&mut self, value: u8) -> Result<()> {
        self.require_prog_mode()?;

        let write = self
            .chip()
            .lock
            .as_ref()
            .map(|lock| lock.write)
            .ok_or_else(|| {
                Stk500Error::InvalidArgument(format!("{} has no lock bits", self.chip().name))
            })?;
        let cmd = [CMD_PROGRAM_LOCK_ISP, write[0], write[1], write[2], value];

        let reply_len = self.layout().program_reply_len;
        self.transact(Phase::WriteLock, &cmd, reply_len)?;
        info!(value = format!("{value:02X}"), "Lock bits written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chip::test_chip;
    use crate::error::ErrorKind;
    use crate::session::testing::{RecordingObserver, ok, reply, session};
    use crate::session::{ProgMode, SessionConfig};
    use crate::transport::MockTransport;

    /// Payload of a framed or bare write.
    fn body(frameless: bool, write: &[u8]) -> Vec<u8> {
        if frameless {
            write.to_vec()
        } else {
            write[5..write.len() - 1].to_vec()
        }
    }

    fn queue_page_replies(mock: &MockTransport, frameless: bool, mem: MemoryType, pages: usize) {
        for _ in 0..pages {
            mock.queue_reply(&ok(frameless, CMD_LOAD_ADDRESS));
            mock.queue_reply(&ok(frameless, program_opcode(mem)));
        }
    }

    #[test]
    fn test_page_cursor() {
        let data = vec![0u8; 20];
        let mut cursor = PageCursor::new(data.len(), 8);
        assert_eq!(cursor.total, 3);

        let lens: Vec<(usize, usize)> = std::iter::from_fn(|| cursor.next_page(&data))
            .map(|(offset, page)| (offset, page.len()))
            .collect();
        assert_eq!(lens, [(0, 8), (8, 8), (16, 4)]);
        assert!(cursor.is_done());
    }

    #[test]
    fn test_sub_page_write_is_one_chunk() {
        let (mut session, mock) = session(true);
        queue_page_replies(&mock, true, MemoryType::Flash, 1);
        let data: Vec<u8> = (0..10).collect();

        session.write_flash(&data).unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], [CMD_LOAD_ADDRESS, 0x80, 0, 0, 0]);
        assert_eq!(
            writes[1][..10],
            [CMD_PROGRAM_FLASH_ISP, 0x00, 0x0A, 0xC1, 0x0A, 0x40, 0x4C, 0x20, 0x00, 0x00]
        );
        assert_eq!(writes[1][10..], data[..]);
    }

    #[test]
    fn test_whole_pages_are_addressed_in_words() {
        let (mut session, mock) = session(false);
        queue_page_replies(&mock, false, MemoryType::Flash, 3);
        let data = vec![0xA5; 3 * 256];

        session.write_flash(&data).unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 6);
        let addresses: Vec<Vec<u8>> = writes.iter().step_by(2).map(|w| body(false, w)).collect();
        assert_eq!(
            addresses,
            [
                vec![CMD_LOAD_ADDRESS, 0x80, 0x00, 0x00, 0x00],
                vec![CMD_LOAD_ADDRESS, 0x80, 0x00, 0x00, 0x80],
                vec![CMD_LOAD_ADDRESS, 0x80, 0x00, 0x01, 0x00],
            ]
        );
        for page in writes.iter().skip(1).step_by(2) {
            let page = body(false, page);
            assert_eq!(page[1..3], [0x01, 0x00]);
            assert_eq!(page.len(), 10 + 256);
        }
        let seqs: Vec<u8> = writes.iter().map(|w| w[1]).collect();
        assert_eq!(seqs, [0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_last_page_may_be_short() {
        let (mut session, mock) = session(true);
        queue_page_replies(&mock, true, MemoryType::Eeprom, 3);

        session.write_eeprom(&[0x11; 20]).unwrap();

        let writes = mock.get_writes();
        let addresses: Vec<u8> = writes.iter().step_by(2).map(|w| w[4]).collect();
        assert_eq!(addresses, [0, 8, 16]);
        assert!(writes.iter().step_by(2).all(|w| w[1] == 0x00));
        let lens: Vec<u8> = writes.iter().skip(1).step_by(2).map(|w| w[2]).collect();
        assert_eq!(lens, [8, 8, 4]);
        assert_eq!(writes[1][0], CMD_PROGRAM_EEPROM_ISP);
    }

    #[test]
    fn test_failed_page_stops_write() {
        let (mut session, mock) = session(true);
        mock.queue_reply(&ok(true, CMD_LOAD_ADDRESS));
        mock.queue_reply(&[CMD_PROGRAM_FLASH_ISP, STATUS_CMD_TOUT]);
        queue_page_replies(&mock, true, MemoryType::Flash, 1);

        let err = session.write_flash(&[0u8; 512]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumOrStatus);
        assert_eq!(err.phase(), Some(Phase::WritePage));
        assert_eq!(mock.get_writes().len(), 2);
        assert_eq!(mock.pending_replies(), 2);
    }

    #[test]
    fn test_oversized_page_rejected() {
        let (mut session, mock) = session(false);
        let page = vec![0u8; MAX_PAYLOAD_LEN - PAGE_HEADER_LEN + 1];
        let err = session.load_page(MemoryType::Flash, &page).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_empty_write_rejected() {
        let (mut session, mock) = session(true);
        let err = session.write_eeprom(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_write_refused_after_prog_mode_failure() {
        let (mut session, mock) = session(true);
        mock.queue_reply(&[CMD_ENTER_PROGMODE_ISP, STATUS_CMD_FAILED]);
        assert!(session.enter_programming_mode().is_err());
        assert_eq!(session.prog_mode(), ProgMode::Failed);

        assert!(matches!(
            session.write_flash(&[1, 2, 3]),
            Err(Stk500Error::ProgModeUnavailable)
        ));
        assert!(matches!(
            session.read_fuses(),
            Err(Stk500Error::ProgModeUnavailable)
        ));
        assert_eq!(mock.get_writes().len(), 1);
    }

    #[test]
    fn test_read_mem_lengths() {
        for (frameless, header) in [(true, 3), (false, 6)] {
            let (mut session, mock) = session(frameless);
            let mut reply = vec![0u8; 16 + header];
            reply[session.layout().status] = STATUS_CMD_OK;
            mock.queue_reply(&reply);

            let data = session.read_flash(16).unwrap();
            assert_eq!(data.len(), 16 + header);
            assert_eq!(mock.get_reads(), [16 + header]);
            assert_eq!(
                body(frameless, &mock.get_writes()[0]),
                [CMD_READ_FLASH_ISP, 0x00, 0x10, 0x20]
            );
        }
    }

    #[test]
    fn test_read_mem_status_checked() {
        let (mut session, mock) = session(true);
        mock.queue_reply(&[CMD_READ_EEPROM_ISP, STATUS_CMD_FAILED, 0, 0]);
        let err = session.read_eeprom(1).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::ReadMemory));
    }

    #[test]
    fn test_read_mem_length_limit() {
        let (mut session, mock) = session(true);
        let err = session.read_flash(0x1_0000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_memory_data() {
        let (session, _) = session(true);
        let reply = [CMD_READ_FLASH_ISP, STATUS_CMD_OK, 0xAA, 0xBB, STATUS_CMD_OK];
        assert_eq!(session.memory_data(&reply, 2).unwrap(), [0xAA, 0xBB]);

        let err = session.memory_data(&reply[..3], 2).unwrap_err();
        assert!(matches!(
            err,
            Stk500Error::ShortReply {
                phase: Phase::ReadMemory,
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_memory_data_framed_reply_is_short() {
        let (mut session, mock) = session(false);
        mock.queue_reply(&reply(
            false,
            &[CMD_READ_FLASH_ISP, STATUS_CMD_OK, 0xA1, 0xA2, 0xA3, 0xA4, STATUS_CMD_OK],
        ));

        let raw = session.read_flash(4).unwrap();
        assert_eq!(raw.len(), 10);
        let err = session.memory_data(&raw, 4).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::ReadMemory));
    }

    #[test]
    fn test_dump_mem_returns_every_byte() {
        for frameless in [true, false] {
            let (mut session, mock) = session(frameless);
            mock.queue_reply(&reply(
                frameless,
                &[CMD_READ_FLASH_ISP, STATUS_CMD_OK, 0xA1, 0xA2, 0xA3, 0xA4, 0xFF, STATUS_CMD_OK],
            ));

            let data = session.dump_mem(MemoryType::Flash, 4).unwrap();
            assert_eq!(data, [0xA1, 0xA2, 0xA3, 0xA4]);
        }
    }

    #[test]
    fn test_chip_signature_one_byte_per_round_trip() {
        let (mut session, mock) = session(true);
        for byte in [0x1E, 0x98, 0x01] {
            mock.queue_reply(&[CMD_READ_SIGNATURE_ISP, STATUS_CMD_OK, byte, STATUS_CMD_OK]);
        }

        assert_eq!(session.verify_chip_signature().unwrap(), [0x1E, 0x98, 0x01]);

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 3);
        for (i, write) in writes.iter().enumerate() {
            assert_eq!(
                write[..],
                [CMD_READ_SIGNATURE_ISP, 0x04, 0x30, 0x00, i as u8, 0x00]
            );
        }
        assert_eq!(mock.get_reads(), [4, 4, 4]);
    }

    #[test]
    fn test_chip_signature_mismatch() {
        let (mut session, mock) = session(false);
        for byte in [0x1E, 0x95, 0x0F] {
            mock.queue_reply(&reply(false, &[CMD_READ_SIGNATURE_ISP, STATUS_CMD_OK, byte, 0]));
        }

        let err = session.verify_chip_signature().unwrap_err();
        assert!(matches!(err, Stk500Error::SignatureMismatch { .. }));
        assert_eq!(err.phase(), Some(Phase::ReadSignature));
        assert_eq!(mock.get_reads(), [10, 10, 10]);
    }

    #[test]
    fn test_signature_failure_stops_reading() {
        let (mut session, mock) = session(true);
        mock.queue_reply(&[CMD_READ_SIGNATURE_ISP, STATUS_CMD_OK, 0x1E, 0]);
        mock.queue_reply(&[CMD_READ_SIGNATURE_ISP, STATUS_CMD_FAILED]);

        assert!(session.get_chip_signature().is_err());
        assert_eq!(mock.get_writes().len(), 2);
    }

    #[test]
    fn test_read_fuses_in_name_order() {
        let (mut session, mock) = session(true);
        for value in [0xFD, 0xD8, 0xFF] {
            mock.queue_reply(&[CMD_READ_FUSE_ISP, STATUS_CMD_OK, value, STATUS_CMD_OK]);
        }

        let fuses = session.read_fuses().unwrap();
        assert_eq!(fuses["ext"], 0xFD);
        assert_eq!(fuses["high"], 0xD8);
        assert_eq!(fuses["low"], 0xFF);

        let writes = mock.get_writes();
        assert_eq!(writes[0], [CMD_READ_FUSE_ISP, 0x04, 0x50, 0x08, 0x00, 0x00]);
        assert_eq!(writes[1], [CMD_READ_FUSE_ISP, 0x04, 0x58, 0x08, 0x00, 0x00]);
        assert_eq!(writes[2], [CMD_READ_FUSE_ISP, 0x04, 0x50, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_failed_fuse_read_stops_reading() {
        let (mut session, mock) = session(true);
        mock.queue_reply(&[CMD_READ_FUSE_ISP, STATUS_CMD_FAILED]);
        for value in [0xD8, 0xFF] {
            mock.queue_reply(&[CMD_READ_FUSE_ISP, STATUS_CMD_OK, value, STATUS_CMD_OK]);
        }

        let err = session.read_fuses().unwrap_err();
        assert_eq!(err.phase(), Some(Phase::ReadFuse));
        assert_eq!(mock.get_writes().len(), 1);
        assert_eq!(mock.pending_replies(), 2);
    }

    #[test]
    fn test_unknown_fuse_rejected() {
        let (mut session, mock) = session(true);
        assert_eq!(
            session.read_fuse("lfuse").unwrap_err().kind(),
            ErrorKind::Argument
        );
        assert_eq!(
            session.write_fuse("lfuse", 0xFF).unwrap_err().kind(),
            ErrorKind::Argument
        );
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_write_fuse() {
        for (frameless, reply_len) in [(true, 3), (false, 9)] {
            let (mut session, mock) = session(frameless);
            mock.queue_reply(&reply(
                frameless,
                &[CMD_PROGRAM_FUSE_ISP, STATUS_CMD_OK, STATUS_CMD_OK],
            ));

            session.write_fuse("high", 0xD8).unwrap();
            assert_eq!(
                body(frameless, &mock.get_writes()[0]),
                [CMD_PROGRAM_FUSE_ISP, 0xAC, 0xA8, 0x00, 0xD8]
            );
            assert_eq!(mock.get_reads(), [reply_len]);
        }
    }

    #[test]
    fn test_write_fuse_status_checked() {
        let (mut session, mock) = session(true);
        mock.queue_reply(&[CMD_PROGRAM_FUSE_ISP, STATUS_CMD_FAILED, 0]);
        let err = session.write_fuse("low", 0xFF).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::WriteFuse));
    }

    #[test]
    fn test_lock_bits() {
        let (mut session, mock) = session(true);
        mock.queue_reply(&[CMD_READ_LOCK_ISP, STATUS_CMD_OK, 0x3F, STATUS_CMD_OK]);
        mock.queue_reply(&[CMD_PROGRAM_LOCK_ISP, STATUS_CMD_OK, STATUS_CMD_OK]);

        assert_eq!(session.read_lock_bits().unwrap(), 0x3F);
        session.write_lock_bits(0x3C).unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes[0], [CMD_READ_LOCK_ISP, 0x04, 0x58, 0x00, 0x00, 0x00]);
        assert_eq!(writes[1], [CMD_PROGRAM_LOCK_ISP, 0xAC, 0xE0, 0x00, 0x3C]);
    }

    #[test]
    fn test_lock_bits_need_descriptor() {
        let mut chip = test_chip();
        chip.lock = None;
        let mock = MockTransport::new();
        let mut session = Session::new(mock.clone(), chip, SessionConfig::default());

        assert_eq!(
            session.read_lock_bits().unwrap_err().kind(),
            ErrorKind::Argument
        );
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_write_reports_progress() {
        let mock = MockTransport::new();
        let observer = Arc::new(RecordingObserver::default());
        let config = SessionConfig {
            frameless: true,
            ..Default::default()
        };
        let mut session = Session::with_observer(mock.clone(), test_chip(), config, observer.clone());
        queue_page_replies(&mock, true, MemoryType::Eeprom, 2);

        session.write_eeprom(&[0u8; 12]).unwrap();

        let progress: Vec<(u64, u64)> = observer
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Stk500Event::Progress {
                    operation: Operation::WriteEeprom,
                    current,
                    total,
                } => Some((*current, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, [(8, 12), (12, 12)]);
    }
}
