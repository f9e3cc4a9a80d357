//! STK500v2 session - command/response engine.
//!
//! A [`Session`] owns one transport, the target's [`ChipDescriptor`] and the
//! frame sequence counter. Every operation is a strict request/reply cycle:
//! a command is written, its reply is read and its status byte checked
//! before the next command goes out.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::chip::{ChipDescriptor, MemoryType};
use crate::error::{Phase, Result, Stk500Error};
use crate::events::{LogLevel, PacketDirection, SessionObserver, Stk500Event, TracingObserver};
use crate::protocol::constants::*;
use crate::protocol::{ReplyLayout, Status, frame};
use crate::sync::{LinkSynchronizer, SyncConfig, SyncState};
use crate::transport::{Transport, TransportKind};

/// Bytes of each packet copied into observer events.
const PACKET_PREVIEW_LEN: usize = 32;

/// Configuration for an STK500v2 session.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Send bare payloads instead of framed messages. Pair with a transport
    /// that delimits and unwraps replies itself.
    pub frameless: bool,
    /// Serial sign-on handshake.
    pub sync: SyncConfig,
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Whether the target is in ISP programming mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgMode {
    #[default]
    Inactive,
    Active,
    /// The last attempt to enter programming mode failed. Memory access is
    /// refused until a later attempt succeeds.
    Failed,
}

/// Programmer hardware and firmware revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgrammerVersion {
    pub hardware: u8,
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for ProgrammerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hw {}, fw {}.{:02}", self.hardware, self.major, self.minor)
    }
}

/// Compare a sign-on identity against the expected one, byte for byte.
pub fn verify_signature(expected: &[u8], actual: &[u8]) -> Result<()> {
    compare_signature(Phase::SignOn, expected, actual)
}

pub(crate) fn compare_signature(phase: Phase, expected: &[u8], actual: &[u8]) -> Result<()> {
    if expected == actual {
        return Ok(());
    }
    Err(Stk500Error::SignatureMismatch {
        phase,
        expected: expected.to_vec(),
        actual: actual.to_vec(),
    })
}

/// Byte at `pos`, or a short-reply error naming the phase.
pub(crate) fn reply_byte(phase: Phase, reply: &[u8], pos: usize) -> Result<u8> {
    reply
        .get(pos)
        .copied()
        .ok_or(Stk500Error::ShortReply {
            phase,
            expected: pos + 1,
            actual: reply.len(),
        })
}

/// STK500v2 session over a single programmer connection.
pub struct Session<T: Transport, O: SessionObserver = TracingObserver> {
    transport: T,
    chip: ChipDescriptor,
    config: SessionConfig,
    observer: Arc<O>,
    seq: u8,
    prog_mode: ProgMode,
}

impl<T: Transport> Session<T, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(transport: T, chip: ChipDescriptor, config: SessionConfig) -> Self {
        Self::with_observer(transport, chip, config, Arc::new(TracingObserver))
    }
}

impl<T: Transport, O: SessionObserver> Session<T, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(
        transport: T,
        chip: ChipDescriptor,
        config: SessionConfig,
        observer: Arc<O>,
    ) -> Self {
        Self {
            transport,
            chip,
            config,
            observer,
            seq: 0,
            prog_mode: ProgMode::Inactive,
        }
    }

    pub fn chip(&self) -> &ChipDescriptor {
        &self.chip
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Sequence number the next frame will carry.
    pub fn sequence(&self) -> u8 {
        self.seq
    }

    pub fn is_frameless(&self) -> bool {
        self.config.frameless
    }

    pub fn layout(&self) -> ReplyLayout {
        ReplyLayout::for_mode(self.config.frameless)
    }

    pub fn prog_mode(&self) -> ProgMode {
        self.prog_mode
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub(crate) fn emit(&self, event: &Stk500Event) {
        self.observer.on_event(event);
    }

    fn emit_packet(&self, direction: PacketDirection, seq: Option<u8>, data: &[u8]) {
        self.emit(&Stk500Event::Packet {
            direction,
            seq,
            length: data.len(),
            data: Some(data.iter().take(PACKET_PREVIEW_LEN).copied().collect()),
        });
    }

    /// Open the transport, prepare its interface and, on serial links, run
    /// the sign-on handshake.
    ///
    /// Returns the raw handshake reply for serial links, `None` otherwise.
    #[instrument(skip(self), fields(transport = %self.transport.kind()))]
    pub fn set_up(&mut self) -> Result<Option<Vec<u8>>> {
        self.transport
            .open()
            .map_err(Stk500Error::transport(Phase::Open))?;
        self.transport
            .set_up_interface()
            .map_err(Stk500Error::transport(Phase::SetUpInterface))?;

        let kind = self.transport.kind();
        self.emit(&Stk500Event::Connected { transport: kind });
        if kind != TransportKind::Serial {
            return Ok(None);
        }

        let mut sync = LinkSynchronizer::new(self.config.sync.clone());
        let reply = sync.run(&mut self.transport)?;
        if let SyncState::Synced { attempts } = sync.state() {
            self.emit(&Stk500Event::Synced { attempts });
        }
        Ok(Some(reply))
    }

    /// Release the transport. Queued inbound data is discarded.
    #[instrument(skip(self))]
    pub fn close(&mut self) -> Result<()> {
        self.transport
            .close()
            .map_err(Stk500Error::transport(Phase::Close))?;
        self.prog_mode = ProgMode::Inactive;
        self.emit(&Stk500Event::Closed);
        Ok(())
    }

    /// Wrap `payload` in the message envelope and advance the sequence counter.
    pub fn frame(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let framed = frame::encode(payload, self.seq)?;
        self.seq = self.seq.wrapping_add(1);
        Ok(framed)
    }

    /// Send one message, framed unless the session is frameless.
    pub fn write(&mut self, payload: &[u8]) -> Result<()> {
        self.send(Phase::Write, payload)
    }

    /// Read the next reply, at most `count` bytes.
    pub fn read(&mut self, count: usize) -> Result<Vec<u8>> {
        self.receive(Phase::Read, count)
    }

    pub(crate) fn send(&mut self, phase: Phase, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(Stk500Error::InvalidArgument(format!(
                "{phase}: message payload is empty"
            )));
        }

        let (data, seq) = if self.config.frameless {
            (payload.to_vec(), None)
        } else {
            let seq = self.seq;
            (self.frame(payload)?, Some(seq))
        };

        debug!(%phase, ?seq, len = data.len(), "Sending message");
        self.transport
            .write(&data)
            .map_err(Stk500Error::transport(phase))?;
        self.emit_packet(PacketDirection::Tx, seq, &data);
        Ok(())
    }

    pub(crate) fn receive(&mut self, phase: Phase, count: usize) -> Result<Vec<u8>> {
        let data = self
            .transport
            .read(count)
            .map_err(Stk500Error::transport(phase))?;
        debug!(%phase, requested = count, len = data.len(), "Received reply");

        if !data.is_empty() {
            let seq = if self.config.frameless {
                None
            } else {
                data.get(1).copied()
            };
            self.emit_packet(PacketDirection::Rx, seq, &data);
        }
        Ok(data)
    }

    pub(crate) fn check_status(&self, phase: Phase, reply: &[u8]) -> Result<()> {
        let status = Status::from_byte(reply_byte(phase, reply, self.layout().status)?);
        if status.is_ok() {
            return Ok(());
        }
        self.emit(&Stk500Event::Log {
            level: LogLevel::Warn,
            message: format!("Programmer rejected {phase}: {status}"),
        });
        Err(Stk500Error::Status { phase, status })
    }

    /// Send `payload`, read up to `reply_len` bytes and check the status byte.
    pub(crate) fn transact(
        &mut self,
        phase: Phase,
        payload: &[u8],
        reply_len: usize,
    ) -> Result<Vec<u8>> {
        self.send(phase, payload)?;
        let reply = self.receive(phase, reply_len)?;
        self.check_status(phase, &reply)?;
        Ok(reply)
    }

    /// Transaction whose reply is a bare status.
    pub(crate) fn command(&mut self, phase: Phase, payload: &[u8]) -> Result<()> {
        let reply_len = self.layout().status_reply_len;
        self.transact(phase, payload, reply_len).map(drop)
    }

    /// Send a command and require a `STATUS_CMD_OK` reply.
    pub fn send_cmd(&mut self, payload: &[u8]) -> Result<()> {
        self.command(Phase::SendCommand, payload)
    }

    pub(crate) fn require_prog_mode(&self) -> Result<()> {
        if self.prog_mode == ProgMode::Failed {
            return Err(Stk500Error::ProgModeUnavailable);
        }
        Ok(())
    }

    fn set_prog_mode(&mut self, mode: ProgMode) {
        if self.prog_mode == mode {
            return;
        }
        debug!(from = ?self.prog_mode, to = ?mode, "Programming mode transition");
        let was_active = self.prog_mode == ProgMode::Active;
        self.prog_mode = mode;
        if was_active != (mode == ProgMode::Active) {
            self.emit(&Stk500Event::ProgModeChanged {
                active: mode == ProgMode::Active,
            });
        }
    }

    /// Sign on and return the programmer's identity string (e.g. `AVRISP_2`).
    #[instrument(skip(self))]
    pub fn get_signature(&mut self) -> Result<Vec<u8>> {
        let layout = self.layout();
        let reply = self.transact(Phase::SignOn, &[CMD_SIGN_ON], layout.sign_on_reply_len)?;

        let end = reply.len().saturating_sub(layout.footer);
        if end < layout.identity {
            return Err(Stk500Error::ShortReply {
                phase: Phase::SignOn,
                expected: layout.identity + layout.footer,
                actual: reply.len(),
            });
        }
        let identity = reply[layout.identity..end].to_vec();
        info!(identity = %String::from_utf8_lossy(&identity), "Programmer signed on");
        Ok(identity)
    }

    /// Sign on and require the identity to equal `expected`.
    pub fn sign_on(&mut self, expected: &[u8]) -> Result<Vec<u8>> {
        let identity = self.get_signature()?;
        verify_signature(expected, &identity)?;
        Ok(identity)
    }

    #[instrument(skip(self))]
    pub fn set_parameter(&mut self, param: u8, value: u8) -> Result<()> {
        self.command(Phase::SetParameter, &[CMD_SET_PARAMETER, param, value])
    }

    #[instrument(skip(self))]
    pub fn get_parameter(&mut self, param: u8) -> Result<u8> {
        let layout = self.layout();
        let reply = self.transact(
            Phase::GetParameter,
            &[CMD_GET_PARAMETER, param],
            layout.parameter_reply_len,
        )?;
        reply_byte(Phase::GetParameter, &reply, layout.value)
    }

    pub fn programmer_version(&mut self) -> Result<ProgrammerVersion> {
        Ok(ProgrammerVersion {
            hardware: self.get_parameter(PARAM_HW_VER)?,
            major: self.get_parameter(PARAM_SW_MAJOR)?,
            minor: self.get_parameter(PARAM_SW_MINOR)?,
        })
    }

    /// Target supply voltage in volts.
    pub fn target_voltage(&mut self) -> Result<f32> {
        let tenths = self.get_parameter(PARAM_VTARGET)?;
        Ok(f32::from(tenths) / 10.0)
    }

    /// Point the programmer's address register at `address` in `mem`.
    ///
    /// The unit of `address` is the memory's native unit (words for flash).
    #[instrument(skip(self))]
    pub fn load_address(&mut self, mem: MemoryType, address: u32) -> Result<()> {
        let mut cmd = [CMD_LOAD_ADDRESS, 0, 0, 0, 0];
        BigEndian::write_u32(&mut cmd[1..], address);
        if mem == MemoryType::Flash {
            cmd[1] |= FLASH_ADDRESS_FLAG;
        }
        self.command(Phase::LoadAddress, &cmd)
    }

    #[instrument(skip(self))]
    pub fn enter_programming_mode(&mut self) -> Result<()> {
        let chip = &self.chip;
        let cmd = [
            CMD_ENTER_PROGMODE_ISP,
            chip.timeout,
            chip.stab_delay,
            chip.cmdexe_delay,
            chip.sync_loops,
            chip.byte_delay,
            chip.poll_value,
            chip.poll_index,
            chip.pgm_enable[0],
            chip.pgm_enable[1],
            chip.pgm_enable[2],
            chip.pgm_enable[3],
        ];

        match self.command(Phase::EnterProgMode, &cmd) {
            Ok(()) => {
                self.set_prog_mode(ProgMode::Active);
                Ok(())
            }
            Err(e) => {
                self.set_prog_mode(ProgMode::Failed);
                Err(e)
            }
        }
    }

    #[instrument(skip(self))]
    pub fn exit_programming_mode(&mut self) -> Result<()> {
        let cmd = [
            CMD_LEAVE_PROGMODE_ISP,
            self.chip.pre_delay,
            self.chip.post_delay,
        ];
        self.command(Phase::LeaveProgMode, &cmd)?;
        self.set_prog_mode(ProgMode::Inactive);
        Ok(())
    }

    /// Erase flash and EEPROM. Success is the status byte alone.
    #[instrument(skip(self))]
    pub fn erase_chip(&mut self) -> Result<()> {
        self.require_prog_mode()?;
        let erase = &self.chip.erase;
        let cmd = [
            CMD_CHIP_ERASE_ISP,
            erase.delay,
            self.chip.poll_method,
            erase.cmd[0],
            erase.cmd[1],
            erase.cmd[2],
            erase.cmd[3],
        ];
        self.command(Phase::EraseChip, &cmd)?;
        info!(chip = %self.chip.name, "Chip erased");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;
    use crate::chip::test_chip;
    use crate::events::NullObserver;
    use crate::transport::MockTransport;

    /// Reply as the programmer would send it in the given mode.
    pub fn reply(frameless: bool, body: &[u8]) -> Vec<u8> {
        if frameless {
            body.to_vec()
        } else {
            frame::encode(body, 0).unwrap()
        }
    }

    pub fn ok(frameless: bool, cmd: u8) -> Vec<u8> {
        reply(frameless, &[cmd, STATUS_CMD_OK])
    }

    pub fn session(frameless: bool) -> (Session<MockTransport, NullObserver>, MockTransport) {
        let mock = MockTransport::new();
        let config = SessionConfig {
            frameless,
            ..Default::default()
        };
        let session =
            Session::with_observer(mock.clone(), test_chip(), config, Arc::new(NullObserver));
        (session, mock)
    }

    /// Observer that keeps every event.
    #[derive(Default)]
    pub struct RecordingObserver {
        pub events: Mutex<Vec<Stk500Event>>,
    }

    impl SessionObserver for RecordingObserver {
        fn on_event(&self, event: &Stk500Event) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
