//! Serial link synchronization.
//!
//! A serial line carries no connection state, so before any command the
//! host keeps sending a sign-on frame until the programmer answers. USB
//! transports skip this step.

use std::fmt;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{Phase, Result, Stk500Error};
use crate::protocol::constants::{
    SIGN_ON_FRAME, SIGN_ON_REPLY_LEN, SYNC_ATTEMPTS, SYNC_RETRY_DELAY_MS,
};
use crate::transport::{Transport, TransportError};

/// Handshake tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sign-on frames sent before giving up.
    pub max_attempts: u32,
    /// Wait between sending a frame and looking for its reply.
    pub retry_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: SYNC_ATTEMPTS,
            retry_delay_ms: SYNC_RETRY_DELAY_MS,
        }
    }
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Nothing sent yet.
    #[default]
    NoContact,
    /// Sign-on frame `attempt` sent, waiting for data.
    AttemptPending { attempt: u32 },
    /// Programmer answered on attempt `attempts`.
    Synced { attempts: u32 },
    /// No answer after `attempts` frames.
    Failed { attempts: u32 },
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::NoContact => write!(f, "NO_CONTACT"),
            SyncState::AttemptPending { attempt } => write!(f, "ATTEMPT_PENDING({attempt})"),
            SyncState::Synced { attempts } => write!(f, "SYNCED({attempts})"),
            SyncState::Failed { attempts } => write!(f, "FAILED({attempts})"),
        }
    }
}

impl SyncState {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncState::Synced { .. })
    }
}

/// Drives the sign-on handshake over a transport.
#[derive(Debug, Default)]
pub struct LinkSynchronizer {
    config: SyncConfig,
    state: SyncState,
}

impl LinkSynchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            state: SyncState::NoContact,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    fn goto_state(&mut self, new_state: SyncState) {
        debug!(from = %self.state, to = %new_state, "Sync state transition");
        self.state = new_state;
    }

    /// Send sign-on frames until one is answered.
    ///
    /// Returns the raw sign-on reply. Read timeouts and empty reads count as
    /// "no data yet"; any other transport error aborts immediately.
    #[instrument(skip_all, fields(max_attempts = self.config.max_attempts))]
    pub fn run<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<Vec<u8>> {
        let max_attempts = self.config.max_attempts.max(1);
        let delay = Duration::from_millis(self.config.retry_delay_ms);
        self.goto_state(SyncState::NoContact);

        for attempt in 1..=max_attempts {
            self.goto_state(SyncState::AttemptPending { attempt });
            transport
                .write(&SIGN_ON_FRAME)
                .map_err(Stk500Error::transport(Phase::Sync))?;
            thread::sleep(delay);

            match transport.read(SIGN_ON_REPLY_LEN) {
                Ok(reply) if !reply.is_empty() => {
                    // Earlier attempts may still be answered late.
                    let stale = match transport.discard_input() {
                        Ok(stale) => stale,
                        Err(source) => {
                            self.goto_state(SyncState::Failed { attempts: attempt });
                            return Err(Stk500Error::Transport {
                                phase: Phase::Sync,
                                source,
                            });
                        }
                    };
                    if stale > 0 {
                        debug!(stale, "Dropped extra sign-on replies");
                    }
                    self.goto_state(SyncState::Synced { attempts: attempt });
                    info!(attempt, "Programmer answered sign-on");
                    return Ok(reply);
                }
                Ok(_) | Err(TransportError::Timeout { .. }) => {
                    warn!(attempt, "No sign-on reply yet, retrying");
                }
                Err(source) => {
                    self.goto_state(SyncState::Failed { attempts: attempt });
                    return Err(Stk500Error::Transport {
                        phase: Phase::Sync,
                        source,
                    });
                }
            }
        }

        self.goto_state(SyncState::Failed {
            attempts: max_attempts,
        });
        warn!(attempts = max_attempts, "Programmer never answered sign-on");
        Err(Stk500Error::Sync {
            attempts: max_attempts,
        })
    }
}
