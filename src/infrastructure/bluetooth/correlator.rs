//! Command correlator
//!
//! Every outgoing write goes through one slot. Commands whose opcode has an
//! entry in [`protocol::expected_response`] wait for the matching
//! notification; the rest are fire-and-forget. Timeouts and write failures
//! are retried with a fixed backoff. Missing-GATT errors are not retried.

use super::macros::Macro;
use super::protocol::{self, CommandPacket, WandCommand};
use super::{guard_gatt, WandTransport};
use crate::domain::settings::Settings;
use crate::error::WandError;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorConfig {
    /// How long to wait for a response per attempt
    pub timeout: Duration,
    /// Total attempts, including the first
    pub attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl CorrelatorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: Duration::from_millis(settings.command_timeout_ms),
            attempts: settings.command_retries.max(1),
            backoff: Duration::from_millis(settings.retry_backoff_ms),
        }
    }
}

struct PendingResponse {
    opcode: u8,
    wake: oneshot::Sender<()>,
}

pub struct CommandCorrelator<T> {
    transport: Arc<T>,
    config: CorrelatorConfig,
    in_flight: tokio::sync::Mutex<()>,
    pending: Mutex<Option<PendingResponse>>,
}

impl<T: WandTransport> CommandCorrelator<T> {
    pub fn new(transport: Arc<T>, config: CorrelatorConfig) -> Self {
        Self {
            transport,
            config,
            in_flight: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Send `opcode` + `payload`, waiting up to `timeout` per attempt for
    /// the response when one is expected.
    pub async fn send(&self, opcode: u8, payload: &[u8], timeout: Duration) -> Result<(), WandError> {
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.push(opcode);
        bytes.extend_from_slice(payload);
        self.send_bytes(&bytes, timeout).await
    }

    pub async fn send_packet(&self, packet: &CommandPacket) -> Result<(), WandError> {
        self.send_bytes(&packet.to_bytes(), self.config.timeout).await
    }

    pub async fn send_command(&self, command: WandCommand) -> Result<(), WandError> {
        debug!("Sending {:?}", command);
        self.send_packet(&command.to_packet()).await
    }

    pub async fn send_macro(&self, sequence: &Macro) -> Result<(), WandError> {
        self.send_bytes(&sequence.to_bytes(), self.config.timeout).await
    }

    pub async fn send_bytes(&self, bytes: &[u8], timeout: Duration) -> Result<(), WandError> {
        let opcode = *bytes.first().ok_or(WandError::EmptyPacket)?;
        let expected = protocol::expected_response(opcode);
        let attempts = self.config.attempts.max(1);

        let _slot = self.in_flight.lock().await;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.attempt(bytes, expected, timeout).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_missing_gatt() => {
                    error!("Command 0x{:02X} failed: {}", opcode, e);
                    return Err(e);
                }
                Err(e) => {
                    if attempt < attempts {
                        warn!(
                            "Command 0x{:02X} attempt {}/{} failed: {}",
                            opcode, attempt, attempts, e
                        );
                        tokio::time::sleep(self.config.backoff).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let e = last_error.unwrap_or(WandError::NotConnected);
        error!("Command 0x{:02X} failed after {} attempts: {}", opcode, attempts, e);
        Err(e)
    }

    async fn attempt(
        &self,
        bytes: &[u8],
        expected: Option<u8>,
        timeout: Duration,
    ) -> Result<(), WandError> {
        let wake = expected.map(|opcode| (opcode, self.arm(opcode)));
        trace!("Writing {:02X?}", bytes);

        let result = match guard_gatt(self.transport.as_ref(), self.transport.write_command(bytes)).await
        {
            Err(e) => Err(e),
            Ok(()) => match wake {
                None => Ok(()),
                Some((opcode, rx)) => match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(())) => Ok(()),
                    _ => Err(WandError::Timeout {
                        opcode,
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                },
            },
        };

        self.disarm();
        result
    }

    fn arm(&self, opcode: u8) -> oneshot::Receiver<()> {
        let (wake, rx) = oneshot::channel();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = Some(PendingResponse { opcode, wake });
        rx
    }

    fn disarm(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = None;
    }

    /// Called for every notification. Wakes the in-flight command if it is
    /// waiting for `opcode`.
    pub fn on_notification(&self, opcode: u8) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.take() {
            Some(waiting) if waiting.opcode == opcode => {
                trace!("Response 0x{:02X} matched", opcode);
                let _ = waiting.wake.send(());
                true
            }
            other => {
                *pending = other;
                false
            }
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
