//! Bluetooth Module
//!
//! Talks to the wand over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      WandService                         │
//! │  (Orchestrator - public API for the host application)    │
//! └──────────┬──────────────────┬───────────────────────────┘
//!            │ commands         │ TransportEvent
//!            ▼                  ▼
//! ┌──────────────────┐  ┌────────────────┐   ┌──────────────┐
//! │ CommandCorrelator│  │ NotificationRouter│→│ SpellTracker │
//! │ - one in flight  │  │ - opcode dispatch │  │ + classifier │
//! │ - retry/timeout  │  │ - button edges    │  └──────────────┘
//! └────────┬─────────┘  └────────────────┘
//!          ▼
//! ┌──────────────────┐   ┌──────────┐  ┌──────────┐
//! │  WandTransport   │   │ Protocol │  │  Macros  │
//! │ (WinRT GATT)     │   │  codec   │  │ compiler │
//! └──────────────────┘   └──────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Opcodes, command encoding and notification decoding
//! - [`macros`] - LED/haptic macro compiler
//! - [`correlator`] - Serialized command writes with response matching
//! - [`router`] - Notification dispatch and gesture state machine
//! - [`service`] - Main service coordinator
//! - `connection` - WinRT GATT transport (Windows only)

#[cfg(windows)]
pub mod connection;
pub mod correlator;
pub mod macros;
#[cfg(test)]
pub(crate) mod mock;
pub mod protocol;
pub mod router;
pub mod service;

use crate::error::WandError;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::warn;

// Re-export main service for convenience
pub use service::WandService;

/// Raw traffic delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes from the notification characteristic.
    Notification(Vec<u8>),
    /// Bytes from the battery level characteristic.
    Battery(Vec<u8>),
    /// The link went down.
    Disconnected,
}

/// A connected, notification-capable channel to one wand.
pub trait WandTransport: Send + Sync + 'static {
    /// Write one packet to the command characteristic.
    fn write_command(&self, data: &[u8]) -> impl Future<Output = Result<(), WandError>> + Send;

    /// Subscribe to notifications and battery updates, delivering them to `sink`.
    fn start_notify(
        &self,
        sink: mpsc::UnboundedSender<TransportEvent>,
    ) -> impl Future<Output = Result<(), WandError>> + Send;

    fn stop_notify(&self) -> impl Future<Output = Result<(), WandError>> + Send;

    fn read_battery(&self) -> impl Future<Output = Result<u8, WandError>> + Send;

    /// Drop cached services and characteristics.
    fn clear_cache(&self) -> impl Future<Output = ()> + Send;

    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    fn is_connected(&self) -> bool;
}

/// Run a transport call; on a missing service or characteristic, clear the
/// GATT cache and drop the link before handing the error back.
pub async fn guard_gatt<T, Tr, F>(transport: &Tr, call: F) -> Result<T, WandError>
where
    Tr: WandTransport,
    F: Future<Output = Result<T, WandError>>,
{
    match call.await {
        Err(e) if e.is_missing_gatt() => {
            warn!("GATT lookup failed ({}), clearing cache and disconnecting", e);
            transport.clear_cache().await;
            transport.disconnect().await;
            Err(e)
        }
        other => other,
    }
}
