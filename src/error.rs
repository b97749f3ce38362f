//! Error types shared by the protocol engine and the gesture pipeline.

use thiserror::Error;

/// Errors surfaced by outgoing wand operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WandError {
    /// The BLE stack rejected a read, write or subscription.
    #[error("transport error: {0}")]
    Transport(String),

    /// The wand GATT service is gone; the link needs a fresh handshake.
    #[error("wand service missing: {0}")]
    ServiceMissing(String),

    /// A required characteristic is gone; the link needs a fresh handshake.
    #[error("characteristic missing: {0}")]
    CharacteristicMissing(String),

    /// No notification with the expected opcode arrived in time.
    #[error("timed out after {timeout_ms} ms waiting for response 0x{opcode:02X}")]
    Timeout { opcode: u8, timeout_ms: u64 },

    #[error("cannot send an empty packet")]
    EmptyPacket,

    #[error("wand is not connected")]
    NotConnected,
}

impl WandError {
    /// True for the errors that invalidate the whole GATT session.
    pub fn is_missing_gatt(&self) -> bool {
        matches!(
            self,
            Self::ServiceMissing(_) | Self::CharacteristicMissing(_)
        )
    }
}

/// Why a notification or compiled macro could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty packet")]
    Empty,

    #[error("packet 0x{opcode:02X} truncated: need {needed} bytes, got {got}")]
    Truncated { opcode: u8, needed: usize, got: usize },

    #[error("unknown macro instruction 0x{opcode:02X} at offset {offset}")]
    UnknownMacroOpcode { opcode: u8, offset: usize },

    #[error("macro stream does not start with the control opcode")]
    MissingMacroControl,

    #[error("invalid hex colour {0:?}")]
    InvalidColor(String),
}

/// Failures of an inference backend. These never reach callers of
/// `SpellClassifier::detect`, which folds them into "no classification".
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("inference service unreachable: {0}")]
    Unreachable(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid inference response: {0}")]
    InvalidResponse(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a captured trail is not handed to the classifier.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("no movement detected")]
    NoMovement,

    #[error("insufficient samples: {0}")]
    InsufficientSamples(usize),
}
