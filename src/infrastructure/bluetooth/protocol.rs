//! Magic Caster Wand Protocol
//!
//! Opcode tables, outgoing command packets and notification decoding for
//! the wand's vendor GATT service.

use crate::domain::models::{ButtonState, ImuSample, ProductInfo};
use crate::error::DecodeError;
use tracing::trace;

/// Wand vendor service UUID
pub const SERVICE_UUID: &str = "57420001-587e-48a0-974c-544d6163c577";

/// Command Write Characteristic UUID - where commands and macros are sent
pub const COMMAND_CHAR_UUID: &str = "57420002-587e-48a0-974c-544d6163c577";

/// Notification Characteristic UUID - where responses and sensor data arrive
pub const NOTIFY_CHAR_UUID: &str = "57420003-587e-48a0-974c-544d6163c577";

/// Standard GATT battery level characteristic
pub const BATTERY_CHAR_UUID: &str = "00002a19-0000-1000-8000-00805f9b34fb";

/// Outgoing command opcodes
pub mod command {
    pub const GET_FIRMWARE_VERSION: u8 = 0x00;
    pub const KEEP_ALIVE: u8 = 0x01;
    pub const GET_BOX_ADDRESS: u8 = 0x09;
    pub const GET_PRODUCT_INFO: u8 = 0x0E;
    pub const IMU_FLAG_SET: u8 = 0x30;
    pub const IMU_FLAG_RESET: u8 = 0x31;
    pub const SET_BUTTON_THRESHOLD: u8 = 0xDC;
    pub const READ_BUTTON_THRESHOLD: u8 = 0xDD;
    pub const CALIBRATE_BUTTON_BASELINE: u8 = 0xFB;
    pub const CALIBRATE_IMU: u8 = 0xFC;
    pub const FACTORY_UNLOCK: u8 = 0xFE;
    pub const RESET: u8 = 0xFF;
}

/// Incoming notification opcodes
pub mod message {
    pub const FIRMWARE_VERSION: u8 = 0x00;
    pub const CHALLENGE: u8 = 0x01;
    pub const BOX_ADDRESS: u8 = 0x09;
    pub const PRODUCT_INFO: u8 = 0x0E;
    pub const BUTTON_PAYLOAD: u8 = 0x10;
    pub const SPELL_CAST: u8 = 0x24;
    pub const IMU_PAYLOAD: u8 = 0x2C;
    pub const BUTTON_THRESHOLD: u8 = 0xDD;
    pub const BUTTON_CALIBRATION: u8 = 0xFB;
    pub const IMU_CALIBRATION: u8 = 0xFC;
}

/// Product info sub-kinds for opcode 0x0E
pub mod product_info {
    pub const SERIAL_NUMBER: u8 = 0x01;
    pub const SKU: u8 = 0x02;
    pub const DEVICE_ID: u8 = 0x04;
}

/// IMU flag bit that enables sample streaming
pub const IMU_STREAM_FLAG: u8 = 0x01;

/// Key that accompanies the factory unlock opcode
pub const FACTORY_UNLOCK_KEY: [u8; 2] = [0x55, 0xAA];

/// Button thresholds written during wand initialisation (index = position)
pub const DEFAULT_BUTTON_THRESHOLDS: [u8; 8] = [5, 5, 5, 5, 8, 8, 8, 8];

/// IMU scaling factors
pub mod imu_scale {
    /// Accelerometer scale (±16 g range, 16-bit) in g per LSB
    pub const ACCEL: f32 = 1.0 / 2048.0;
    /// Gyroscope scale (±2000 dps, 16-bit) in rad/s per LSB
    pub const GYRO: f32 = 0.001_065_264_4;
}

/// Header bytes in front of the IMU samples: opcode, two sequence bytes, count
const IMU_HEADER_LEN: usize = 4;
/// Six little-endian i16 axes per sample
const IMU_SAMPLE_LEN: usize = 12;

/// Expected response opcode for commands that wait on the wand.
/// Commands not listed here are fire-and-forget.
pub fn expected_response(opcode: u8) -> Option<u8> {
    match opcode {
        command::GET_FIRMWARE_VERSION => Some(message::FIRMWARE_VERSION),
        command::GET_BOX_ADDRESS => Some(message::BOX_ADDRESS),
        command::GET_PRODUCT_INFO => Some(message::PRODUCT_INFO),
        command::READ_BUTTON_THRESHOLD => Some(message::BUTTON_THRESHOLD),
        command::CALIBRATE_BUTTON_BASELINE => Some(message::BUTTON_CALIBRATION),
        _ => None,
    }
}

/// A single outgoing write: opcode plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    opcode: u8,
    payload: Vec<u8>,
}

impl CommandPacket {
    pub fn new(opcode: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// Wrap already-framed bytes such as a compiled macro.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&opcode, payload) = bytes.split_first()?;
        Some(Self::new(opcode, payload))
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + 1);
        bytes.push(self.opcode);
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

/// Wand control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WandCommand {
    /// Read firmware version
    FirmwareVersion,
    /// Keep the link alive; the wand answers with a challenge
    KeepAlive,
    /// Read the paired box address
    BoxAddress,
    /// Read one product info record (serial, SKU, device id)
    ProductInfo(u8),
    /// Set a capacitive button threshold
    SetButtonThreshold { index: u8, value: u8 },
    /// Read a capacitive button threshold
    ReadButtonThreshold(u8),
    /// Recalibrate the untouched baseline of the pads
    CalibrateButtons,
    /// Calibrate the IMU
    CalibrateImu,
    /// Set IMU flag bits
    ImuFlagSet(u8),
    /// Clear IMU flag bits
    ImuFlagReset(u8),
    /// Unlock factory mode before calibration
    FactoryUnlock,
    /// Reset the wand to defaults
    Reset,
}

impl WandCommand {
    pub fn to_packet(&self) -> CommandPacket {
        match *self {
            Self::FirmwareVersion => CommandPacket::new(command::GET_FIRMWARE_VERSION, Vec::new()),
            Self::KeepAlive => CommandPacket::new(command::KEEP_ALIVE, Vec::new()),
            Self::BoxAddress => CommandPacket::new(command::GET_BOX_ADDRESS, Vec::new()),
            Self::ProductInfo(kind) => CommandPacket::new(command::GET_PRODUCT_INFO, [kind]),
            Self::SetButtonThreshold { index, value } => {
                CommandPacket::new(command::SET_BUTTON_THRESHOLD, [index, value])
            }
            Self::ReadButtonThreshold(index) => {
                CommandPacket::new(command::READ_BUTTON_THRESHOLD, [index])
            }
            Self::CalibrateButtons => CommandPacket::new(command::CALIBRATE_BUTTON_BASELINE, Vec::new()),
            Self::CalibrateImu => CommandPacket::new(command::CALIBRATE_IMU, Vec::new()),
            Self::ImuFlagSet(flags) => CommandPacket::new(command::IMU_FLAG_SET, [flags]),
            Self::ImuFlagReset(flags) => CommandPacket::new(command::IMU_FLAG_RESET, [flags]),
            Self::FactoryUnlock => CommandPacket::new(command::FACTORY_UNLOCK, FACTORY_UNLOCK_KEY),
            Self::Reset => CommandPacket::new(command::RESET, Vec::new()),
        }
    }
}

/// A decoded notification
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    FirmwareVersion(String),
    Challenge(Vec<u8>),
    BoxAddress(String),
    ProductInfo(ProductInfo),
    Buttons(ButtonState),
    SpellCast(String),
    Imu(Vec<ImuSample>),
    ButtonThreshold { index: u8, threshold: u8 },
    ButtonCalibration,
    ImuCalibration,
    Unknown { opcode: u8, len: usize },
}

/// Decode raw notification bytes.
///
/// # Notification layouts
///
/// ```text
/// 0x00 [version bytes...]            firmware version, rendered "a.b.c"
/// 0x01 [challenge...]                keep-alive challenge
/// 0x09 [6 bytes LE MAC]              box address
/// 0x0E [kind] [data...]              product info (0x01 serial u32 LE,
///                                    0x02 SKU ascii, 0x04 device id ascii)
/// 0x10 [mask]                        pads: bit3 pad1 .. bit0 pad4
/// 0x24 [?] [?] [len] [name...]       spell recognised by the wand
/// 0x2C [seq] [seq] [count] [12*count] IMU samples:
///                                    gyro x/y/z, accel x/y/z (i16 LE)
/// 0xDD [index] [threshold]           button threshold
/// 0xFB                               button baseline calibrated
/// 0xFC                               IMU calibrated
/// ```
///
/// Short payloads yield `DecodeError::Truncated`; callers drop them.
pub fn decode_notification(bytes: &[u8]) -> Result<Notification, DecodeError> {
    let (&opcode, data) = bytes.split_first().ok_or(DecodeError::Empty)?;

    #[cfg(debug_assertions)]
    trace!("Raw notification: {:02X?}", bytes);

    let require = |needed: usize| {
        if bytes.len() < needed {
            Err(DecodeError::Truncated {
                opcode,
                needed,
                got: bytes.len(),
            })
        } else {
            Ok(())
        }
    };

    let notification = match opcode {
        message::FIRMWARE_VERSION => {
            require(2)?;
            let version = data
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(".");
            Notification::FirmwareVersion(version)
        }
        message::CHALLENGE => Notification::Challenge(data.to_vec()),
        message::BOX_ADDRESS => {
            require(7)?;
            let address = data[..6]
                .iter()
                .rev()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(":");
            Notification::BoxAddress(address)
        }
        message::PRODUCT_INFO => {
            require(3)?;
            let info = match data[0] {
                product_info::SERIAL_NUMBER => {
                    require(6)?;
                    ProductInfo::SerialNumber(u32::from_le_bytes([
                        data[1], data[2], data[3], data[4],
                    ]))
                }
                product_info::SKU => ProductInfo::Sku(ascii_trimmed(&data[1..])),
                product_info::DEVICE_ID => ProductInfo::DeviceId(ascii_trimmed(&data[1..])),
                other => ProductInfo::Other(other),
            };
            Notification::ProductInfo(info)
        }
        message::BUTTON_PAYLOAD => {
            require(2)?;
            Notification::Buttons(ButtonState::from_mask(data[0]))
        }
        message::SPELL_CAST => {
            require(5)?;
            let name_len = data[2] as usize;
            let raw = &data[3..];
            let raw = &raw[..name_len.min(raw.len())];
            let name: String = String::from_utf8_lossy(raw)
                .chars()
                .filter(|c| *c != '\0' && *c != char::REPLACEMENT_CHARACTER)
                .map(|c| if c == '_' { ' ' } else { c })
                .collect();
            Notification::SpellCast(name.trim().to_string())
        }
        message::IMU_PAYLOAD => Notification::Imu(decode_imu(bytes)?),
        message::BUTTON_THRESHOLD => {
            require(3)?;
            Notification::ButtonThreshold {
                index: data[0],
                threshold: data[1],
            }
        }
        message::BUTTON_CALIBRATION => Notification::ButtonCalibration,
        message::IMU_CALIBRATION => Notification::ImuCalibration,
        _ => Notification::Unknown {
            opcode,
            len: bytes.len(),
        },
    };

    Ok(notification)
}

/// Decode a batched IMU notification; the claimed sample count must be
/// fully present or the whole packet is rejected.
fn decode_imu(bytes: &[u8]) -> Result<Vec<ImuSample>, DecodeError> {
    if bytes.len() < IMU_HEADER_LEN {
        return Err(DecodeError::Truncated {
            opcode: message::IMU_PAYLOAD,
            needed: IMU_HEADER_LEN,
            got: bytes.len(),
        });
    }

    let count = bytes[3] as usize;
    let needed = IMU_HEADER_LEN + count * IMU_SAMPLE_LEN;
    if bytes.len() < needed {
        return Err(DecodeError::Truncated {
            opcode: message::IMU_PAYLOAD,
            needed,
            got: bytes.len(),
        });
    }

    let samples = bytes[IMU_HEADER_LEN..needed]
        .chunks_exact(IMU_SAMPLE_LEN)
        .map(|chunk| {
            let axis = |i: usize| i16::from_le_bytes([chunk[i * 2], chunk[i * 2 + 1]]) as f32;
            ImuSample {
                gyro: [
                    axis(0) * imu_scale::GYRO,
                    axis(1) * imu_scale::GYRO,
                    axis(2) * imu_scale::GYRO,
                ],
                accel: [
                    axis(3) * imu_scale::ACCEL,
                    axis(4) * imu_scale::ACCEL,
                    axis(5) * imu_scale::ACCEL,
                ],
            }
        })
        .collect();

    Ok(samples)
}

fn ascii_trimmed(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| b.is_ascii() && **b != 0)
        .map(|&b| b as char)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Parse a dashed UUID string into its 128-bit value
pub fn parse_uuid(uuid_str: &str) -> Option<u128> {
    let hex = uuid_str.replace('-', "");
    if hex.len() != 32 {
        return None;
    }
    u128::from_str_radix(&hex, 16).ok()
}
