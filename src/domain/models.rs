use crate::domain::spells::SpellLabel;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capacitive pad state carried by a 0x10 button notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonState {
    pub pad1: bool,
    pub pad2: bool,
    pub pad3: bool,
    pub pad4: bool,
}

impl ButtonState {
    const PAD1: u8 = 0x08;
    const PAD2: u8 = 0x04;
    const PAD3: u8 = 0x02;
    const PAD4: u8 = 0x01;

    pub fn from_mask(mask: u8) -> Self {
        Self {
            pad1: mask & Self::PAD1 != 0,
            pad2: mask & Self::PAD2 != 0,
            pad3: mask & Self::PAD3 != 0,
            pad4: mask & Self::PAD4 != 0,
        }
    }

    pub fn mask(&self) -> u8 {
        let mut mask = 0;
        if self.pad1 {
            mask |= Self::PAD1;
        }
        if self.pad2 {
            mask |= Self::PAD2;
        }
        if self.pad3 {
            mask |= Self::PAD3;
        }
        if self.pad4 {
            mask |= Self::PAD4;
        }
        mask
    }

    /// All four pads touched; this is the casting grip.
    pub fn all_pressed(&self) -> bool {
        self.pad1 && self.pad2 && self.pad3 && self.pad4
    }
}

/// One IMU reading converted to physical units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuSample {
    /// Angular rate in rad/s (x, y, z).
    pub gyro: [f32; 3],
    /// Acceleration in g (x, y, z).
    pub accel: [f32; 3],
}

/// A point on the projected 2D gesture trail.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrailPoint {
    pub x: f32,
    pub y: f32,
}

impl TrailPoint {
    pub const ORIGIN: TrailPoint = TrailPoint { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_squared(&self, other: &TrailPoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationKind {
    /// Capacitive button baseline (0xFB)
    Buttons,
    /// IMU calibration (0xFC)
    Imu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Product information sub-records returned by opcode 0x0E.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductInfo {
    SerialNumber(u32),
    Sku(String),
    DeviceId(String),
    Other(u8),
}

/// Wand model family, derived from the device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WandType {
    Defiant,
    Loyal,
    Heroic,
    Honourable,
    Adventurous,
    Wise,
    Unknown,
}

impl WandType {
    /// Device ids look like `WBMC22G1SHNW`: drop the variant char, the
    /// two preceding chars name the family.
    pub fn from_device_id(device_id: &str) -> Self {
        let chars: Vec<char> = device_id.chars().collect();
        if chars.len() < 3 {
            return Self::Unknown;
        }
        let suffix: String = chars[chars.len() - 3..chars.len() - 1].iter().collect();
        match suffix.as_str() {
            "DF" => Self::Defiant,
            "LY" => Self::Loyal,
            "HR" => Self::Heroic,
            "HN" => Self::Honourable,
            "AV" => Self::Adventurous,
            "WS" => Self::Wise,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Defiant => "DEFIANT",
            Self::Loyal => "LOYAL",
            Self::Heroic => "HEROIC",
            Self::Honourable => "HONOURABLE",
            Self::Adventurous => "ADVENTUROUS",
            Self::Wise => "WISE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for WandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values learned from the wand's info responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WandInfo {
    pub firmware_version: Option<String>,
    pub box_address: Option<String>,
    pub serial_number: Option<u32>,
    pub sku: Option<String>,
    pub device_id: Option<String>,
}

impl WandInfo {
    pub fn wand_type(&self) -> Option<WandType> {
        self.device_id.as_deref().map(WandType::from_device_id)
    }

    pub fn apply_product_info(&mut self, info: ProductInfo) {
        match info {
            ProductInfo::SerialNumber(serial) => self.serial_number = Some(serial),
            ProductInfo::Sku(sku) => self.sku = Some(sku),
            ProductInfo::DeviceId(id) => self.device_id = Some(id),
            ProductInfo::Other(_) => {}
        }
    }
}

/// Everything the orchestrator reports to its host.
#[derive(Debug, Clone)]
pub enum WandEvent {
    /// Outcome of one completed gesture; `None` means not recognised.
    SpellResult(Option<SpellLabel>),
    /// Spell recognised by the wand firmware itself (0x24).
    WandSpell(String),
    Battery(u8),
    Buttons(ButtonState),
    Calibration(CalibrationKind),
    Imu(Vec<ImuSample>),
    TrailPoint(TrailPoint),
    ConnectionStatus(ConnectionStatus),
    ServerReachable(bool),
}
