//! LED / haptic macro compiler
//!
//! A [`Macro`] is an ordered list of device-side instructions compiled into
//! a single write prefixed with the macro control opcode. Durations are
//! little-endian u16; group indices are sent as-is.

use crate::error::DecodeError;

/// Macro instruction opcodes
pub mod opcode {
    pub const DELAY: u8 = 0x10;
    pub const WAIT_BUSY: u8 = 0x11;
    pub const LIGHT_CLEAR_ALL: u8 = 0x20;
    pub const LIGHT_TRANSITION: u8 = 0x22;
    pub const HAP_BUZZ: u8 = 0x50;
    pub const CONTROL: u8 = 0x68;
    pub const SET_LOOPS: u8 = 0x80;
    pub const SET_LOOP: u8 = 0x81;
}

/// LED groups along the wand body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedGroup {
    Tip = 0,
    MidUpper = 1,
    MidLower = 2,
    Pommel = 3,
}

impl LedGroup {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Tip),
            1 => Some(Self::MidUpper),
            2 => Some(Self::MidLower),
            3 => Some(Self::Pommel),
            _ => None,
        }
    }
}

/// One macro instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroCommand {
    ChangeLed {
        group: u8,
        r: u8,
        g: u8,
        b: u8,
        duration_ms: u16,
    },
    ClearLeds,
    Delay { duration_ms: u16 },
    Buzz { duration_ms: u16 },
    Loop,
    SetLoops { count: u8 },
    WaitBusy,
}

impl MacroCommand {
    fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            Self::ChangeLed {
                group,
                r,
                g,
                b,
                duration_ms,
            } => {
                out.extend_from_slice(&[opcode::LIGHT_TRANSITION, group, r, g, b]);
                out.extend_from_slice(&duration_ms.to_le_bytes());
            }
            Self::ClearLeds => out.push(opcode::LIGHT_CLEAR_ALL),
            Self::Delay { duration_ms } => {
                out.push(opcode::DELAY);
                out.extend_from_slice(&duration_ms.to_le_bytes());
            }
            Self::Buzz { duration_ms } => {
                out.push(opcode::HAP_BUZZ);
                out.extend_from_slice(&duration_ms.to_le_bytes());
            }
            Self::Loop => out.push(opcode::SET_LOOP),
            Self::SetLoops { count } => out.extend_from_slice(&[opcode::SET_LOOPS, count]),
            Self::WaitBusy => out.push(opcode::WAIT_BUSY),
        }
    }

    /// Argument bytes following the instruction opcode
    fn argument_len(opcode: u8) -> Option<usize> {
        match opcode {
            opcode::LIGHT_TRANSITION => Some(6),
            opcode::DELAY | opcode::HAP_BUZZ => Some(2),
            opcode::SET_LOOPS => Some(1),
            opcode::LIGHT_CLEAR_ALL | opcode::SET_LOOP | opcode::WAIT_BUSY => Some(0),
            _ => None,
        }
    }
}

/// An RGB colour parsed from `#RRGGBB` / `RRGGBB`.
pub fn parse_hex_color(hex: &str) -> Result<(u8, u8, u8), DecodeError> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.is_ascii() {
        return Err(DecodeError::InvalidColor(hex.to_string()));
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&digits[range], 16).map_err(|_| DecodeError::InvalidColor(hex.to_string()))
    };
    Ok((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

/// Ordered macro builder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Macro {
    commands: Vec<MacroCommand>,
}

impl Macro {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[MacroCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Arguments are masked to their wire width; out-of-range values truncate.
    pub fn add_led(mut self, group: LedGroup, r: u32, g: u32, b: u32, duration_ms: u32) -> Self {
        self.commands.push(MacroCommand::ChangeLed {
            group: group as u8,
            r: (r & 0xFF) as u8,
            g: (g & 0xFF) as u8,
            b: (b & 0xFF) as u8,
            duration_ms: (duration_ms & 0xFFFF) as u16,
        });
        self
    }

    /// Packed `0xRRGGBB` colour
    pub fn add_led_rgb(self, group: LedGroup, rgb: u32, duration_ms: u32) -> Self {
        self.add_led(group, rgb >> 16, rgb >> 8, rgb, duration_ms)
    }

    pub fn add_led_hex(
        self,
        group: LedGroup,
        hex: &str,
        duration_ms: u32,
    ) -> Result<Self, DecodeError> {
        let (r, g, b) = parse_hex_color(hex)?;
        Ok(self.add_led(group, r.into(), g.into(), b.into(), duration_ms))
    }

    pub fn add_clear(mut self) -> Self {
        self.commands.push(MacroCommand::ClearLeds);
        self
    }

    pub fn add_delay(mut self, duration_ms: u32) -> Self {
        self.commands.push(MacroCommand::Delay {
            duration_ms: (duration_ms & 0xFFFF) as u16,
        });
        self
    }

    pub fn add_buzz(mut self, duration_ms: u32) -> Self {
        self.commands.push(MacroCommand::Buzz {
            duration_ms: (duration_ms & 0xFFFF) as u16,
        });
        self
    }

    /// Marks the start of the repeated block
    pub fn add_loop(mut self) -> Self {
        self.commands.push(MacroCommand::Loop);
        self
    }

    pub fn add_set_loops(mut self, count: u32) -> Self {
        self.commands.push(MacroCommand::SetLoops {
            count: (count & 0xFF) as u8,
        });
        self
    }

    pub fn add_wait(mut self) -> Self {
        self.commands.push(MacroCommand::WaitBusy);
        self
    }

    /// Compile to the control-prefixed byte stream
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![opcode::CONTROL];
        for command in &self.commands {
            command.encode(&mut out);
        }
        out
    }

    /// Decode a compiled stream back into its instructions
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (&control, mut rest) = bytes.split_first().ok_or(DecodeError::Empty)?;
        if control != opcode::CONTROL {
            return Err(DecodeError::MissingMacroControl);
        }

        let mut commands = Vec::new();
        let mut offset = 1;
        while let Some((&op, tail)) = rest.split_first() {
            let len = MacroCommand::argument_len(op)
                .ok_or(DecodeError::UnknownMacroOpcode { opcode: op, offset })?;
            if tail.len() < len {
                return Err(DecodeError::Truncated {
                    opcode: op,
                    needed: len + 1,
                    got: tail.len() + 1,
                });
            }
            let args = &tail[..len];
            let duration = |i: usize| u16::from_le_bytes([args[i], args[i + 1]]);
            let command = match op {
                opcode::LIGHT_TRANSITION => MacroCommand::ChangeLed {
                    group: args[0],
                    r: args[1],
                    g: args[2],
                    b: args[3],
                    duration_ms: duration(4),
                },
                opcode::DELAY => MacroCommand::Delay {
                    duration_ms: duration(0),
                },
                opcode::HAP_BUZZ => MacroCommand::Buzz {
                    duration_ms: duration(0),
                },
                opcode::SET_LOOPS => MacroCommand::SetLoops { count: args[0] },
                opcode::LIGHT_CLEAR_ALL => MacroCommand::ClearLeds,
                opcode::SET_LOOP => MacroCommand::Loop,
                _ => MacroCommand::WaitBusy,
            };
            commands.push(command);
            rest = &tail[len..];
            offset += len + 1;
        }

        Ok(Self { commands })
    }
}
