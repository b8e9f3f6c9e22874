//! Coax interface boundary
//!
//! Typed model of what the controller sends to, and receives from, the coax
//! interface. Link-layer framing and the serial transport live behind the
//! [`Interface`] trait; everything here is plain data.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Address of a device on the coax: `None` when directly attached,
/// otherwise a 3299 multiplexer port.
pub type DeviceAddress = Option<u8>;

/// 3299 multiplexer port addresses, indexed by port number
pub const PORT_MAP_3299: [u8; 8] = [
    0b000000, 0b100000, 0b010000, 0b110000, 0b001000, 0b101000, 0b011000, 0b111000,
];

/// Transport failure kinds reported by the coax interface
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoaxError {
    /// The device did not respond; usually means nothing is attached
    #[error("Receive timeout")]
    ReceiveTimeout,

    #[error("Receive error: {0}")]
    ReceiveError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

/// Result type for a single coax command
pub type CoaxResult<T> = Result<T, CoaxError>;

bitflags! {
    /// Terminal control register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Control: u8 {
        const STEP_INHIBIT = 0x01;
        const DISPLAY_INHIBIT = 0x02;
        const CURSOR_INHIBIT = 0x04;
        const CURSOR_REVERSE = 0x08;
        const CURSOR_BLINK = 0x10;
    }
}

/// Side effect requested from the terminal along with a POLL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollAction {
    #[default]
    None,
    Alarm,
    EnableKeyboardClicker,
    DisableKeyboardClicker,
}

/// Data carried by a write command, either literal bytes or a repeated
/// pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Repeat { pattern: Vec<u8>, count: usize },
}

impl Payload {
    /// Number of bytes the payload expands to
    pub fn len(&self) -> usize {
        match self {
            Payload::Bytes(bytes) => bytes.len(),
            Payload::Repeat { pattern, count } => pattern.len() * count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand into literal bytes
    pub fn expand(&self) -> Vec<u8> {
        match self {
            Payload::Bytes(bytes) => bytes.clone(),
            Payload::Repeat { pattern, count } => pattern.repeat(*count),
        }
    }
}

/// A coax command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Poll(PollAction),
    PollAck,
    ReadTerminalId,
    ReadExtendedId,
    ReadFeatureId(u8),
    ReadAddressCounterHi,
    ReadAddressCounterLo,
    LoadAddressCounterHi(u8),
    LoadAddressCounterLo(u8),
    LoadControlRegister(Control),
    WriteData(Payload),
    /// Continuation of the previous write
    Data(Payload),
    EabLoadMask { feature_address: u8, mask: u8 },
    EabWriteAlternate { feature_address: u8, data: Payload },
}

/// Terminal class reported by READ_TERMINAL_ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalType {
    /// Control unit terminal
    Cut,
    /// Distributed function terminal
    Dft,
}

/// Decoded READ_TERMINAL_ID response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalId {
    pub terminal_type: TerminalType,
    pub model: u8,
    pub keyboard: u8,
}

impl TerminalId {
    pub fn new(terminal_type: TerminalType, model: u8, keyboard: u8) -> Self {
        Self {
            terminal_type,
            model,
            keyboard,
        }
    }
}

impl TryFrom<u8> for TerminalId {
    type Error = CoaxError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value & 0x01 == 0x01 {
            return Ok(Self::new(TerminalType::Dft, 0, 0));
        }

        let model = match (value & 0x0e) >> 1 {
            0b010 => 2,
            0b011 => 3,
            0b111 => 4,
            0b110 => 5,
            bits => {
                return Err(CoaxError::ProtocolError(format!(
                    "Invalid terminal model bits: {:03b}",
                    bits
                )))
            },
        };

        Ok(Self::new(TerminalType::Cut, model, (value & 0xf0) >> 4))
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.terminal_type {
            TerminalType::Cut => write!(f, "CUT, model {}, keyboard {}", self.model, self.keyboard),
            TerminalType::Dft => write!(f, "DFT"),
        }
    }
}

/// Terminal features discovered with READ_FEATURE_ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Feature {
    /// Extended attribute buffer
    #[serde(rename = "EAB")]
    Eab,
}

impl Feature {
    /// Identifier reported by the feature
    pub fn id(self) -> u8 {
        match self {
            Feature::Eab => 0x79,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x79 => Some(Feature::Eab),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "EAB" => Some(Feature::Eab),
            _ => None,
        }
    }
}

/// Feature to bus address mapping
pub type Features = BTreeMap<Feature, u8>;

/// POLL response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResponse {
    /// TT/AR, nothing to report
    Empty,
    PowerOnReset,
    Keystroke(u8),
    Status(u16),
}

impl PollResponse {
    pub fn is_empty(&self) -> bool {
        matches!(self, PollResponse::Empty)
    }
}

/// A coax command response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Command completed without data
    Ack,
    Poll(PollResponse),
    TerminalId(TerminalId),
    ExtendedId(Vec<u8>),
    FeatureId(u8),
    Byte(u8),
}

impl Response {
    pub fn poll_response(&self) -> PollResponse {
        match self {
            Response::Poll(response) => *response,
            _ => PollResponse::Empty,
        }
    }

    pub fn byte(&self) -> Option<u8> {
        match self {
            Response::Byte(byte) => Some(*byte),
            _ => None,
        }
    }
}

/// A physical coax interface
pub trait Interface {
    /// Name of the underlying port, used when formatting device addresses
    fn identifier(&self) -> &str;

    /// Whether the interface runs firmware without jumbo write support
    fn legacy_firmware_detected(&self) -> bool {
        false
    }

    /// Whether the interface can address 3299 multiplexer ports
    fn supports_3299(&self) -> bool {
        false
    }

    /// Execute commands in order, returning one result per command
    fn execute(
        &mut self,
        commands: &[(DeviceAddress, Command)],
        timeout: Duration,
    ) -> Vec<CoaxResult<Response>>;
}

/// Feature addresses queried with READ_FEATURE_ID
pub fn read_feature_ids() -> Vec<Command> {
    (2..16).map(Command::ReadFeatureId).collect()
}

/// Map READ_FEATURE_ID responses back to the features they identify
pub fn parse_features(responses: &[CoaxResult<Response>], commands: &[Command]) -> Features {
    let mut features = Features::new();

    for (response, command) in responses.iter().zip(commands) {
        let (Ok(Response::FeatureId(id)), Command::ReadFeatureId(address)) = (response, command)
        else {
            continue;
        };

        if let Some(feature) = Feature::from_id(*id) {
            features.insert(feature, *address);
        }
    }

    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_id_cut() {
        let terminal_id = TerminalId::try_from(0b1111_0100).unwrap();

        assert_eq!(terminal_id.terminal_type, TerminalType::Cut);
        assert_eq!(terminal_id.model, 2);
        assert_eq!(terminal_id.keyboard, 15);
    }

    #[test]
    fn test_terminal_id_models() {
        assert_eq!(TerminalId::try_from(0b0000_0110).unwrap().model, 3);
        assert_eq!(TerminalId::try_from(0b0000_1110).unwrap().model, 4);
        assert_eq!(TerminalId::try_from(0b0000_1100).unwrap().model, 5);
        assert!(TerminalId::try_from(0b0000_0000).is_err());
    }

    #[test]
    fn test_terminal_id_dft() {
        let terminal_id = TerminalId::try_from(0b0000_0001).unwrap();

        assert_eq!(terminal_id.terminal_type, TerminalType::Dft);
    }

    #[test]
    fn test_payload_len_and_expand() {
        let repeat = Payload::Repeat {
            pattern: vec![0x01, 0x02],
            count: 3,
        };

        assert_eq!(repeat.len(), 6);
        assert_eq!(repeat.expand(), vec![0x01, 0x02, 0x01, 0x02, 0x01, 0x02]);
        assert!(Payload::Bytes(Vec::new()).is_empty());
    }

    #[test]
    fn test_parse_features() {
        let commands = read_feature_ids();
        let responses: Vec<CoaxResult<Response>> = commands
            .iter()
            .map(|command| match command {
                Command::ReadFeatureId(7) => Ok(Response::FeatureId(0x79)),
                Command::ReadFeatureId(9) => Ok(Response::FeatureId(0x01)),
                _ => Err(CoaxError::ReceiveTimeout),
            })
            .collect();

        let features = parse_features(&responses, &commands);

        assert_eq!(features.len(), 1);
        assert_eq!(features.get(&Feature::Eab), Some(&7));
    }
}
