//! TN3270 session
//!
//! The telnet negotiation and 3270 data stream are handled by an external
//! emulator reached through [`Tn3270Connector`] and [`Tn3270Emulator`]. This
//! module maps the emulator's cells onto the display, keys onto emulator
//! actions, and keeps the operator information area message up to date.

use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::str::FromStr;

use crate::display::encoding::{encode_ascii_character, encode_ebcdic_character, encode_string};
use crate::display::{DisplayResult, Position};
use crate::ebcdic::Codepage;
use crate::keyboard::{get_ebcdic_character_for_key, Key, KeyboardModifiers};
use crate::terminal::Terminal;

use super::{HostIoOutcome, Session, SessionError, SessionResult};

pub const DEFAULT_PORT: u16 = 23;

/// EBCDIC duplicate order
pub const DUP: u8 = 0x1c;

/// EBCDIC field mark order
pub const FM: u8 = 0x1e;

const MESSAGE_AREA_COLUMN: usize = 8;
const MESSAGE_AREA_LENGTH: usize = 9;

type MessageArea = [u8; MESSAGE_AREA_LENGTH];

/// Attention identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aid {
    Clear,
    Enter,
    Pa1,
    Pa2,
    Pa3,
    Pf1,
    Pf2,
    Pf3,
    Pf4,
    Pf5,
    Pf6,
    Pf7,
    Pf8,
    Pf9,
    Pf10,
    Pf11,
    Pf12,
    Pf13,
    Pf14,
    Pf15,
    Pf16,
    Pf17,
    Pf18,
    Pf19,
    Pf20,
    Pf21,
    Pf22,
    Pf23,
    Pf24,
}

impl Aid {
    pub fn from_key(key: Key) -> Option<Aid> {
        let aid = match key {
            Key::Clear => Aid::Clear,
            Key::Enter => Aid::Enter,
            Key::Pa1 => Aid::Pa1,
            Key::Pa2 => Aid::Pa2,
            Key::Pa3 => Aid::Pa3,
            Key::Pf1 => Aid::Pf1,
            Key::Pf2 => Aid::Pf2,
            Key::Pf3 => Aid::Pf3,
            Key::Pf4 => Aid::Pf4,
            Key::Pf5 => Aid::Pf5,
            Key::Pf6 => Aid::Pf6,
            Key::Pf7 => Aid::Pf7,
            Key::Pf8 => Aid::Pf8,
            Key::Pf9 => Aid::Pf9,
            Key::Pf10 => Aid::Pf10,
            Key::Pf11 => Aid::Pf11,
            Key::Pf12 => Aid::Pf12,
            Key::Pf13 => Aid::Pf13,
            Key::Pf14 => Aid::Pf14,
            Key::Pf15 => Aid::Pf15,
            Key::Pf16 => Aid::Pf16,
            Key::Pf17 => Aid::Pf17,
            Key::Pf18 => Aid::Pf18,
            Key::Pf19 => Aid::Pf19,
            Key::Pf20 => Aid::Pf20,
            Key::Pf21 => Aid::Pf21,
            Key::Pf22 => Aid::Pf22,
            Key::Pf23 => Aid::Pf23,
            Key::Pf24 => Aid::Pf24,
            _ => return None,
        };

        Some(aid)
    }

    /// Code sent to the host in the inbound data stream
    pub fn code(self) -> u8 {
        match self {
            Aid::Clear => 0x6d,
            Aid::Enter => 0x7d,
            Aid::Pa1 => 0x6c,
            Aid::Pa2 => 0x6e,
            Aid::Pa3 => 0x6b,
            Aid::Pf1 => 0xf1,
            Aid::Pf2 => 0xf2,
            Aid::Pf3 => 0xf3,
            Aid::Pf4 => 0xf4,
            Aid::Pf5 => 0xf5,
            Aid::Pf6 => 0xf6,
            Aid::Pf7 => 0xf7,
            Aid::Pf8 => 0xf8,
            Aid::Pf9 => 0xf9,
            Aid::Pf10 => 0x7a,
            Aid::Pf11 => 0x7b,
            Aid::Pf12 => 0x7c,
            Aid::Pf13 => 0xc1,
            Aid::Pf14 => 0xc2,
            Aid::Pf15 => 0xc3,
            Aid::Pf16 => 0xc4,
            Aid::Pf17 => 0xc5,
            Aid::Pf18 => 0xc6,
            Aid::Pf19 => 0xc7,
            Aid::Pf20 => 0xc8,
            Aid::Pf21 => 0xc9,
            Aid::Pf22 => 0x4a,
            Aid::Pf23 => 0x4b,
            Aid::Pf24 => 0x4c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    Default,
    Blue,
    Red,
    Pink,
    Green,
    Turquoise,
    Yellow,
    White,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Highlight {
    Blink,
    Reverse,
    Underscore,
}

/// Extended field or character attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Formatting {
    pub color: Color,
    pub blink: bool,
    pub reverse: bool,
    pub underscore: bool,
}

/// A single position of the emulator screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// Field attribute; `attribute` is the 3270 attribute byte
    Attribute {
        attribute: u8,
        formatting: Option<Formatting>,
    },
    Character {
        byte: u8,
        character_set: Option<u8>,
        formatting: Option<Formatting>,
    },
}

impl Cell {
    pub fn formatting(&self) -> Option<&Formatting> {
        match self {
            Cell::Attribute { formatting, .. } | Cell::Character { formatting, .. } => {
                formatting.as_ref()
            },
        }
    }
}

/// Input rejected by the emulator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperatorError {
    #[error("Cursor is in a protected field")]
    ProtectedCell,

    #[error("Field is full")]
    FieldOverflow,

    #[error("{0}")]
    Other(String),
}

pub type OperatorResult = Result<(), OperatorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabDirection {
    Forward,
    Backward,
}

/// TN3270E negotiation profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tn3270eProfile {
    /// Plain TN3270
    Off,
    /// TN3270E without optional functions
    Basic,
    #[default]
    Standard,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown TN3270E profile: {0}")]
pub struct UnknownProfile(String);

impl FromStr for Tn3270eProfile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Tn3270eProfile::Off),
            "basic" => Ok(Tn3270eProfile::Basic),
            "default" => Ok(Tn3270eProfile::Standard),
            _ => Err(UnknownProfile(s.to_string())),
        }
    }
}

/// TN3270E device negotiated with the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tn3270eNegotiation {
    pub device_type: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
    pub device_names: Option<Vec<String>>,
    pub terminal_type: String,
    pub rows: usize,
    pub columns: usize,
    pub supported_colors: u8,
    pub supported_highlights: Vec<Highlight>,
    pub tn3270e: Tn3270eProfile,
}

/// A connected 3270 emulator
pub trait Tn3270Emulator {
    fn fileno(&self) -> RawFd;

    /// Process any waiting host data without blocking, returning whether the
    /// screen changed
    ///
    /// An error means the host connection is gone.
    fn update(&mut self) -> io::Result<bool>;

    fn cells(&self) -> &[Cell];

    /// Cell addresses changed since the last call
    fn take_dirty(&mut self) -> Vec<usize>;

    fn cursor_address(&self) -> usize;

    fn keyboard_locked(&self) -> bool;

    /// Whether the host asked for the alarm since the last call
    fn take_alarm(&mut self) -> bool;

    fn tn3270e_negotiation(&self) -> Option<Tn3270eNegotiation> {
        None
    }

    fn aid(&mut self, aid: Aid) -> OperatorResult;
    fn backspace(&mut self) -> OperatorResult;
    fn tab(&mut self, direction: TabDirection) -> OperatorResult;
    fn newline(&mut self) -> OperatorResult;
    fn home(&mut self) -> OperatorResult;
    fn cursor_up(&mut self) -> OperatorResult;
    fn cursor_down(&mut self) -> OperatorResult;
    fn cursor_left(&mut self, rate: usize) -> OperatorResult;
    fn cursor_right(&mut self, rate: usize) -> OperatorResult;
    fn delete(&mut self) -> OperatorResult;
    fn dup(&mut self) -> OperatorResult;
    fn field_mark(&mut self) -> OperatorResult;
    fn input(&mut self, byte: u8, insert: bool) -> OperatorResult;

    fn close(&mut self);
}

/// Opens emulator connections to a host
pub trait Tn3270Connector {
    fn connect(&self, request: &ConnectRequest) -> io::Result<Box<dyn Tn3270Emulator>>;
}

/// Invalid `[lu[,lu...]@]host[:port]` string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("Host name is required: {0}")]
    MissingHost(String),
}

/// A TN3270 host with optional LU names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tn3270Host {
    pub host: String,
    pub port: u16,
    pub device_names: Option<Vec<String>>,
}

impl FromStr for Tn3270Host {
    type Err = HostError;

    /// Parse `[lu[,lu...]@]host[:port]`; the port defaults to 23
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, port) = match s.rsplit_once(':') {
            Some((rest, port)) => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|port| *port >= 1)
                    .ok_or_else(|| HostError::InvalidPort(port.to_string()))?;

                (rest, port)
            },
            None => (s, DEFAULT_PORT),
        };

        let (device_names, host) = match rest.split_once('@') {
            Some((device_names, host)) => (
                Some(device_names.split(',').map(str::to_string).collect()),
                host,
            ),
            None => (None, rest),
        };

        let host = host.trim();

        if host.is_empty() {
            return Err(HostError::MissingHost(s.to_string()));
        }

        Ok(Tn3270Host {
            host: host.to_string(),
            port,
            device_names,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tn3270Options {
    pub host: String,
    pub port: u16,
    pub device_names: Option<Vec<String>>,
    pub codepage: Codepage,
    pub tn3270e: Tn3270eProfile,
}

impl Tn3270Options {
    pub fn new(host: Tn3270Host, codepage: Codepage, tn3270e: Tn3270eProfile) -> Self {
        Self {
            host: host.host,
            port: host.port,
            device_names: host.device_names,
            codepage,
            tn3270e,
        }
    }
}

pub struct Tn3270Session {
    connector: Rc<dyn Tn3270Connector>,
    options: Tn3270Options,
    emulator: Option<Box<dyn Tn3270Emulator>>,
    keyboard_insert: bool,
    waiting_on_host: bool,
    operator_error: Option<OperatorError>,
    message_area: Option<MessageArea>,
    last_message_area: Option<MessageArea>,
}

impl Tn3270Session {
    pub fn new(connector: Rc<dyn Tn3270Connector>, options: Tn3270Options) -> Self {
        Self {
            connector,
            options,
            emulator: None,
            keyboard_insert: false,
            waiting_on_host: false,
            operator_error: None,
            message_area: None,
            last_message_area: None,
        }
    }

    pub fn keyboard_insert(&self) -> bool {
        self.keyboard_insert
    }

    pub fn waiting_on_host(&self) -> bool {
        self.waiting_on_host
    }

    fn toggle_insert(&mut self, terminal: &mut Terminal) -> DisplayResult<()> {
        self.keyboard_insert = !self.keyboard_insert;

        terminal
            .display
            .status_line()
            .write_keyboard_insert(self.keyboard_insert)
    }

    fn disconnect(&mut self) {
        if let Some(mut emulator) = self.emulator.take() {
            emulator.close();
        }
    }

    fn apply(&mut self, terminal: &mut Terminal) -> SessionResult<()> {
        let emulator = self.emulator.as_mut().ok_or(SessionError::NotStarted)?;

        let has_eab = terminal.display.has_eab();

        for address in emulator.take_dirty() {
            let Some(cell) = emulator.cells().get(address) else {
                continue;
            };

            let (regen_byte, eab_byte) = map_cell(cell, has_eab);

            terminal
                .display
                .buffered_write_byte(regen_byte, eab_byte, Position::Index(address))?;
        }

        self.message_area = Some(format_message_area(
            self.waiting_on_host,
            self.operator_error.as_ref(),
            emulator.keyboard_locked(),
        ));

        Ok(())
    }

    fn flush(&mut self, terminal: &mut Terminal) -> SessionResult<()> {
        terminal.display.flush()?;

        if let Some(message_area) = self.message_area {
            if self.last_message_area != Some(message_area) {
                terminal
                    .display
                    .status_line()
                    .write(MESSAGE_AREA_COLUMN, &message_area)?;

                self.last_message_area = Some(message_area);
            }
        }

        if let Some(emulator) = &self.emulator {
            terminal
                .display
                .move_cursor(Position::Index(emulator.cursor_address()), false)?;
        }

        self.operator_error = None;

        Ok(())
    }
}

impl Session for Tn3270Session {
    fn start(&mut self, terminal: &mut Terminal) -> SessionResult<()> {
        let dimensions = terminal.display.dimensions();
        let has_eab = terminal.display.has_eab();

        // A 3279 without EAB is reported as a 3278.
        let terminal_type = format!(
            "IBM-{}-{}-E",
            if has_eab { "3279" } else { "3278" },
            terminal.terminal_id.model
        );

        tracing::info!("Terminal Type = {}", terminal_type);

        let (supported_colors, supported_highlights) = if has_eab {
            (8, vec![Highlight::Blink, Highlight::Reverse, Highlight::Underscore])
        } else {
            (1, Vec::new())
        };

        let request = ConnectRequest {
            host: self.options.host.clone(),
            port: self.options.port,
            device_names: self.options.device_names.clone(),
            terminal_type,
            rows: dimensions.rows,
            columns: dimensions.columns,
            supported_colors,
            supported_highlights,
            tn3270e: self.options.tn3270e,
        };

        let emulator = self.connector.connect(&request).map_err(SessionError::Connect)?;

        match emulator.tn3270e_negotiation() {
            Some(negotiation) => tracing::info!(
                "TN3270E mode negotiated: Device Type = {}, Device Name = {}",
                negotiation.device_type,
                negotiation.device_name.as_deref().unwrap_or("None")
            ),
            None => tracing::debug!("Unable to negotiate TN3270E mode"),
        }

        self.emulator = Some(emulator);
        self.keyboard_insert = false;
        self.waiting_on_host = false;
        self.operator_error = None;
        self.message_area = None;
        self.last_message_area = None;

        Ok(())
    }

    fn terminate(&mut self) {
        self.disconnect();
    }

    fn fileno(&self) -> Option<RawFd> {
        self.emulator.as_ref().map(|emulator| emulator.fileno())
    }

    fn handle_host(&mut self, terminal: &mut Terminal) -> SessionResult<HostIoOutcome> {
        let emulator = self.emulator.as_mut().ok_or(SessionError::NotStarted)?;

        let updated = match emulator.update() {
            Ok(updated) => updated,
            Err(error) => {
                tracing::info!("Host connection closed: {}", error);

                self.disconnect();

                return Ok(HostIoOutcome::Disconnected);
            },
        };

        if emulator.take_alarm() {
            terminal.sound_alarm();
        }

        if !updated {
            return Ok(HostIoOutcome::Idle);
        }

        self.waiting_on_host = false;

        Ok(HostIoOutcome::Progressed)
    }

    fn handle_key(
        &mut self,
        terminal: &mut Terminal,
        key: Key,
        _modifiers: KeyboardModifiers,
        _scan_code: u8,
    ) -> SessionResult<()> {
        if key == Key::Insert {
            return Ok(self.toggle_insert(terminal)?);
        }

        let emulator = self.emulator.as_mut().ok_or(SessionError::NotStarted)?;

        let result = if let Some(aid) = Aid::from_key(key) {
            let result = emulator.aid(aid);

            if result.is_ok() {
                self.waiting_on_host = true;
            }

            result
        } else {
            match key {
                Key::Backspace => emulator.backspace(),
                Key::Tab => emulator.tab(TabDirection::Forward),
                Key::Backtab => emulator.tab(TabDirection::Backward),
                Key::Newline | Key::FieldExit => emulator.newline(),
                Key::Home => emulator.home(),
                Key::Up => emulator.cursor_up(),
                Key::Down => emulator.cursor_down(),
                Key::Left => emulator.cursor_left(1),
                Key::Left2 => emulator.cursor_left(2),
                Key::Right => emulator.cursor_right(1),
                Key::Right2 => emulator.cursor_right(2),
                Key::Delete => emulator.delete(),
                Key::Dup => emulator.dup(),
                Key::FieldMark => emulator.field_mark(),
                _ => match get_ebcdic_character_for_key(key, self.options.codepage) {
                    Some(byte) => emulator.input(byte, self.keyboard_insert),
                    None => Ok(()),
                },
            }
        };

        if let Err(error) = result {
            tracing::debug!("Operator error: {}", error);

            self.operator_error = Some(error);
        }

        Ok(())
    }

    fn render(&mut self, terminal: &mut Terminal) -> SessionResult<()> {
        self.apply(terminal)?;
        self.flush(terminal)
    }
}

fn format_message_area(
    waiting_on_host: bool,
    operator_error: Option<&OperatorError>,
    keyboard_locked: bool,
) -> MessageArea {
    let message: Vec<u8> = if waiting_on_host {
        // X SPACE CLOCK_LEFT CLOCK_RIGHT
        vec![0xf6, 0x00, 0xf4, 0xf5]
    } else if let Some(OperatorError::ProtectedCell) = operator_error {
        // X SPACE ARROW_LEFT OPERATOR ARROW_RIGHT
        vec![0xf6, 0x00, 0xf8, 0xdb, 0xd8]
    } else if let Some(OperatorError::FieldOverflow) = operator_error {
        // X SPACE OPERATOR >
        [&[0xf6, 0x00, 0xdb][..], &encode_string(">")].concat()
    } else if keyboard_locked {
        // X SPACE SYSTEM
        [&[0xf6, 0x00][..], &encode_string("SYSTEM")].concat()
    } else {
        Vec::new()
    };

    let mut message_area = [0x00; MESSAGE_AREA_LENGTH];

    let length = message.len().min(MESSAGE_AREA_LENGTH);

    message_area[..length].copy_from_slice(&message[..length]);

    message_area
}

/// Regen and EAB bytes for an emulator cell
pub fn map_cell(cell: &Cell, has_eab: bool) -> (u8, Option<u8>) {
    let regen_byte = match cell {
        // Only the protected and display bits are shown.
        Cell::Attribute { attribute, .. } => 0xc0 | (attribute & 0x2c),
        Cell::Character {
            character_set: Some(_),
            ..
        } => encode_ascii_character('ß'),
        Cell::Character { byte: DUP, .. } => encode_ascii_character('*'),
        Cell::Character { byte: FM, .. } => encode_ascii_character(';'),
        Cell::Character { byte, .. } => encode_ebcdic_character(*byte),
    };

    if !has_eab {
        return (regen_byte, None);
    }

    (regen_byte, Some(map_formatting(cell.formatting())))
}

/// EAB byte for extended attributes
pub fn map_formatting(formatting: Option<&Formatting>) -> u8 {
    let Some(formatting) = formatting else {
        return 0x00;
    };

    let mut byte = match formatting.color {
        Color::Default => 0x00,
        Color::Blue => 0x08,
        Color::Red => 0x10,
        Color::Pink => 0x18,
        Color::Green => 0x20,
        Color::Turquoise => 0x28,
        Color::Yellow => 0x30,
        Color::White => 0x38,
    };

    if formatting.blink {
        byte |= 0x40;
    } else if formatting.reverse {
        byte |= 0x80;
    } else if formatting.underscore {
        byte |= 0xc0;
    }

    byte
}
