//! Escape sequence parser
//!
//! A reduced VT500-series state machine (<https://vt100.net/emu/dec_ansi_parser>)
//! covering what a VT100 host sends: C0 controls, ESC sequences and CSI
//! sequences. OSC, DCS, SOS, PM and APC strings are consumed and dropped.
//! The parser handles arbitrary chunk boundaries.

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    CsiIgnore,
    /// OSC, DCS, SOS, PM or APC string, waiting for ST or BEL
    String,
    /// ESC seen inside a string, ST if followed by `\`
    StringEscape,
}

/// A parsed CSI sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsiAction {
    pub params: Vec<u16>,
    pub intermediates: Vec<u8>,
    pub final_byte: u8,
    /// Sequence started with `?`
    pub private: bool,
}

impl CsiAction {
    /// Parameter at `index`, with 0 and missing parameters replaced by
    /// `default`
    pub fn param(&self, index: usize, default: u16) -> u16 {
        match self.params.get(index) {
            Some(0) | None => default,
            Some(value) => *value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscAction {
    SaveCursor,
    RestoreCursor,
    Index,
    ReverseIndex,
    NextLine,
    HorizontalTabSet,
    FullReset,
    /// `ESC # 8`, fill the screen with `E`
    AlignmentTest,
    DesignateG0(u8),
    DesignateG1(u8),
    Unknown(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Print(char),
    /// C0 control other than ESC, CAN and SUB
    Execute(u8),
    Csi(CsiAction),
    Esc(EscAction),
}

#[derive(Debug)]
pub struct Parser {
    state: State,
    intermediates: Vec<u8>,
    params: Vec<u16>,
    current_param: u16,
    param_has_digit: bool,
    private_marker: bool,
    utf8_buffer: Vec<u8>,
    utf8_remaining: u8,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            intermediates: Vec::with_capacity(4),
            params: Vec::with_capacity(16),
            current_param: 0,
            param_has_digit: false,
            private_marker: false,
            utf8_buffer: Vec::with_capacity(4),
            utf8_remaining: 0,
        }
    }

    pub fn reset(&mut self) {
        self.state = State::Ground;
        self.clear_params();
        self.utf8_buffer.clear();
        self.utf8_remaining = 0;
    }

    fn clear_params(&mut self) {
        self.intermediates.clear();
        self.params.clear();
        self.current_param = 0;
        self.param_has_digit = false;
        self.private_marker = false;
    }

    /// Process a chunk of bytes, returning actions
    pub fn parse(&mut self, data: &[u8]) -> Vec<Action> {
        let mut actions = Vec::new();

        for &byte in data {
            if let Some(action) = self.process_byte(byte) {
                actions.push(action);
            }
        }

        actions
    }

    fn process_byte(&mut self, byte: u8) -> Option<Action> {
        if self.state == State::Ground && self.utf8_remaining > 0 {
            return self.process_utf8_continuation(byte);
        }

        if matches!(self.state, State::String | State::StringEscape) {
            return self.process_string(byte);
        }

        if byte < 0x20 {
            return self.process_c0(byte);
        }

        if byte == 0x7f {
            return None;
        }

        match self.state {
            State::Ground => self.process_ground(byte),
            State::Escape => self.process_escape(byte),
            State::EscapeIntermediate => self.process_escape_intermediate(byte),
            State::CsiEntry => self.process_csi_entry(byte),
            State::CsiParam => self.process_csi_param(byte),
            State::CsiIntermediate => self.process_csi_intermediate(byte),
            State::CsiIgnore => self.process_csi_ignore(byte),
            State::String | State::StringEscape => None,
        }
    }

    fn process_c0(&mut self, byte: u8) -> Option<Action> {
        match byte {
            // CAN, SUB
            0x18 | 0x1a => {
                self.state = State::Ground;
                None
            },
            0x1b => {
                self.state = State::Escape;
                self.clear_params();
                None
            },
            // Controls are executed even in the middle of a sequence.
            _ => Some(Action::Execute(byte)),
        }
    }

    fn process_ground(&mut self, byte: u8) -> Option<Action> {
        if byte >= 0x80 {
            return self.start_utf8(byte);
        }

        Some(Action::Print(byte as char))
    }

    fn start_utf8(&mut self, byte: u8) -> Option<Action> {
        self.utf8_buffer.clear();
        self.utf8_buffer.push(byte);

        self.utf8_remaining = match byte {
            0xc0..=0xdf => 1,
            0xe0..=0xef => 2,
            0xf0..=0xf7 => 3,
            _ => return Some(Action::Print(char::REPLACEMENT_CHARACTER)),
        };

        None
    }

    fn process_utf8_continuation(&mut self, byte: u8) -> Option<Action> {
        if !(0x80..=0xbf).contains(&byte) {
            // The byte that broke the sequence is dropped.
            self.utf8_buffer.clear();
            self.utf8_remaining = 0;

            return Some(Action::Print(char::REPLACEMENT_CHARACTER));
        }

        self.utf8_buffer.push(byte);
        self.utf8_remaining -= 1;

        if self.utf8_remaining > 0 {
            return None;
        }

        let character = std::str::from_utf8(&self.utf8_buffer)
            .ok()
            .and_then(|string| string.chars().next())
            .unwrap_or(char::REPLACEMENT_CHARACTER);

        self.utf8_buffer.clear();

        Some(Action::Print(character))
    }

    fn process_escape(&mut self, byte: u8) -> Option<Action> {
        match byte {
            0x20..=0x2f => {
                self.intermediates.push(byte);
                self.state = State::EscapeIntermediate;
                None
            },
            b'[' => {
                self.state = State::CsiEntry;
                self.clear_params();
                None
            },
            // OSC, DCS, SOS, PM, APC
            b']' | b'P' | b'X' | b'^' | b'_' => {
                self.state = State::String;
                None
            },
            0x30..=0x7e => {
                self.state = State::Ground;
                self.dispatch_esc(byte)
            },
            _ => {
                self.state = State::Ground;
                None
            },
        }
    }

    fn process_escape_intermediate(&mut self, byte: u8) -> Option<Action> {
        match byte {
            0x20..=0x2f => {
                self.intermediates.push(byte);
                None
            },
            0x30..=0x7e => {
                self.state = State::Ground;
                self.dispatch_esc(byte)
            },
            _ => {
                self.state = State::Ground;
                None
            },
        }
    }

    fn dispatch_esc(&mut self, final_byte: u8) -> Option<Action> {
        let action = match self.intermediates.as_slice() {
            [] => match final_byte {
                b'7' => EscAction::SaveCursor,
                b'8' => EscAction::RestoreCursor,
                b'D' => EscAction::Index,
                b'M' => EscAction::ReverseIndex,
                b'E' => EscAction::NextLine,
                b'H' => EscAction::HorizontalTabSet,
                b'c' => EscAction::FullReset,
                _ => EscAction::Unknown(vec![final_byte]),
            },
            [b'#'] if final_byte == b'8' => EscAction::AlignmentTest,
            [b'('] => EscAction::DesignateG0(final_byte),
            [b')'] => EscAction::DesignateG1(final_byte),
            intermediates => {
                let mut sequence = intermediates.to_vec();
                sequence.push(final_byte);
                EscAction::Unknown(sequence)
            },
        };

        Some(Action::Esc(action))
    }

    fn process_csi_entry(&mut self, byte: u8) -> Option<Action> {
        match byte {
            b'?' | b'>' | b'<' | b'=' => {
                self.private_marker = byte == b'?';
                self.state = State::CsiParam;
                None
            },
            _ => {
                self.state = State::CsiParam;
                self.process_csi_param(byte)
            },
        }
    }

    fn process_csi_param(&mut self, byte: u8) -> Option<Action> {
        match byte {
            0x30..=0x39 => {
                self.current_param = self
                    .current_param
                    .saturating_mul(10)
                    .saturating_add((byte - b'0') as u16);
                self.param_has_digit = true;
                None
            },
            b';' | b':' => {
                self.params.push(self.current_param);
                self.current_param = 0;
                self.param_has_digit = false;
                None
            },
            0x20..=0x2f => {
                self.finish_param();
                self.intermediates.push(byte);
                self.state = State::CsiIntermediate;
                None
            },
            0x40..=0x7e => {
                self.finish_param();
                self.state = State::Ground;
                self.dispatch_csi(byte)
            },
            _ => {
                self.state = State::CsiIgnore;
                None
            },
        }
    }

    fn finish_param(&mut self) {
        if self.param_has_digit || !self.params.is_empty() {
            self.params.push(self.current_param);
        }

        self.current_param = 0;
        self.param_has_digit = false;
    }

    fn process_csi_intermediate(&mut self, byte: u8) -> Option<Action> {
        match byte {
            0x20..=0x2f => {
                self.intermediates.push(byte);
                None
            },
            0x40..=0x7e => {
                self.state = State::Ground;
                self.dispatch_csi(byte)
            },
            _ => {
                self.state = State::CsiIgnore;
                None
            },
        }
    }

    fn process_csi_ignore(&mut self, byte: u8) -> Option<Action> {
        if (0x40..=0x7e).contains(&byte) {
            self.state = State::Ground;
        }

        None
    }

    fn dispatch_csi(&mut self, final_byte: u8) -> Option<Action> {
        Some(Action::Csi(CsiAction {
            params: std::mem::take(&mut self.params),
            intermediates: std::mem::take(&mut self.intermediates),
            final_byte,
            private: self.private_marker,
        }))
    }

    fn process_string(&mut self, byte: u8) -> Option<Action> {
        self.state = match (self.state, byte) {
            // BEL terminates OSC (xterm extension)
            (_, 0x07) => State::Ground,
            (_, 0x18 | 0x1a) => State::Ground,
            (_, 0x1b) => State::StringEscape,
            (State::StringEscape, b'\\') => State::Ground,
            _ => State::String,
        };

        None
    }
}
