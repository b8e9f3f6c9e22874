//! VT100 terminal emulation
//!
//! [`Vt100`] feeds host output through the [`Parser`] and applies the
//! resulting actions to a [`Screen`]. Bells and replies to host queries
//! (device status and attributes reports) are queued for the session to
//! collect.

mod parser;
mod screen;

pub use self::parser::{Action, CsiAction, EscAction, Parser};
pub use self::screen::{Cursor, Screen};

/// Reply to a primary device attributes request: VT100 with advanced video
const DEVICE_ATTRIBUTES: &[u8] = b"\x1b[?1;2c";

#[derive(Debug)]
pub struct Vt100 {
    parser: Parser,
    screen: Screen,
    bell: bool,
    replies: Vec<u8>,
}

impl Vt100 {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            parser: Parser::new(),
            screen: Screen::new(rows, cols),
            bell: false,
            replies: Vec::new(),
        }
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn cursor(&self) -> Cursor {
        self.screen.cursor()
    }

    /// Rows changed since the last call
    pub fn take_dirty(&mut self) -> Vec<usize> {
        self.screen.take_dirty()
    }

    /// Whether BEL was received since the last call
    pub fn take_bell(&mut self) -> bool {
        std::mem::take(&mut self.bell)
    }

    /// Bytes to write back to the host
    pub fn take_replies(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.replies)
    }

    pub fn feed(&mut self, data: &[u8]) {
        for action in self.parser.parse(data) {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Print(character) => self.screen.print(character),
            Action::Execute(byte) => self.execute(byte),
            Action::Csi(csi) => self.handle_csi(&csi),
            Action::Esc(esc) => self.handle_esc(esc),
        }
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x07 => self.bell = true,
            0x08 => self.screen.backspace(),
            0x09 => self.screen.tab(),
            // LF, VT, FF
            0x0a..=0x0c => self.screen.linefeed(),
            0x0d => self.screen.carriage_return(),
            _ => {},
        }
    }

    fn handle_esc(&mut self, esc: EscAction) {
        match esc {
            EscAction::SaveCursor => self.screen.save_cursor(),
            EscAction::RestoreCursor => self.screen.restore_cursor(),
            EscAction::Index => self.screen.index(),
            EscAction::ReverseIndex => self.screen.reverse_index(),
            EscAction::NextLine => self.screen.next_line(),
            EscAction::HorizontalTabSet => self.screen.set_tab_stop(),
            EscAction::FullReset => {
                self.parser.reset();
                self.screen.reset();
            },
            EscAction::AlignmentTest => self.screen.alignment_test(),
            // Only the ASCII character set is displayed.
            EscAction::DesignateG0(_) | EscAction::DesignateG1(_) => {},
            EscAction::Unknown(sequence) => {
                tracing::debug!("Unknown ESC sequence: {:?}", sequence);
            },
        }
    }

    fn handle_csi(&mut self, csi: &CsiAction) {
        if csi.private {
            self.handle_csi_private(csi);
            return;
        }

        if !csi.intermediates.is_empty() {
            tracing::debug!(
                "Unknown CSI with intermediates: {:?} {:?} {}",
                csi.intermediates,
                csi.params,
                csi.final_byte as char
            );
            return;
        }

        let n = csi.param(0, 1) as usize;

        match csi.final_byte {
            b'@' => self.screen.insert_chars(n),
            b'A' => self.screen.move_cursor_up(n),
            b'B' | b'e' => self.screen.move_cursor_down(n),
            b'C' | b'a' => self.screen.move_cursor_forward(n),
            b'D' => self.screen.move_cursor_backward(n),
            b'E' => {
                self.screen.move_cursor_down(n);
                self.screen.carriage_return();
            },
            b'F' => {
                self.screen.move_cursor_up(n);
                self.screen.carriage_return();
            },
            b'G' | b'`' => self.screen.set_cursor_col(n - 1),
            b'H' | b'f' => {
                let row = csi.param(0, 1) as usize;
                let col = csi.param(1, 1) as usize;

                self.screen.move_cursor_to(row - 1, col - 1);
            },
            b'J' => self.screen.erase_in_display(csi.param(0, 0)),
            b'K' => self.screen.erase_in_line(csi.param(0, 0)),
            b'L' => self.screen.insert_lines(n),
            b'M' => self.screen.delete_lines(n),
            b'P' => self.screen.delete_chars(n),
            b'S' => self.screen.scroll_up(n),
            b'T' => self.screen.scroll_down(n),
            b'X' => self.screen.erase_chars(n),
            b'd' => self.screen.set_cursor_row(n - 1),
            b'g' => self.screen.clear_tab_stop(csi.param(0, 0)),
            b'h' | b'l' => {
                let enabled = csi.final_byte == b'h';

                for mode in &csi.params {
                    match mode {
                        // IRM
                        4 => self.screen.set_insert_mode(enabled),
                        _ => tracing::debug!("Unsupported mode: {}", mode),
                    }
                }
            },
            // Renditions have no equivalent without EAB mapping.
            b'm' => {},
            b'n' => self.device_status_report(csi.param(0, 0)),
            b'c' => {
                if csi.param(0, 0) == 0 {
                    self.replies.extend_from_slice(DEVICE_ATTRIBUTES);
                }
            },
            b'r' => {
                let top = csi.param(0, 1) as usize;
                let bottom = csi.param(1, self.screen.rows() as u16) as usize;

                self.screen.set_scroll_region(top - 1, bottom - 1);
            },
            b's' => self.screen.save_cursor(),
            b'u' => self.screen.restore_cursor(),
            _ => {
                tracing::debug!("Unknown CSI: {:?}{}", csi.params, csi.final_byte as char);
            },
        }
    }

    fn handle_csi_private(&mut self, csi: &CsiAction) {
        match csi.final_byte {
            b'h' | b'l' => {
                let enabled = csi.final_byte == b'h';

                for mode in &csi.params {
                    match mode {
                        // DECOM
                        6 => self.screen.set_origin_mode(enabled),
                        // DECAWM
                        7 => self.screen.set_autowrap(enabled),
                        _ => tracing::debug!("Unsupported DEC mode: {}", mode),
                    }
                }
            },
            _ => {
                tracing::debug!("Unknown private CSI: ?{:?}{}", csi.params, csi.final_byte as char);
            },
        }
    }

    fn device_status_report(&mut self, request: u16) {
        match request {
            5 => self.replies.extend_from_slice(b"\x1b[0n"),
            6 => {
                let cursor = self.screen.cursor();

                let row = if self.screen.origin_mode() {
                    cursor.row - self.screen.scroll_region().0
                } else {
                    cursor.row
                };

                let reply = format!("\x1b[{};{}R", row + 1, cursor.col + 1);

                self.replies.extend_from_slice(reply.as_bytes());
            },
            _ => {},
        }
    }
}
