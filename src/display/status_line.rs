//! Status line, the row above the display body

use crate::coax::Payload;
use crate::keyboard::KeyboardModifiers;

use super::encoding::encode_string;
use super::{Display, DisplayError, DisplayResult, Position};

pub const KEYBOARD_MODIFIERS_COLUMN: usize = 35;
pub const KEYBOARD_INSERT_COLUMN: usize = 45;

const SHIFT_INDICATOR: u8 = 0xda;
const INSERT_INDICATOR: u8 = 0xd3;

/// Writes to the status line, preserving the body address counter
pub struct StatusLine<'a> {
    display: &'a mut Display,
}

impl<'a> StatusLine<'a> {
    pub(super) fn new(display: &'a mut Display) -> Self {
        Self { display }
    }

    pub fn columns(&self) -> usize {
        self.display.dimensions().columns
    }

    pub fn write(&mut self, column: usize, data: &[u8]) -> DisplayResult<()> {
        let columns = self.columns();

        if column >= columns {
            return Err(DisplayError::ColumnOutOfRange(column));
        }

        if column + data.len() > columns {
            return Err(DisplayError::LengthOutOfRange(data.len()));
        }

        self.display.write(
            &Payload::Bytes(data.to_vec()),
            None,
            Some(Position::Address(column)),
            true,
        )
    }

    pub fn write_string(&mut self, column: usize, string: &str) -> DisplayResult<()> {
        self.write(column, &encode_string(string))
    }

    pub fn write_keyboard_modifiers(&mut self, modifiers: KeyboardModifiers) -> DisplayResult<()> {
        let indicator = if modifiers.is_shift() { SHIFT_INDICATOR } else { 0x00 };

        self.write(KEYBOARD_MODIFIERS_COLUMN, &[indicator])
    }

    pub fn write_keyboard_insert(&mut self, insert: bool) -> DisplayResult<()> {
        let indicator = if insert { INSERT_INDICATOR } else { 0x00 };

        self.write(KEYBOARD_INSERT_COLUMN, &[indicator])
    }
}
