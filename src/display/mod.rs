//! Terminal display
//!
//! The display is split into two layers:
//! - [`DisplayCore`] talks to the device: it tracks the address counter and
//!   issues the raw write, load and read commands.
//! - [`BufferedWriter`] holds a shadow copy of the regen and EAB buffers and
//!   the set of addresses that have changed since the last flush.
//!
//! [`Display`] composes the two. Sessions update the shadow buffers with
//! [`Display::buffered_write_byte`] and push the changes with
//! [`Display::flush`], which writes the single contiguous range spanning all
//! changed addresses.

mod buffer;
mod raw;
pub mod encoding;
mod status_line;

pub use self::buffer::BufferedWriter;
pub use self::raw::DisplayCore;
pub use self::status_line::StatusLine;

use crate::coax::{CoaxError, Payload};
use crate::device::Device;
use crate::interface::ExecuteError;

/// Display size, not including the status line row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub rows: usize,
    pub columns: usize,
}

impl Dimensions {
    pub const fn new(rows: usize, columns: usize) -> Self {
        Self { rows, columns }
    }

    /// Number of addressable bytes, including the status line
    pub fn buffer_length(&self) -> usize {
        (self.rows + 1) * self.columns
    }
}

/// A location on the display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Raw buffer address; the status line starts at 0
    Address(usize),
    /// Offset into the body, after the status line
    Index(usize),
    /// Row and column within the body
    RowColumn(usize, usize),
}

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("No EAB feature")]
    NoEab,

    #[error("{0}")]
    LengthMismatch(&'static str),

    #[error("Address {0} is out of range")]
    AddressOutOfRange(usize),

    #[error("Column {0} is out of range")]
    ColumnOutOfRange(usize),

    #[error("Length {0} is out of range")]
    LengthOutOfRange(usize),

    #[error(transparent)]
    Coax(#[from] CoaxError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),
}

pub type DisplayResult<T> = Result<T, DisplayError>;

/// A buffered terminal display
#[derive(Debug)]
pub struct Display {
    core: DisplayCore,
    buffer: BufferedWriter,
}

impl Display {
    pub fn new(device: Device, dimensions: Dimensions, eab_address: Option<u8>) -> Self {
        let buffer = BufferedWriter::new(dimensions.buffer_length(), eab_address.is_some());

        Self {
            core: DisplayCore::new(device, dimensions, eab_address),
            buffer,
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        self.core.dimensions()
    }

    pub fn has_eab(&self) -> bool {
        self.core.has_eab()
    }

    /// Shadow of the device address counter, `None` when unknown
    pub fn address_counter(&self) -> Option<usize> {
        self.core.address_counter()
    }

    pub fn regen_buffer(&self) -> &[u8] {
        self.buffer.regen()
    }

    pub fn eab_buffer(&self) -> Option<&[u8]> {
        self.buffer.eab()
    }

    /// Addresses changed since the last flush
    pub fn dirty(&self) -> impl Iterator<Item = usize> + '_ {
        self.buffer.dirty()
    }

    pub fn status_line(&mut self) -> StatusLine<'_> {
        StatusLine::new(self)
    }

    /// Clear the body, and optionally the status line
    pub fn clear(&mut self, clear_status_line: bool) -> DisplayResult<()> {
        let Dimensions { rows, columns } = self.dimensions();

        let (address, count) = if clear_status_line {
            (0, (rows + 1) * columns)
        } else {
            (columns, rows * columns)
        };

        let regen = Payload::Repeat {
            pattern: vec![0x00],
            count,
        };

        let eab = self.has_eab().then(|| regen.clone());

        self.write(&regen, eab.as_ref(), Some(Position::Address(address)), false)?;

        self.move_cursor(Position::RowColumn(0, 0), true)?;

        Ok(())
    }

    /// Load the address counter, returning whether a load was required
    pub fn move_cursor(&mut self, position: Position, force_load: bool) -> DisplayResult<bool> {
        self.core.move_cursor(position, force_load)
    }

    /// Write to the device immediately, keeping the shadow buffers in step
    pub fn write(
        &mut self,
        regen: &Payload,
        eab: Option<&Payload>,
        position: Option<Position>,
        restore_original_address: bool,
    ) -> DisplayResult<()> {
        // The start address is needed to commit the write to the shadow buffers.
        let start_address = match position {
            Some(position) => self.core.calculate_address(position)?,
            None => match self.core.address_counter() {
                Some(address) => address,
                None => self.core.read_address_counter()?,
            },
        };

        self.core.write(regen, eab, position, restore_original_address)?;

        self.buffer.commit(start_address, regen, eab);

        Ok(())
    }

    /// Update the shadow buffers, returning whether anything changed
    pub fn buffered_write_byte(
        &mut self,
        regen_byte: u8,
        eab_byte: Option<u8>,
        position: Position,
    ) -> DisplayResult<bool> {
        if eab_byte.is_some() && !self.has_eab() {
            return Err(DisplayError::NoEab);
        }

        let address = self.core.calculate_address(position)?;

        Ok(self.buffer.write_byte(address, regen_byte, eab_byte))
    }

    /// Write the changed range to the device, returning whether anything was
    /// written
    ///
    /// The dirty set is left intact if the write fails.
    pub fn flush(&mut self) -> DisplayResult<bool> {
        let Some((start_address, end_address)) = self.buffer.dirty_range() else {
            return Ok(false);
        };

        tracing::debug!("Writing range {}-{}", start_address, end_address);

        let (regen, eab) = self.buffer.range(start_address, end_address);

        self.core.write(
            &regen,
            eab.as_ref(),
            Some(Position::Address(start_address)),
            false,
        )?;

        self.buffer.clean(start_address, end_address);

        Ok(true)
    }

    pub fn load_eab_mask(&mut self, mask: u8) -> DisplayResult<()> {
        self.core.load_eab_mask(mask)
    }
}
