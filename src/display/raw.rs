//! Unbuffered display writes and address counter tracking

use crate::coax::{CoaxError, Command, Payload};
use crate::device::Device;

use super::{Dimensions, DisplayError, DisplayResult, Position};

/// Device side of the display
///
/// Mirrors the device address counter so redundant loads can be skipped. The
/// shadow is `None` whenever the device counter is not known, after which
/// the next load is issued in full.
#[derive(Debug)]
pub struct DisplayCore {
    device: Device,
    dimensions: Dimensions,
    eab_address: Option<u8>,
    address_counter: Option<usize>,
    last_address: usize,
}

impl DisplayCore {
    pub fn new(device: Device, dimensions: Dimensions, eab_address: Option<u8>) -> Self {
        Self {
            device,
            dimensions,
            eab_address,
            address_counter: None,
            last_address: dimensions.buffer_length() - 1,
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn has_eab(&self) -> bool {
        self.eab_address.is_some()
    }

    pub fn address_counter(&self) -> Option<usize> {
        self.address_counter
    }

    pub fn calculate_address(&self, position: Position) -> DisplayResult<usize> {
        let columns = self.dimensions.columns;

        let address = match position {
            Position::Address(address) => address,
            Position::Index(index) => columns + index,
            Position::RowColumn(row, column) => columns + (row * columns) + column,
        };

        if address > self.last_address {
            return Err(DisplayError::AddressOutOfRange(address));
        }

        Ok(address)
    }

    pub fn move_cursor(&mut self, position: Position, force_load: bool) -> DisplayResult<bool> {
        let address = self.calculate_address(position)?;

        self.load_address_counter(address, force_load)
    }

    /// Write to the device without touching any shadow buffer
    ///
    /// When `eab` is provided the regen and EAB data are interleaved into a
    /// single EAB_WRITE_ALTERNATE. With no `position` the write starts at the
    /// current device address.
    pub fn write(
        &mut self,
        regen: &Payload,
        eab: Option<&Payload>,
        position: Option<Position>,
        restore_original_address: bool,
    ) -> DisplayResult<()> {
        let data = match eab {
            Some(eab) => {
                if !self.has_eab() {
                    return Err(DisplayError::NoEab);
                }

                Some(interleave(regen, eab)?)
            },
            None => None,
        };

        let original_address = if restore_original_address {
            Some(match self.address_counter {
                Some(address) => address,
                None => self.read_address_counter()?,
            })
        } else {
            None
        };

        if let Some(position) = position {
            let address = self.calculate_address(position)?;

            self.load_address_counter(address, false)?;
        }

        let result = match (data, self.eab_address) {
            (Some(data), Some(feature_address)) => self.device.execute_jumbo_write(
                data,
                |data| Command::EabWriteAlternate {
                    feature_address,
                    data,
                },
                Command::Data,
                -2,
            ),
            _ => self
                .device
                .execute_jumbo_write(regen.clone(), Command::WriteData, Command::Data, -1),
        };

        if let Err(error) = result {
            self.address_counter = None;

            return Err(error.into());
        }

        self.address_counter = self.calculate_address_after_write(regen.len());

        if let Some(original_address) = original_address {
            self.load_address_counter(original_address, true)?;
        }

        Ok(())
    }

    /// Read the device address counter into the shadow
    pub fn read_address_counter(&mut self) -> DisplayResult<usize> {
        let responses = self
            .device
            .execute(vec![Command::ReadAddressCounterHi, Command::ReadAddressCounterLo])?;

        let (Some(hi), Some(lo)) = (
            responses.first().and_then(|response| response.byte()),
            responses.get(1).and_then(|response| response.byte()),
        ) else {
            return Err(
                CoaxError::ProtocolError("Invalid address counter response".to_string()).into(),
            );
        };

        let address = ((hi as usize) << 8) | lo as usize;

        self.address_counter = Some(address);

        Ok(address)
    }

    /// Load the device address counter, sending only the bytes that changed
    /// unless `force_load` is set
    pub fn load_address_counter(&mut self, address: usize, force_load: bool) -> DisplayResult<bool> {
        if self.address_counter == Some(address) && !force_load {
            return Ok(false);
        }

        let (hi, lo) = split_address(address);
        let current = self.address_counter.map(split_address);

        let mut commands = Vec::with_capacity(2);

        if force_load || current.map(|(current_hi, _)| current_hi) != Some(hi) {
            commands.push(Command::LoadAddressCounterHi(hi));
        }

        if force_load || current.map(|(_, current_lo)| current_lo) != Some(lo) {
            commands.push(Command::LoadAddressCounterLo(lo));
        }

        if let Err(error) = self.device.execute(commands) {
            self.address_counter = None;

            return Err(error.into());
        }

        self.address_counter = Some(address);

        Ok(true)
    }

    pub fn load_eab_mask(&mut self, mask: u8) -> DisplayResult<()> {
        let Some(feature_address) = self.eab_address else {
            return Err(DisplayError::NoEab);
        };

        self.device.execute(vec![Command::EabLoadMask {
            feature_address,
            mask,
        }])?;

        Ok(())
    }

    // The device behavior past the last address is not known, so the shadow is
    // dropped rather than wrapped.
    fn calculate_address_after_write(&self, count: usize) -> Option<usize> {
        let address = self.address_counter? + count;

        if address > self.last_address {
            return None;
        }

        Some(address)
    }
}

fn split_address(address: usize) -> (u8, u8) {
    (((address >> 8) & 0xff) as u8, (address & 0xff) as u8)
}

fn interleave(regen: &Payload, eab: &Payload) -> DisplayResult<Payload> {
    fn zip(regen: &[u8], eab: &[u8]) -> Vec<u8> {
        regen
            .iter()
            .zip(eab)
            .flat_map(|(regen, eab)| [*regen, *eab])
            .collect()
    }

    match (regen, eab) {
        (Payload::Bytes(regen), Payload::Bytes(eab)) => {
            if regen.len() != eab.len() {
                return Err(DisplayError::LengthMismatch(
                    "Regen and EAB data length must be equal",
                ));
            }

            Ok(Payload::Bytes(zip(regen, eab)))
        },
        (
            Payload::Repeat {
                pattern: regen_pattern,
                count: regen_count,
            },
            Payload::Repeat {
                pattern: eab_pattern,
                count: eab_count,
            },
        ) => {
            if regen_pattern.len() != eab_pattern.len() {
                return Err(DisplayError::LengthMismatch(
                    "Regen and EAB pattern length must be equal",
                ));
            }

            if regen_count != eab_count {
                return Err(DisplayError::LengthMismatch(
                    "Regen and EAB pattern count must be equal",
                ));
            }

            Ok(Payload::Repeat {
                pattern: zip(regen_pattern, eab_pattern),
                count: *regen_count,
            })
        },
        _ => Err(DisplayError::LengthMismatch(
            "Regen and EAB data must be provided in same form",
        )),
    }
}
