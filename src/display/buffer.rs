//! Shadow regen and EAB buffers with dirty tracking

use std::collections::BTreeSet;

use crate::coax::Payload;

/// Shadow copy of what should be on the screen
#[derive(Debug, Clone)]
pub struct BufferedWriter {
    regen: Vec<u8>,
    eab: Option<Vec<u8>>,
    dirty: BTreeSet<usize>,
}

impl BufferedWriter {
    pub fn new(length: usize, has_eab: bool) -> Self {
        Self {
            regen: vec![0x00; length],
            eab: has_eab.then(|| vec![0x00; length]),
            dirty: BTreeSet::new(),
        }
    }

    pub fn regen(&self) -> &[u8] {
        &self.regen
    }

    pub fn eab(&self) -> Option<&[u8]> {
        self.eab.as_deref()
    }

    pub fn dirty(&self) -> impl Iterator<Item = usize> + '_ {
        self.dirty.iter().copied()
    }

    /// Store a byte, marking the address dirty if it changed
    ///
    /// The EAB byte is ignored when there is no EAB buffer, and left as is
    /// when not provided.
    pub fn write_byte(&mut self, address: usize, regen_byte: u8, eab_byte: Option<u8>) -> bool {
        let regen_changed = self.regen[address] != regen_byte;

        let eab_changed = match (&self.eab, eab_byte) {
            (Some(eab), Some(eab_byte)) => eab[address] != eab_byte,
            _ => false,
        };

        if !regen_changed && !eab_changed {
            return false;
        }

        self.regen[address] = regen_byte;

        if let (Some(eab), Some(eab_byte)) = (&mut self.eab, eab_byte) {
            eab[address] = eab_byte;
        }

        self.dirty.insert(address);

        true
    }

    /// Inclusive range spanning every dirty address
    pub fn dirty_range(&self) -> Option<(usize, usize)> {
        Some((*self.dirty.first()?, *self.dirty.last()?))
    }

    /// Buffer contents for an inclusive range
    pub fn range(&self, start_address: usize, end_address: usize) -> (Payload, Option<Payload>) {
        let regen = Payload::Bytes(self.regen[start_address..=end_address].to_vec());

        let eab = self
            .eab
            .as_ref()
            .map(|eab| Payload::Bytes(eab[start_address..=end_address].to_vec()));

        (regen, eab)
    }

    /// Mark an inclusive range as written
    pub fn clean(&mut self, start_address: usize, end_address: usize) {
        let written: Vec<usize> = self.dirty.range(start_address..=end_address).copied().collect();

        for address in written {
            self.dirty.remove(&address);
        }
    }

    /// Record data that has already been written to the device
    pub fn commit(&mut self, start_address: usize, regen: &Payload, eab: Option<&Payload>) {
        let length = self.regen.len();

        let regen = regen.expand();
        let end_address = (start_address + regen.len()).min(length);

        if start_address >= end_address {
            return;
        }

        let count = end_address - start_address;

        self.regen[start_address..end_address].copy_from_slice(&regen[..count]);

        if let (Some(buffer), Some(eab)) = (&mut self.eab, eab) {
            let eab = eab.expand();
            let count = count.min(eab.len());

            buffer[start_address..start_address + count].copy_from_slice(&eab[..count]);
        }

        self.clean(start_address, end_address - 1);
    }
}
