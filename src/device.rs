//! Device addressing and probing helpers

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coax::{
    parse_features, read_feature_ids, CoaxError, CoaxResult, Command, DeviceAddress, Feature,
    Features, Payload, Response, TerminalId,
};
use crate::interface::{ExecuteError, InterfaceWrapper, JumboWriteStrategy};

/// Frame limit of the 3299 multiplexer; the real limit is unknown but this
/// size is reliable.
pub const MULTIPLEXER_JUMBO_WRITE_MAX_LENGTH: usize = 1024;

/// A feature that is present but not reported by the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureOverride {
    pub feature: Feature,
    pub address: u8,
}

/// A device on the coax
#[derive(Debug, Clone)]
pub struct Device {
    pub interface: InterfaceWrapper,
    pub address: DeviceAddress,
}

impl Device {
    pub fn new(interface: InterfaceWrapper, address: DeviceAddress) -> Self {
        Self { interface, address }
    }

    pub fn execute_one(&self, command: Command) -> CoaxResult<Response> {
        self.interface.execute_one(self.address, command)
    }

    /// Execute commands, failing if any command fails
    pub fn execute(&self, commands: Vec<Command>) -> Result<Vec<Response>, ExecuteError> {
        let responses = self
            .interface
            .execute(&address_commands(self.address, commands), true)?;

        Ok(responses.into_iter().flatten().collect())
    }

    /// Execute a write that may need to be split to fit the frame limit
    ///
    /// `first` builds the command carrying the first chunk, `subsequent` the
    /// commands carrying the rest.
    pub fn execute_jumbo_write<F, S>(
        &self,
        data: Payload,
        first: F,
        subsequent: S,
        first_chunk_max_length_adjustment: isize,
    ) -> Result<Vec<Response>, ExecuteError>
    where
        F: FnOnce(Payload) -> Command,
        S: Fn(Payload) -> Command,
    {
        let max_length = if self.address.is_some() {
            Some(MULTIPLEXER_JUMBO_WRITE_MAX_LENGTH)
        } else if self.interface.jumbo_write_strategy() == Some(JumboWriteStrategy::Split) {
            self.interface.jumbo_write_max_length()
        } else {
            None
        };

        let mut chunks = jumbo_write_split_data(data, max_length, first_chunk_max_length_adjustment)
            .into_iter();

        let mut commands = Vec::new();

        if let Some(chunk) = chunks.next() {
            commands.push(first(chunk));
        }

        commands.extend(chunks.map(subsequent));

        if commands.len() > 1 {
            tracing::debug!("Jumbo write split into {}", commands.len());
        }

        self.execute(commands)
    }
}

/// Tag commands with a device address
pub fn address_commands(
    address: DeviceAddress,
    commands: impl IntoIterator<Item = Command>,
) -> Vec<(DeviceAddress, Command)> {
    commands.into_iter().map(|command| (address, command)).collect()
}

/// Human readable device address
pub fn format_address(interface: &InterfaceWrapper, address: DeviceAddress) -> String {
    let identifier = interface.identifier();

    match address {
        None => format!("{}#0", identifier),
        Some(address) if address & 0b111 == 0 => {
            let port = (address >> 3) & 0b111;
            let port = ((port & 0b001) << 2) | (port & 0b010) | ((port & 0b100) >> 2);

            format!("{}#{}", identifier, port)
        },
        Some(address) => format!("{}?{:06b}", identifier, address),
    }
}

/// Read the terminal and extended identifiers
///
/// READ_EXTENDED_ID frequently fails on the first request so it is retried,
/// sleeping `retry_delay` between attempts.
pub fn get_ids(
    interface: &InterfaceWrapper,
    address: DeviceAddress,
    extended_id_retry_attempts: usize,
    retry_delay: Duration,
) -> CoaxResult<(Option<TerminalId>, Option<String>)> {
    let terminal_id = match interface.execute_one(address, Command::ReadTerminalId) {
        Ok(Response::TerminalId(terminal_id)) => Some(terminal_id),
        Ok(_) => None,
        Err(CoaxError::ProtocolError(message)) => {
            tracing::warn!("READ_TERMINAL_ID protocol error: {}", message);
            None
        },
        Err(error) => return Err(error),
    };

    let mut extended_id = None;

    for _ in 0..extended_id_retry_attempts {
        match interface.execute_one(address, Command::ReadExtendedId) {
            Ok(Response::ExtendedId(bytes)) => {
                extended_id = Some(to_hex(&bytes));
                break;
            },
            Ok(_) => break,
            Err(CoaxError::ProtocolError(message)) => {
                tracing::warn!("READ_EXTENDED_ID protocol error: {}", message);
            },
            Err(error) => return Err(error),
        }

        thread::sleep(retry_delay);
    }

    Ok((terminal_id, extended_id))
}

/// Query the terminal features, then apply the overrides
pub fn get_features(
    interface: &InterfaceWrapper,
    address: DeviceAddress,
    overrides: &[FeatureOverride],
) -> Result<Features, ExecuteError> {
    let commands = read_feature_ids();

    let responses = interface.execute(&address_commands(address, commands.clone()), false)?;

    let mut features = parse_features(&responses, &commands);

    for feature_override in overrides {
        tracing::info!(
            "Adding override feature {:?} @ {}",
            feature_override.feature,
            feature_override.address
        );

        features.insert(feature_override.feature, feature_override.address);
    }

    Ok(features)
}

/// Split a write into chunks that fit within `max_length`
///
/// The first chunk is `max_length + first_chunk_max_length_adjustment` long to
/// leave room for the command that carries it.
pub fn jumbo_write_split_data(
    data: Payload,
    max_length: Option<usize>,
    first_chunk_max_length_adjustment: isize,
) -> Vec<Payload> {
    let Some(max_length) = max_length else {
        return vec![data];
    };

    let first_chunk_max_length =
        (max_length as isize + first_chunk_max_length_adjustment).max(1) as usize;

    if data.len() <= first_chunk_max_length {
        return vec![data];
    }

    let bytes = data.expand();

    let (first, rest) = bytes.split_at(first_chunk_max_length);

    std::iter::once(first)
        .chain(rest.chunks(max_length.max(1)))
        .map(|chunk| Payload::Bytes(chunk.to_vec()))
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}
