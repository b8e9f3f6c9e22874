//! Coax interface facade
//!
//! [`InterfaceWrapper`] is the single, shared handle through which the
//! controller, terminal and display reach the coax interface. It adds the
//! receive timeout, jumbo write policy and aggregate error reporting on top of
//! a raw [`Interface`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coax::{CoaxError, CoaxResult, Command, DeviceAddress, Interface, Response};

/// Maximum write length used when splitting jumbo writes for legacy firmware
pub const LEGACY_JUMBO_WRITE_MAX_LENGTH: usize = 1024;

/// Default time to wait for a device response
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(1);

/// How writes longer than the interface frame limit are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JumboWriteStrategy {
    /// Send the write as-is
    Ignore,
    /// Split the write into multiple commands
    Split,
}

/// One or more commands in a list failed
#[derive(Debug, thiserror::Error)]
pub struct ExecuteError {
    pub errors: Vec<CoaxError>,
    pub responses: Vec<CoaxResult<Response>>,
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [error] => write!(f, "{}", error),
            errors => write!(f, "{} errors occurred", errors.len()),
        }
    }
}

/// Shared handle on the coax interface
#[derive(Clone)]
pub struct InterfaceWrapper {
    interface: Rc<RefCell<Box<dyn Interface>>>,
    identifier: String,
    timeout: Duration,
    jumbo_write_strategy: Option<JumboWriteStrategy>,
    jumbo_write_max_length: Option<usize>,
    supports_3299: bool,
}

impl InterfaceWrapper {
    pub fn new(
        interface: Box<dyn Interface>,
        jumbo_write_strategy: Option<JumboWriteStrategy>,
        timeout: Duration,
    ) -> Self {
        let identifier = interface.identifier().to_string();
        let supports_3299 = interface.supports_3299();

        let jumbo_write_strategy = match jumbo_write_strategy {
            None if interface.legacy_firmware_detected() => {
                log_legacy_jumbo_write_notice(LEGACY_JUMBO_WRITE_MAX_LENGTH);

                Some(JumboWriteStrategy::Split)
            },
            strategy => strategy,
        };

        let jumbo_write_max_length = (jumbo_write_strategy == Some(JumboWriteStrategy::Split))
            .then_some(LEGACY_JUMBO_WRITE_MAX_LENGTH);

        Self {
            interface: Rc::new(RefCell::new(interface)),
            identifier,
            timeout,
            jumbo_write_strategy,
            jumbo_write_max_length,
            supports_3299,
        }
    }

    /// Name of the underlying port
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn supports_3299(&self) -> bool {
        self.supports_3299
    }

    pub fn jumbo_write_strategy(&self) -> Option<JumboWriteStrategy> {
        self.jumbo_write_strategy
    }

    pub fn jumbo_write_max_length(&self) -> Option<usize> {
        self.jumbo_write_max_length
    }

    /// Execute a single command
    pub fn execute_one(&self, device_address: DeviceAddress, command: Command) -> CoaxResult<Response> {
        let mut responses = self
            .interface
            .borrow_mut()
            .execute(&[(device_address, command)], self.timeout);

        responses.pop().unwrap_or(Err(CoaxError::ProtocolError(
            "No response to command".to_string(),
        )))
    }

    /// Execute a list of commands
    ///
    /// Every failing command is collected into the returned [`ExecuteError`],
    /// along with all responses. Receive timeouts are only treated as errors
    /// when `receive_timeout_is_error` is set.
    pub fn execute(
        &self,
        commands: &[(DeviceAddress, Command)],
        receive_timeout_is_error: bool,
    ) -> Result<Vec<CoaxResult<Response>>, ExecuteError> {
        let responses = self.interface.borrow_mut().execute(commands, self.timeout);

        let errors = get_errors(&responses, receive_timeout_is_error);

        if !errors.is_empty() {
            return Err(ExecuteError { errors, responses });
        }

        Ok(responses)
    }
}

impl fmt::Debug for InterfaceWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceWrapper")
            .field("identifier", &self.identifier)
            .field("timeout", &self.timeout)
            .field("jumbo_write_strategy", &self.jumbo_write_strategy)
            .field("jumbo_write_max_length", &self.jumbo_write_max_length)
            .field("supports_3299", &self.supports_3299)
            .finish()
    }
}

/// Collect the errors out of a list of responses
pub fn get_errors(responses: &[CoaxResult<Response>], receive_timeout_is_error: bool) -> Vec<CoaxError> {
    responses
        .iter()
        .filter_map(|response| response.as_ref().err())
        .filter(|error| receive_timeout_is_error || **error != CoaxError::ReceiveTimeout)
        .cloned()
        .collect()
}

fn log_legacy_jumbo_write_notice(max_length: usize) {
    tracing::warn!(
        "Older interface firmware detected that does not support the jumbo write \
         required to write a full screen; large writes will be split into {}-byte \
         writes. Set COAX_JUMBO=ignore to attempt jumbo writes anyway.",
        max_length
    );
}
