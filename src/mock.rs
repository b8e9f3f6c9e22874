//! Scripted coax interface for unit tests

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::coax::{CoaxResult, Command, DeviceAddress, Interface, Response};
use crate::interface::{InterfaceWrapper, DEFAULT_RECEIVE_TIMEOUT};

pub type Responder = Box<dyn FnMut(DeviceAddress, &Command) -> CoaxResult<Response>>;

/// Shared view of what the mock interface was asked to do
#[derive(Clone, Default)]
pub struct MockState {
    log: Rc<RefCell<Vec<(DeviceAddress, Command)>>>,
    responder: Rc<RefCell<Option<Responder>>>,
}

impl MockState {
    pub fn respond_with(&self, responder: impl FnMut(DeviceAddress, &Command) -> CoaxResult<Response> + 'static) {
        *self.responder.borrow_mut() = Some(Box::new(responder));
    }

    /// Commands executed so far, without addresses
    pub fn commands(&self) -> Vec<Command> {
        self.log.borrow().iter().map(|(_, command)| command.clone()).collect()
    }

    pub fn addressed_commands(&self) -> Vec<(DeviceAddress, Command)> {
        self.log.borrow().clone()
    }

    pub fn reset(&self) {
        self.log.borrow_mut().clear();
    }
}

struct MockInterface {
    state: MockState,
    legacy: bool,
    multiplexer: bool,
}

impl Interface for MockInterface {
    fn identifier(&self) -> &str {
        "/dev/mock"
    }

    fn legacy_firmware_detected(&self) -> bool {
        self.legacy
    }

    fn supports_3299(&self) -> bool {
        self.multiplexer
    }

    fn execute(&mut self, commands: &[(DeviceAddress, Command)], _timeout: Duration) -> Vec<CoaxResult<Response>> {
        self.state.log.borrow_mut().extend(commands.iter().cloned());

        let mut responder = self.state.responder.borrow_mut();

        commands
            .iter()
            .map(|(address, command)| match responder.as_mut() {
                Some(responder) => responder(*address, command),
                None => Ok(Response::Ack),
            })
            .collect()
    }
}

/// A mock interface that acknowledges every command until told otherwise
pub fn mock_interface(legacy: bool) -> (InterfaceWrapper, MockState) {
    build(legacy, false)
}

/// A mock interface that can address 3299 multiplexer ports
pub fn mock_multiplexer_interface() -> (InterfaceWrapper, MockState) {
    build(false, true)
}

fn build(legacy: bool, multiplexer: bool) -> (InterfaceWrapper, MockState) {
    let state = MockState::default();

    let interface = MockInterface {
        state: state.clone(),
        legacy,
        multiplexer,
    };

    (
        InterfaceWrapper::new(Box::new(interface), None, DEFAULT_RECEIVE_TIMEOUT),
        state,
    )
}
