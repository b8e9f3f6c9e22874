//! A scripted coax interface standing in for the serial adapter

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use oec::coax::{CoaxError, CoaxResult, Command, DeviceAddress, Interface, PollResponse, Response, TerminalId};
use oec::interface::InterfaceWrapper;

/// CUT, model 2, keyboard 15
pub const TERMINAL_ID: u8 = 0b1111_0100;

/// What the attached terminal does, shared with the test
#[derive(Debug, Clone, Default)]
pub struct TerminalState {
    pub present: Rc<Cell<bool>>,
    pub poll_responses: Rc<RefCell<VecDeque<PollResponse>>>,
    pub log: Rc<RefCell<Vec<Command>>>,
}

impl TerminalState {
    pub fn queue_keystroke(&self, scan_code: u8) {
        self.poll_responses
            .borrow_mut()
            .push_back(PollResponse::Keystroke(scan_code));
    }

    pub fn commands(&self) -> Vec<Command> {
        self.log.borrow().clone()
    }

    fn respond(&self, command: &Command) -> CoaxResult<Response> {
        if !self.present.get() {
            return Err(CoaxError::ReceiveTimeout);
        }

        match command {
            Command::Poll(_) => {
                let response = self.poll_responses.borrow_mut().pop_front().unwrap_or(PollResponse::Empty);

                Ok(Response::Poll(response))
            },
            Command::ReadTerminalId => Ok(Response::TerminalId(TerminalId::try_from(TERMINAL_ID)?)),
            // No extended ID or features, so the 3278 typewriter keymap is used
            Command::ReadExtendedId => Ok(Response::Ack),
            Command::ReadFeatureId(_) => Err(CoaxError::ReceiveTimeout),
            _ => Ok(Response::Ack),
        }
    }
}

pub struct ScriptedInterface {
    state: TerminalState,
}

impl Interface for ScriptedInterface {
    fn identifier(&self) -> &str {
        "/dev/ttyTEST"
    }

    fn legacy_firmware_detected(&self) -> bool {
        false
    }

    fn execute(&mut self, commands: &[(DeviceAddress, Command)], _timeout: Duration) -> Vec<CoaxResult<Response>> {
        commands
            .iter()
            .map(|(_, command)| {
                self.state.log.borrow_mut().push(command.clone());
                self.state.respond(command)
            })
            .collect()
    }
}

pub fn scripted_interface() -> (Box<dyn Interface>, TerminalState) {
    let state = TerminalState::default();

    (
        Box::new(ScriptedInterface {
            state: state.clone(),
        }),
        state,
    )
}

pub fn scripted_interface_wrapper() -> (InterfaceWrapper, TerminalState) {
    let (interface, state) = scripted_interface();

    (
        InterfaceWrapper::new(interface, None, Duration::from_millis(1)),
        state,
    )
}
