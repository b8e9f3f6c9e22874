//! The controller
//!
//! Polls the coax interface for terminals, attaches them when they respond
//! and binds each one to a host session. Between POLLs the time left until
//! the next POLL is due is spent servicing host I/O.
//!
//! Attached terminals are POLLed together every attached poll period. One
//! detached address, the direct address or a 3299 multiplexer port, is
//! POLLed every detached poll period looking for new terminals.
//!
//! Everything runs on one thread: host I/O servicing always finishes, or
//! times out, before the next POLL is issued.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::iter;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::coax::{CoaxError, Command, DeviceAddress, PollAction, PollResponse, PORT_MAP_3299};
use crate::config::Config;
use crate::device::format_address;
use crate::interface::InterfaceWrapper;
use crate::keyboard::Key;
use crate::selector::{PollSelector, Selector};
use crate::session::{HostIoOutcome, Session};
use crate::terminal::{create_terminal, AttachError, Terminal, TerminalOptions};

/// Maximum number of POLL rounds per run loop iteration while attached
/// terminals keep responding with data
const POLL_DEPTH: usize = 3;

/// Source of time for the run loop
pub trait Clock {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Creates the session for a newly attached terminal
pub type SessionFactory = Box<dyn FnMut(&Terminal) -> Box<dyn Session>>;

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Target time between POLLs of attached terminals
    pub attached_poll_period: Duration,
    /// Target time between POLLs of detached addresses; also the delay
    /// before retrying a session that failed to start
    pub detached_poll_period: Duration,
    pub terminal: TerminalOptions,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ControllerOptions {
    fn from(config: &Config) -> Self {
        Self {
            attached_poll_period: config.attached_poll_period(),
            detached_poll_period: config.detached_poll_period(),
            terminal: config.terminal_options(),
        }
    }
}

pub struct Controller {
    interface: InterfaceWrapper,
    options: ControllerOptions,
    create_session: SessionFactory,
    selector: Box<dyn Selector>,
    clock: Box<dyn Clock>,
    stop: Arc<AtomicBool>,

    terminals: BTreeMap<DeviceAddress, Terminal>,
    sessions: BTreeMap<DeviceAddress, Box<dyn Session>>,
    /// Descriptors registered with the selector and the terminal they serve
    session_fds: BTreeMap<RawFd, DeviceAddress>,
    /// Sessions whose buffered host output has not been handled yet; the
    /// selector does not signal it
    started_sessions: BTreeSet<DeviceAddress>,
    last_session_start_times: BTreeMap<DeviceAddress, Instant>,

    detached_poll_queue: VecDeque<DeviceAddress>,
    last_attached_poll_time: Option<Instant>,
    last_detached_poll_time: Option<Instant>,
    /// The last POLL round stopped at the depth limit with data pending
    last_poll_nonempty: bool,
}

impl Controller {
    pub fn new(interface: InterfaceWrapper, options: ControllerOptions, create_session: SessionFactory) -> Self {
        Self {
            interface,
            options,
            create_session,
            selector: Box::new(PollSelector::new()),
            clock: Box::new(SystemClock),
            stop: Arc::new(AtomicBool::new(false)),
            terminals: BTreeMap::new(),
            sessions: BTreeMap::new(),
            session_fds: BTreeMap::new(),
            started_sessions: BTreeSet::new(),
            last_session_start_times: BTreeMap::new(),
            detached_poll_queue: VecDeque::new(),
            last_attached_poll_time: None,
            last_detached_poll_time: None,
            last_poll_nonempty: false,
        }
    }

    pub fn with_selector(mut self, selector: Box<dyn Selector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Flag that stops [`Controller::run`] when set
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn terminal(&self, address: DeviceAddress) -> Option<&Terminal> {
        self.terminals.get(&address)
    }

    /// Addresses of the attached terminals, in address order
    pub fn attached_addresses(&self) -> Vec<DeviceAddress> {
        self.terminals.keys().copied().collect()
    }

    pub fn has_session(&self, address: DeviceAddress) -> bool {
        self.sessions.contains_key(&address)
    }

    /// Run until stopped, then shut down every session
    pub fn run(&mut self) {
        tracing::info!("Controller started");

        while !self.stop.load(Ordering::SeqCst) {
            self.run_loop();
        }

        let addresses: Vec<DeviceAddress> = self.sessions.keys().copied().collect();

        for address in addresses {
            self.terminate_session(address);
        }

        self.selector.clear();
        self.terminals.clear();
        self.detached_poll_queue.clear();

        tracing::info!("Controller stopped");
    }

    /// A single iteration of the run loop
    pub fn run_loop(&mut self) {
        self.retry_sessions();

        let poll_delay = self.calculate_poll_delay();

        if !poll_delay.is_zero() {
            let start_time = self.clock.now();

            if !self.sessions.is_empty() {
                self.update_sessions(poll_delay);
            }

            let remaining = poll_delay.saturating_sub(self.clock.now() - start_time);

            if !remaining.is_zero() {
                self.clock.sleep(remaining);
            }
        }

        self.poll_attached_terminals();
        self.poll_next_detached_address();
    }

    /// Time until the next POLL is due
    pub fn calculate_poll_delay(&self) -> Duration {
        let now = self.clock.now();

        let due = |last_poll_time: Option<Instant>, period: Duration| {
            last_poll_time.map_or(Duration::ZERO, |time| (time + period).saturating_duration_since(now))
        };

        if self.terminals.is_empty() {
            return due(self.last_detached_poll_time, self.options.detached_poll_period);
        }

        // Keep polling while terminals have something to say.
        if self.last_poll_nonempty {
            return Duration::ZERO;
        }

        due(self.last_attached_poll_time, self.options.attached_poll_period)
    }

    /// Addresses to search for new terminals
    ///
    /// A terminal on the direct address means there is no 3299 multiplexer,
    /// and a terminal on a port means there is one.
    pub fn detached_addresses(&self) -> Vec<DeviceAddress> {
        let direct_attached = self.terminals.contains_key(&None);
        let multiplexer_attached = self.terminals.keys().any(Option::is_some);

        let ports = PORT_MAP_3299.iter().map(|port| Some(*port));

        let addresses: Vec<DeviceAddress> = if direct_attached || !self.interface.supports_3299() {
            vec![None]
        } else if multiplexer_attached {
            ports.collect()
        } else {
            iter::once(None).chain(ports).collect()
        };

        addresses
            .into_iter()
            .filter(|address| !self.terminals.contains_key(address))
            .collect()
    }

    fn update_sessions(&mut self, duration: Duration) {
        let deadline = self.clock.now() + duration;

        let mut pending: BTreeSet<DeviceAddress> = std::mem::take(&mut self.started_sessions);
        let mut updated = BTreeSet::new();

        loop {
            let now = self.clock.now();

            if now >= deadline && pending.is_empty() {
                break;
            }

            let mut ready = std::mem::take(&mut pending);

            if !self.selector.is_empty() {
                let timeout = if ready.is_empty() {
                    deadline - now
                } else {
                    Duration::ZERO
                };

                match self.selector.select(timeout) {
                    Ok(fds) => ready.extend(fds.iter().filter_map(|fd| self.session_fds.get(fd).copied())),
                    Err(error) => tracing::warn!("Select error: {}", error),
                }
            }

            if ready.is_empty() {
                break;
            }

            for address in ready {
                match self.handle_host(address) {
                    Some(true) => {
                        updated.insert(address);
                    },
                    Some(false) => {},
                    None => {
                        updated.remove(&address);
                    },
                }
            }
        }

        for address in updated {
            self.render_session(address);
        }
    }

    /// Returns whether the session was updated, or `None` if it was replaced
    fn handle_host(&mut self, address: DeviceAddress) -> Option<bool> {
        let (Some(session), Some(terminal)) = (self.sessions.get_mut(&address), self.terminals.get_mut(&address))
        else {
            return None;
        };

        match session.handle_host(terminal) {
            Ok(HostIoOutcome::Progressed) => Some(true),
            Ok(HostIoOutcome::Idle) => Some(false),
            Ok(HostIoOutcome::Disconnected) => {
                tracing::info!("Session disconnected @ {}", format_address(&self.interface, address));

                self.restart_session(address);

                None
            },
            Err(error) => {
                tracing::error!("Session error @ {}: {}", format_address(&self.interface, address), error);

                self.restart_session(address);

                None
            },
        }
    }

    fn render_session(&mut self, address: DeviceAddress) {
        let (Some(session), Some(terminal)) = (self.sessions.get_mut(&address), self.terminals.get_mut(&address))
        else {
            return;
        };

        if let Err(error) = session.render(terminal) {
            tracing::warn!("Unable to render session: {}", error);
        }
    }

    fn start_session(&mut self, address: DeviceAddress) {
        let Some(terminal) = self.terminals.get_mut(&address) else {
            return;
        };

        let formatted_address = format_address(&self.interface, address);

        tracing::info!("Starting session for terminal @ {}", formatted_address);

        self.last_session_start_times.insert(address, self.clock.now());

        let mut session = (self.create_session)(terminal);

        if let Err(error) = session.start(terminal) {
            tracing::error!("Unable to start session for terminal @ {}: {}", formatted_address, error);

            session.terminate();

            return;
        }

        if let Some(fd) = session.fileno() {
            self.selector.register(fd);
            self.session_fds.insert(fd, address);
        }

        self.sessions.insert(address, session);
        self.started_sessions.insert(address);

        tracing::info!("Session started for terminal @ {}", formatted_address);
    }

    /// Start sessions for attached terminals whose session failed to start
    fn retry_sessions(&mut self) {
        let now = self.clock.now();

        let due: Vec<DeviceAddress> = self
            .terminals
            .keys()
            .filter(|address| !self.sessions.contains_key(*address))
            .filter(|address| {
                self.last_session_start_times.get(*address).map_or(true, |time| {
                    now.saturating_duration_since(*time) >= self.options.detached_poll_period
                })
            })
            .copied()
            .collect();

        for address in due {
            self.start_session(address);
        }
    }

    fn terminate_session(&mut self, address: DeviceAddress) {
        let Some(mut session) = self.sessions.remove(&address) else {
            return;
        };

        let formatted_address = format_address(&self.interface, address);

        tracing::info!("Terminating session for terminal @ {}", formatted_address);

        let selector = &mut self.selector;

        self.session_fds.retain(|fd, session_address| {
            if *session_address != address {
                return true;
            }

            selector.unregister(*fd);

            false
        });

        self.started_sessions.remove(&address);

        session.terminate();

        tracing::info!("Session terminated for terminal @ {}", formatted_address);
    }

    fn restart_session(&mut self, address: DeviceAddress) {
        self.terminate_session(address);
        self.start_session(address);
    }

    /// POLL every attached terminal, repeating while any of them has data
    fn poll_attached_terminals(&mut self) {
        if self.terminals.is_empty() {
            return;
        }

        self.last_attached_poll_time = Some(self.clock.now());
        self.last_poll_nonempty = false;

        for depth in 0..POLL_DEPTH {
            if self.terminals.is_empty() {
                break;
            }

            let actions: Vec<(DeviceAddress, PollAction)> = self
                .terminals
                .iter()
                .map(|(address, terminal)| (*address, terminal.get_poll_action()))
                .collect();

            let commands: Vec<(DeviceAddress, Command)> = actions
                .iter()
                .map(|(address, action)| (*address, Command::Poll(*action)))
                .collect();

            // Errors are handled per terminal below.
            let responses = self
                .interface
                .execute(&commands, false)
                .unwrap_or_else(|error| error.responses);

            let mut handleable = Vec::new();
            let mut lost = Vec::new();

            for ((address, action), response) in actions.into_iter().zip(responses) {
                match response {
                    Ok(response) => {
                        if let Some(terminal) = self.terminals.get_mut(&address) {
                            terminal.commit_poll_action(action);
                        }

                        let poll_response = response.poll_response();

                        if !poll_response.is_empty() {
                            handleable.push((address, poll_response));
                        }
                    },
                    Err(CoaxError::ReceiveTimeout) => lost.push(address),
                    Err(error) => {
                        tracing::warn!("POLL @ {} error: {}", format_address(&self.interface, address), error);
                    },
                }
            }

            let has_data = !handleable.is_empty();

            if has_data {
                let commands: Vec<(DeviceAddress, Command)> = handleable
                    .iter()
                    .map(|(address, _)| (*address, Command::PollAck))
                    .collect();

                if let Err(error) = self.interface.execute(&commands, true) {
                    tracing::warn!("POLL_ACK error: {}", error);
                }

                for (address, poll_response) in handleable {
                    self.handle_poll_response(address, poll_response);
                }
            }

            for address in lost {
                self.handle_terminal_lost(address);
            }

            if !has_data {
                break;
            }

            if depth + 1 == POLL_DEPTH {
                self.last_poll_nonempty = true;
            }
        }
    }

    /// POLL the next detached address, attaching whatever answers
    fn poll_next_detached_address(&mut self) {
        let now = self.clock.now();

        let due = self.last_detached_poll_time.map_or(true, |time| {
            now.saturating_duration_since(time) >= self.options.detached_poll_period
        });

        if !due {
            return;
        }

        self.last_detached_poll_time = Some(now);

        if self.detached_poll_queue.is_empty() {
            self.detached_poll_queue = self.detached_addresses().into();
        }

        let Some(address) = self.detached_poll_queue.pop_front() else {
            return;
        };

        if self.terminals.contains_key(&address) {
            return;
        }

        let poll_response = match self.interface.execute_one(address, Command::Poll(PollAction::None)) {
            Ok(response) => response.poll_response(),
            Err(CoaxError::ReceiveTimeout) => return,
            Err(error) => {
                tracing::warn!(
                    "POLL detached @ {} error: {}",
                    format_address(&self.interface, address),
                    error
                );

                return;
            },
        };

        if !poll_response.is_empty() {
            if let Err(error) = self.interface.execute_one(address, Command::PollAck) {
                tracing::warn!("POLL_ACK error: {}", error);
            }
        }

        // Any answer means something is there, TT/AR included.
        self.handle_terminal_found(address, poll_response);
    }

    fn handle_terminal_found(&mut self, address: DeviceAddress, poll_response: PollResponse) {
        let formatted_address = format_address(&self.interface, address);

        tracing::info!("Found terminal @ {}", formatted_address);

        let mut terminal = match create_terminal(&self.interface, address, poll_response, &self.options.terminal) {
            Ok(terminal) => terminal,
            Err(error @ (AttachError::UnsupportedDevice(_) | AttachError::UnsupportedTerminal(_))) => {
                tracing::error!("Unsupported terminal @ {}: {}", formatted_address, error);
                return;
            },
            Err(error) => {
                tracing::warn!("Unable to identify terminal @ {}: {}", formatted_address, error);
                return;
            },
        };

        if let Err(error) = terminal.setup() {
            tracing::warn!("Unable to set up terminal @ {}: {}", formatted_address, error);
            return;
        }

        let modifiers = terminal.keyboard.modifiers();

        if let Err(error) = terminal.display.status_line().write_keyboard_modifiers(modifiers) {
            tracing::warn!("Unable to write keyboard modifiers: {}", error);
        }

        self.terminals.insert(address, terminal);
        self.last_session_start_times.remove(&address);

        // POLL the new terminal straight away.
        self.last_attached_poll_time = None;

        tracing::info!("Attached terminal @ {}", formatted_address);

        self.start_session(address);
    }

    fn handle_terminal_lost(&mut self, address: DeviceAddress) {
        let formatted_address = format_address(&self.interface, address);

        tracing::info!("Lost terminal @ {}", formatted_address);

        self.terminate_session(address);

        self.terminals.remove(&address);
        self.last_session_start_times.remove(&address);

        // Search again, starting with the address just lost.
        self.detached_poll_queue.clear();
        self.last_detached_poll_time = None;

        tracing::info!("Detached terminal @ {}", formatted_address);
    }

    fn handle_poll_response(&mut self, address: DeviceAddress, poll_response: PollResponse) {
        if let PollResponse::Keystroke(scan_code) = poll_response {
            self.handle_keystroke(address, scan_code);
        }
    }

    fn handle_keystroke(&mut self, address: DeviceAddress, scan_code: u8) {
        let Some(terminal) = self.terminals.get_mut(&address) else {
            return;
        };

        let (key, modifiers, modifiers_changed) = terminal.keyboard.get_key(scan_code);

        tracing::debug!(
            "Keystroke detected @ {}: Scan Code = {}, Key = {:?}, Modifiers = {:?}",
            format_address(&self.interface, address),
            scan_code,
            key,
            modifiers
        );

        if modifiers_changed {
            if let Err(error) = terminal.display.status_line().write_keyboard_modifiers(modifiers) {
                tracing::warn!("Unable to write keyboard modifiers: {}", error);
            }
        }

        let Some(key) = key else {
            return;
        };

        match key {
            Key::CursorBlink => {
                if let Err(error) = terminal.toggle_cursor_blink() {
                    tracing::warn!("Unable to toggle cursor blink: {}", error);
                }
            },
            Key::AltCursor => {
                if let Err(error) = terminal.toggle_cursor_reverse() {
                    tracing::warn!("Unable to toggle cursor reverse: {}", error);
                }
            },
            Key::Clicker => terminal.keyboard.toggle_clicker(),
            _ => {
                let Some(session) = self.sessions.get_mut(&address) else {
                    return;
                };

                let result = session
                    .handle_key(terminal, key, modifiers, scan_code)
                    .and_then(|()| session.render(terminal));

                if let Err(error) = result {
                    tracing::warn!("Unable to handle {:?}: {}", key, error);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;

    use super::*;
    use crate::coax::{Control, Response, TerminalId};
    use crate::keyboard::KeyboardModifiers;
    use crate::mock::{mock_interface, mock_multiplexer_interface, MockState};
    use crate::session::{SessionError, SessionResult};

    const SESSION_FD: RawFd = 42;

    #[derive(Clone)]
    struct ManualClock {
        now: Rc<Cell<Instant>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Rc::new(Cell::new(Instant::now())),
            }
        }

        fn advance(&self, duration: Duration) {
            self.now.set(self.now.get() + duration);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.advance(duration);
        }
    }

    /// Reports scripted readiness, otherwise waits out the timeout
    struct FakeSelector {
        clock: ManualClock,
        registered: Rc<RefCell<Vec<RawFd>>>,
        ready: Rc<RefCell<VecDeque<Vec<RawFd>>>>,
    }

    impl Selector for FakeSelector {
        fn register(&mut self, fd: RawFd) {
            self.registered.borrow_mut().push(fd);
        }

        fn unregister(&mut self, fd: RawFd) {
            self.registered.borrow_mut().retain(|registered| *registered != fd);
        }

        fn clear(&mut self) {
            self.registered.borrow_mut().clear();
        }

        fn is_empty(&self) -> bool {
            self.registered.borrow().is_empty()
        }

        fn select(&mut self, timeout: Duration) -> io::Result<Vec<RawFd>> {
            match self.ready.borrow_mut().pop_front() {
                Some(ready) => {
                    self.clock.advance(Duration::from_millis(1).min(timeout));
                    Ok(ready)
                },
                None => {
                    self.clock.advance(timeout);
                    Ok(Vec::new())
                },
            }
        }
    }

    #[derive(Debug, Default)]
    struct SessionLog {
        created: usize,
        calls: Vec<String>,
        host_outcomes: VecDeque<HostIoOutcome>,
        fail_start: bool,
    }

    struct FakeSession {
        log: Rc<RefCell<SessionLog>>,
        fd: RawFd,
        started: bool,
    }

    impl Session for FakeSession {
        fn start(&mut self, _terminal: &mut Terminal) -> SessionResult<()> {
            let mut log = self.log.borrow_mut();

            log.calls.push("start".to_string());

            if log.fail_start {
                return Err(SessionError::Connect(io::Error::from(io::ErrorKind::ConnectionRefused)));
            }

            self.started = true;

            Ok(())
        }

        fn terminate(&mut self) {
            self.log.borrow_mut().calls.push("terminate".to_string());
            self.started = false;
        }

        fn fileno(&self) -> Option<RawFd> {
            self.started.then_some(self.fd)
        }

        fn handle_host(&mut self, _terminal: &mut Terminal) -> SessionResult<HostIoOutcome> {
            let mut log = self.log.borrow_mut();

            log.calls.push("handle_host".to_string());

            Ok(log.host_outcomes.pop_front().unwrap_or(HostIoOutcome::Idle))
        }

        fn handle_key(
            &mut self,
            _terminal: &mut Terminal,
            key: Key,
            _modifiers: KeyboardModifiers,
            _scan_code: u8,
        ) -> SessionResult<()> {
            self.log.borrow_mut().calls.push(format!("handle_key {:?}", key));
            Ok(())
        }

        fn render(&mut self, _terminal: &mut Terminal) -> SessionResult<()> {
            self.log.borrow_mut().calls.push("render".to_string());
            Ok(())
        }
    }

    /// What the scripted terminal answers to POLL
    #[derive(Debug, Clone)]
    struct TerminalScript {
        present: Rc<Cell<bool>>,
        terminal_id: Rc<Cell<u8>>,
        poll_responses: Rc<RefCell<VecDeque<PollResponse>>>,
        poll_error: Rc<RefCell<Option<CoaxError>>>,
        setup_error: Rc<Cell<bool>>,
    }

    struct Harness {
        controller: Controller,
        mock: MockState,
        clock: ManualClock,
        script: TerminalScript,
        log: Rc<RefCell<SessionLog>>,
        ready: Rc<RefCell<VecDeque<Vec<RawFd>>>>,
        registered: Rc<RefCell<Vec<RawFd>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_interface(mock_interface(false))
        }

        fn with_interface((interface, mock): (InterfaceWrapper, MockState)) -> Self {

            let script = TerminalScript {
                present: Rc::new(Cell::new(false)),
                terminal_id: Rc::new(Cell::new(0b1111_0100)),
                poll_responses: Rc::default(),
                poll_error: Rc::default(),
                setup_error: Rc::default(),
            };

            let responder_script = script.clone();

            mock.respond_with(move |_, command| {
                if !responder_script.present.get() {
                    return Err(CoaxError::ReceiveTimeout);
                }

                match command {
                    Command::Poll(_) => {
                        if let Some(error) = responder_script.poll_error.borrow_mut().take() {
                            return Err(error);
                        }

                        let response = responder_script
                            .poll_responses
                            .borrow_mut()
                            .pop_front()
                            .unwrap_or(PollResponse::Empty);

                        Ok(Response::Poll(response))
                    },
                    Command::ReadTerminalId => Ok(Response::TerminalId(TerminalId::try_from(
                        responder_script.terminal_id.get(),
                    )?)),
                    Command::LoadControlRegister(_) if responder_script.setup_error.replace(false) => {
                        Err(CoaxError::ProtocolError("garbled".to_string()))
                    },
                    _ => Ok(Response::Ack),
                }
            });

            let clock = ManualClock::new();
            let log = Rc::new(RefCell::new(SessionLog::default()));
            let ready = Rc::new(RefCell::new(VecDeque::new()));
            let registered = Rc::new(RefCell::new(Vec::new()));

            let factory_log = log.clone();

            let create_session: SessionFactory = Box::new(move |_terminal: &Terminal| {
                let mut log = factory_log.borrow_mut();

                log.created += 1;

                Box::new(FakeSession {
                    log: factory_log.clone(),
                    fd: SESSION_FD + log.created as RawFd - 1,
                    started: false,
                })
            });

            let selector = FakeSelector {
                clock: clock.clone(),
                registered: registered.clone(),
                ready: ready.clone(),
            };

            let options = ControllerOptions {
                attached_poll_period: Duration::from_millis(100),
                detached_poll_period: Duration::from_secs(5),
                terminal: TerminalOptions {
                    extended_id_retry_attempts: 1,
                    extended_id_retry_delay: Duration::ZERO,
                    feature_overrides: Vec::new(),
                },
            };

            let controller = Controller::new(interface, options, create_session)
                .with_selector(Box::new(selector))
                .with_clock(Box::new(clock.clone()));

            Self {
                controller,
                mock,
                clock,
                script,
                log,
                ready,
                registered,
            }
        }

        fn queue_poll(&self, response: PollResponse) {
            self.script.poll_responses.borrow_mut().push_back(response);
        }

        fn queue_keystroke(&self, scan_code: u8) {
            self.queue_poll(PollResponse::Keystroke(scan_code));
        }

        /// Run until the terminal is attached
        fn attach(&mut self) {
            self.script.present.set(true);
            self.queue_poll(PollResponse::PowerOnReset);

            self.controller.run_loop();

            assert!(self.controller.terminal(None).is_some());

            self.mock.reset();
            self.log.borrow_mut().calls.clear();
        }

        /// Run until the first POLL delay has been spent servicing the session
        fn settle(&mut self) {
            self.controller.run_loop();
            self.controller.run_loop();

            self.mock.reset();
            self.log.borrow_mut().calls.clear();
        }

        fn calls(&self) -> Vec<String> {
            self.log.borrow().calls.clone()
        }

        fn polls(&self) -> Vec<Command> {
            self.mock
                .commands()
                .into_iter()
                .filter(|command| matches!(command, Command::Poll(_) | Command::PollAck))
                .collect()
        }
    }


    /// Answers for terminals on the given multiplexer ports only
    fn respond_on_ports(mock: &MockState, ports: &[usize]) {
        let present: Vec<DeviceAddress> = ports.iter().map(|port| Some(PORT_MAP_3299[*port])).collect();
        let mut reset_sent = BTreeSet::new();

        mock.respond_with(move |address, command| {
            if !present.contains(&address) {
                return Err(CoaxError::ReceiveTimeout);
            }

            match command {
                Command::Poll(_) if reset_sent.insert(address) => Ok(Response::Poll(PollResponse::PowerOnReset)),
                Command::Poll(_) => Ok(Response::Poll(PollResponse::Empty)),
                Command::ReadTerminalId => Ok(Response::TerminalId(TerminalId::try_from(0b1111_0100)?)),
                _ => Ok(Response::Ack),
            }
        });
    }

    #[test]
    fn test_no_terminal() {
        let mut harness = Harness::new();

        harness.controller.run_loop();

        assert!(harness.controller.attached_addresses().is_empty());
        assert_eq!(harness.mock.commands(), vec![Command::Poll(PollAction::None)]);
        assert_eq!(harness.log.borrow().created, 0);
    }

    #[test]
    fn test_attach() {
        let mut harness = Harness::new();

        harness.script.present.set(true);
        harness.queue_poll(PollResponse::PowerOnReset);

        harness.controller.run_loop();

        let commands = harness.mock.commands();

        assert_eq!(commands[..3], [Command::Poll(PollAction::None), Command::PollAck, Command::ReadTerminalId]);
        assert!(commands.contains(&Command::LoadControlRegister(Control::empty())));

        let terminal = harness.controller.terminal(None).unwrap();

        assert_eq!(terminal.terminal_id.model, 2);

        assert!(harness.controller.has_session(None));
        assert_eq!(harness.calls(), vec!["start"]);
        assert_eq!(*harness.registered.borrow(), vec![SESSION_FD]);
    }

    #[test]
    fn test_attach_on_empty_poll_response() {
        let mut harness = Harness::new();

        // A terminal that was already powered on answers TT/AR.
        harness.script.present.set(true);

        harness.controller.run_loop();

        assert_eq!(harness.mock.commands()[..2], [Command::Poll(PollAction::None), Command::ReadTerminalId]);
        assert!(harness.controller.terminal(None).is_some());
        assert!(harness.controller.has_session(None));
    }

    #[test]
    fn test_attach_unsupported_terminal() {
        let mut harness = Harness::new();

        harness.script.present.set(true);
        // DFT
        harness.script.terminal_id.set(0b0000_0001);
        harness.queue_poll(PollResponse::PowerOnReset);

        harness.controller.run_loop();

        assert!(harness.controller.terminal(None).is_none());
        assert_eq!(harness.log.borrow().created, 0);
    }

    #[test]
    fn test_attach_retried_after_setup_error() {
        let mut harness = Harness::new();

        harness.script.present.set(true);
        harness.script.setup_error.set(true);
        harness.queue_poll(PollResponse::PowerOnReset);

        harness.controller.run_loop();

        assert!(harness.controller.terminal(None).is_none());
        assert_eq!(harness.log.borrow().created, 0);

        harness.mock.reset();

        let before = harness.clock.now();

        for _ in 0..50 {
            if harness.controller.terminal(None).is_some() {
                break;
            }

            harness.controller.run_loop();
        }

        assert!(harness.controller.terminal(None).is_some());
        assert!(harness.controller.has_session(None));

        // The retry waits out the detached poll period and the terminal now
        // answers TT/AR.
        assert_eq!(harness.clock.now() - before, Duration::from_secs(5));
        assert_eq!(harness.mock.commands()[..2], [Command::Poll(PollAction::None), Command::ReadTerminalId]);
    }

    #[test]
    fn test_poll_error_keeps_state() {
        let mut harness = Harness::new();

        harness.attach();

        *harness.script.poll_error.borrow_mut() = Some(CoaxError::ProtocolError("garbled".to_string()));

        harness.controller.run_loop();

        assert!(harness.controller.terminal(None).is_some());
        assert!(harness.controller.has_session(None));
        assert!(!harness.calls().contains(&"terminate".to_string()));
    }

    #[test]
    fn test_detach() {
        let mut harness = Harness::new();

        harness.attach();

        harness.script.present.set(false);

        harness.controller.run_loop();

        assert!(harness.controller.terminal(None).is_none());
        assert!(!harness.controller.has_session(None));
        assert!(harness.registered.borrow().is_empty());
        assert_eq!(harness.calls(), vec!["terminate"]);

        // The lost address is searched again straight away
        assert_eq!(
            harness.mock.commands(),
            vec![
                Command::Poll(PollAction::DisableKeyboardClicker),
                Command::Poll(PollAction::None)
            ]
        );
    }

    #[test]
    fn test_poll_delay() {
        let mut harness = Harness::new();

        assert_eq!(harness.controller.calculate_poll_delay(), Duration::ZERO);

        harness.controller.run_loop();

        assert_eq!(harness.controller.calculate_poll_delay(), Duration::from_secs(5));

        harness.clock.advance(Duration::from_secs(2));

        assert_eq!(harness.controller.calculate_poll_delay(), Duration::from_secs(3));

        harness.clock.advance(Duration::from_secs(10));

        assert_eq!(harness.controller.calculate_poll_delay(), Duration::ZERO);
    }

    #[test]
    fn test_poll_delay_attached() {
        let mut harness = Harness::new();

        harness.attach();

        // A new terminal is polled straight away
        assert_eq!(harness.controller.calculate_poll_delay(), Duration::ZERO);

        harness.controller.run_loop();

        assert_eq!(harness.controller.calculate_poll_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_poll_depth() {
        let mut harness = Harness::new();

        harness.attach();

        for scan_code in [96, 96, 96, 96] {
            harness.queue_keystroke(scan_code);
        }

        harness.controller.run_loop();

        let polls = harness
            .mock
            .commands()
            .into_iter()
            .filter(|command| matches!(command, Command::Poll(_)))
            .count();

        assert_eq!(polls, POLL_DEPTH);
        assert_eq!(harness.calls().iter().filter(|call| *call == "handle_key LowerA").count(), 3);

        // The fourth keystroke is still waiting.
        assert_eq!(harness.controller.calculate_poll_delay(), Duration::ZERO);
    }

    #[test]
    fn test_detached_poll_sleeps() {
        let mut harness = Harness::new();

        harness.controller.run_loop();

        let before = harness.clock.now();

        harness.controller.run_loop();

        assert_eq!(harness.clock.now() - before, Duration::from_secs(5));
    }

    #[test]
    fn test_detached_addresses() {
        let harness = Harness::new();

        assert_eq!(harness.controller.detached_addresses(), vec![None]);

        let harness = Harness::with_interface(mock_multiplexer_interface());

        let mut expected = vec![None];

        expected.extend(PORT_MAP_3299.iter().map(|port| Some(*port)));

        assert_eq!(harness.controller.detached_addresses(), expected);
    }

    #[test]
    fn test_direct_terminal_stops_port_search() {
        let mut harness = Harness::with_interface(mock_multiplexer_interface());

        harness.attach();

        assert!(harness.controller.detached_addresses().is_empty());
    }

    #[test]
    fn test_multiplexer_terminals_attach() {
        let mut harness = Harness::with_interface(mock_multiplexer_interface());

        respond_on_ports(&harness.mock, &[1, 3]);

        let port_1 = Some(PORT_MAP_3299[1]);
        let port_3 = Some(PORT_MAP_3299[3]);

        for _ in 0..500 {
            if harness.controller.attached_addresses().len() == 2 {
                break;
            }

            harness.controller.run_loop();
        }

        assert_eq!(harness.controller.attached_addresses(), vec![port_1, port_3]);
        assert!(harness.controller.has_session(port_1));
        assert!(harness.controller.has_session(port_3));
        assert_eq!(harness.log.borrow().created, 2);
        assert_eq!(harness.registered.borrow().len(), 2);

        // Once a port answers only ports are searched.
        assert!(!harness.controller.detached_addresses().contains(&None));
        assert_eq!(harness.controller.detached_addresses().len(), 6);

        harness.mock.reset();
        harness.clock.advance(Duration::from_millis(100));
        harness.controller.run_loop();

        let polls: Vec<(DeviceAddress, Command)> = harness
            .mock
            .addressed_commands()
            .into_iter()
            .take(2)
            .collect();

        // Port 3 has not been POLLed since it attached.
        assert_eq!(
            polls,
            vec![
                (port_1, Command::Poll(PollAction::None)),
                (port_3, Command::Poll(PollAction::DisableKeyboardClicker)),
            ]
        );
    }

    #[test]
    fn test_multiplexer_terminal_lost() {
        let mut harness = Harness::with_interface(mock_multiplexer_interface());

        respond_on_ports(&harness.mock, &[1, 3]);

        for _ in 0..500 {
            if harness.controller.attached_addresses().len() == 2 {
                break;
            }

            harness.controller.run_loop();
        }

        respond_on_ports(&harness.mock, &[3]);

        harness.log.borrow_mut().calls.clear();
        harness.clock.advance(Duration::from_millis(100));
        harness.controller.run_loop();

        assert_eq!(harness.controller.attached_addresses(), vec![Some(PORT_MAP_3299[3])]);
        assert_eq!(harness.calls(), vec!["terminate"]);
    }

    #[test]
    fn test_keystroke_forwarded_to_session() {
        let mut harness = Harness::new();

        harness.attach();

        // 'a' on the 3278 typewriter keyboard
        harness.queue_keystroke(96);

        harness.controller.run_loop();

        // The first POLL after attaching also sets the clicker
        assert_eq!(
            harness.polls(),
            vec![
                Command::Poll(PollAction::DisableKeyboardClicker),
                Command::PollAck,
                Command::Poll(PollAction::None)
            ]
        );
        assert_eq!(harness.calls(), vec!["handle_key LowerA", "render"]);
    }

    #[test]
    fn test_cursor_blink_key() {
        let mut harness = Harness::new();

        harness.attach();

        harness.queue_keystroke(84);

        harness.controller.run_loop();

        assert!(harness
            .mock
            .commands()
            .contains(&Command::LoadControlRegister(Control::CURSOR_BLINK)));

        assert_eq!(
            harness.controller.terminal(None).unwrap().control(),
            Control::CURSOR_BLINK
        );

        harness.mock.reset();
        harness.queue_keystroke(84);

        harness.controller.run_loop();

        assert!(harness
            .mock
            .commands()
            .contains(&Command::LoadControlRegister(Control::empty())));

        assert_eq!(harness.controller.terminal(None).unwrap().control(), Control::empty());

        assert!(!harness.calls().iter().any(|call| call.starts_with("handle_key")));
    }

    #[test]
    fn test_clicker_key() {
        let mut harness = Harness::new();

        harness.attach();

        let clicker = harness.controller.terminal(None).unwrap().keyboard.clicker();

        harness.queue_keystroke(87);

        harness.controller.run_loop();

        assert_eq!(harness.controller.terminal(None).unwrap().keyboard.clicker(), !clicker);

        let expected = if clicker {
            PollAction::DisableKeyboardClicker
        } else {
            PollAction::EnableKeyboardClicker
        };

        // The next POLL round carries the new clicker state
        assert_eq!(harness.polls()[2], Command::Poll(expected));
    }

    #[test]
    fn test_alarm_sent_with_poll() {
        let mut harness = Harness::new();

        harness.attach();
        harness.settle();

        harness.controller.terminals.get_mut(&None).unwrap().sound_alarm();

        harness.controller.run_loop();

        assert_eq!(harness.polls()[0], Command::Poll(PollAction::Alarm));

        harness.mock.reset();

        harness.controller.run_loop();

        assert_eq!(harness.polls()[0], Command::Poll(PollAction::None));
    }

    #[test]
    fn test_host_output_rendered() {
        let mut harness = Harness::new();

        harness.attach();
        harness.settle();

        harness.log.borrow_mut().host_outcomes.push_back(HostIoOutcome::Progressed);
        harness.ready.borrow_mut().push_back(vec![SESSION_FD]);

        harness.controller.run_loop();

        assert_eq!(harness.calls(), vec!["handle_host", "render"]);
    }

    #[test]
    fn test_session_started_drains_host_output() {
        let mut harness = Harness::new();

        harness.attach();

        harness.log.borrow_mut().host_outcomes.push_back(HostIoOutcome::Progressed);

        // Nothing is ready, the first servicing pass still reads the host.
        harness.controller.run_loop();
        harness.controller.run_loop();

        assert_eq!(harness.calls(), vec!["handle_host", "render"]);
    }

    #[test]
    fn test_session_disconnected_restarts() {
        let mut harness = Harness::new();

        harness.attach();
        harness.settle();

        harness.log.borrow_mut().host_outcomes.push_back(HostIoOutcome::Disconnected);
        harness.ready.borrow_mut().push_back(vec![SESSION_FD]);

        harness.controller.run_loop();

        assert_eq!(harness.calls(), vec!["handle_host", "terminate", "start"]);
        assert_eq!(harness.log.borrow().created, 2);
        assert!(harness.controller.has_session(None));
        assert_eq!(*harness.registered.borrow(), vec![SESSION_FD + 1]);
    }

    #[test]
    fn test_failed_session_start_retried() {
        let mut harness = Harness::new();

        harness.log.borrow_mut().fail_start = true;

        harness.attach();

        assert!(!harness.controller.has_session(None));

        harness.log.borrow_mut().fail_start = false;

        harness.controller.run_loop();

        assert!(!harness.controller.has_session(None));

        harness.clock.advance(Duration::from_secs(5));

        harness.controller.run_loop();

        assert!(harness.controller.has_session(None));
        assert_eq!(harness.log.borrow().created, 2);
    }

    #[test]
    fn test_run_stops_and_shuts_down() {
        let mut harness = Harness::new();

        harness.attach();

        harness.controller.stop();
        harness.controller.run();

        assert!(harness.controller.attached_addresses().is_empty());
        assert!(!harness.controller.has_session(None));
        assert!(harness.registered.borrow().is_empty());
        assert_eq!(harness.calls(), vec!["terminate"]);
    }
}
