//! VT100 session
//!
//! Runs a local host process on a pseudoterminal and presents its output
//! through the built-in VT100 screen.

use std::os::unix::io::RawFd;
use std::rc::Rc;

use crate::display::encoding::encode_ascii_character;
use crate::display::{Dimensions, Position};
use crate::keyboard::{get_ascii_character_for_key, Key, KeyboardModifiers};
use crate::pty::{Pty, PtyError, PtyResult};
use crate::terminal::Terminal;
use crate::vt100::Vt100;

use super::{HostIoOutcome, Session, SessionError, SessionResult};

const STATUS_COLUMN: usize = 45;

const READ_BUFFER_SIZE: usize = 4096;

/// Environment the host process runs with
const HOST_ENVIRONMENT: &[(&str, &str)] = &[("TERM", "vt100"), ("LC_ALL", "C")];

/// The host side of a VT100 session
pub trait HostProcess {
    fn fileno(&self) -> RawFd;

    /// Non-blocking read; 0 means no data, [`PtyError::Closed`] means the
    /// process has gone away
    fn read(&mut self, buf: &mut [u8]) -> PtyResult<usize>;

    fn write_all(&mut self, data: &[u8]) -> PtyResult<()>;

    /// Returns whether the process was stopped
    fn terminate(&mut self) -> bool;
}

impl HostProcess for Pty {
    fn fileno(&self) -> RawFd {
        self.master_fd()
    }

    fn read(&mut self, buf: &mut [u8]) -> PtyResult<usize> {
        Pty::read(self, buf)
    }

    fn write_all(&mut self, data: &[u8]) -> PtyResult<()> {
        Pty::write_all(self, data)
    }

    fn terminate(&mut self) -> bool {
        Pty::terminate(self)
    }
}

/// Starts host processes
pub trait HostSpawner {
    /// Start `command` on a PTY sized to `dimensions`
    fn spawn(&self, command: &HostCommand, dimensions: Dimensions) -> PtyResult<Box<dyn HostProcess>>;
}

/// Spawns host processes on a [`Pty`]
#[derive(Debug, Default)]
pub struct PtySpawner;

impl HostSpawner for PtySpawner {
    fn spawn(&self, command: &HostCommand, dimensions: Dimensions) -> PtyResult<Box<dyn HostProcess>> {
        let pty = Pty::spawn(&command.program, &command.args, HOST_ENVIRONMENT, dimensions)?;

        Ok(Box::new(pty))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

pub struct Vt100Session {
    spawner: Rc<dyn HostSpawner>,
    command: HostCommand,
    host_process: Option<Box<dyn HostProcess>>,
    vt100: Option<Vt100>,
}

impl Vt100Session {
    pub fn new(spawner: Rc<dyn HostSpawner>, command: HostCommand) -> Self {
        Self {
            spawner,
            command,
            host_process: None,
            vt100: None,
        }
    }

    pub fn vt100(&self) -> Option<&Vt100> {
        self.vt100.as_ref()
    }

    fn write_host(&mut self, data: &[u8]) -> SessionResult<()> {
        let host_process = self.host_process.as_mut().ok_or(SessionError::NotStarted)?;

        host_process.write_all(data)?;

        Ok(())
    }

    fn handle_host_output(&mut self, data: &[u8], terminal: &mut Terminal) -> SessionResult<()> {
        tracing::debug!("Host process output: {:?}", String::from_utf8_lossy(data));

        let vt100 = self.vt100.as_mut().ok_or(SessionError::NotStarted)?;

        vt100.feed(data);

        if vt100.take_bell() {
            terminal.sound_alarm();
        }

        let replies = vt100.take_replies();

        if !replies.is_empty() {
            self.write_host(&replies)?;
        }

        Ok(())
    }

    fn terminate_host_process(&mut self) {
        if let Some(mut host_process) = self.host_process.take() {
            tracing::debug!("Terminating host process");

            if host_process.terminate() {
                tracing::debug!("Host process terminated");
            } else {
                tracing::error!("Unable to terminate host process");
            }
        }
    }
}

impl Session for Vt100Session {
    fn start(&mut self, terminal: &mut Terminal) -> SessionResult<()> {
        let dimensions = terminal.display.dimensions();

        self.host_process = Some(self.spawner.spawn(&self.command, dimensions)?);
        self.vt100 = Some(Vt100::new(dimensions.rows, dimensions.columns));

        terminal.display.clear(false)?;

        terminal
            .display
            .status_line()
            .write_string(STATUS_COLUMN, "VT100")?;

        terminal.display.move_cursor(Position::RowColumn(0, 0), false)?;

        Ok(())
    }

    fn terminate(&mut self) {
        self.terminate_host_process();
    }

    fn fileno(&self) -> Option<RawFd> {
        self.host_process.as_ref().map(|host_process| host_process.fileno())
    }

    fn handle_host(&mut self, terminal: &mut Terminal) -> SessionResult<HostIoOutcome> {
        let host_process = self.host_process.as_mut().ok_or(SessionError::NotStarted)?;

        let mut buf = [0u8; READ_BUFFER_SIZE];

        let n = match host_process.read(&mut buf) {
            Ok(n) => n,
            Err(PtyError::Closed) => {
                tracing::info!("Host process closed");

                self.terminate_host_process();

                return Ok(HostIoOutcome::Disconnected);
            },
            Err(error) => return Err(error.into()),
        };

        if n == 0 {
            return Ok(HostIoOutcome::Idle);
        }

        self.handle_host_output(&buf[..n], terminal)?;

        Ok(HostIoOutcome::Progressed)
    }

    fn handle_key(
        &mut self,
        _terminal: &mut Terminal,
        key: Key,
        modifiers: KeyboardModifiers,
        _scan_code: u8,
    ) -> SessionResult<()> {
        match map_key(key, modifiers) {
            Some(bytes) => self.write_host(&bytes),
            None => Ok(()),
        }
    }

    fn render(&mut self, terminal: &mut Terminal) -> SessionResult<()> {
        let vt100 = self.vt100.as_mut().ok_or(SessionError::NotStarted)?;

        let dimensions = terminal.display.dimensions();
        let eab_byte = terminal.display.has_eab().then_some(0x00);

        for row in vt100.take_dirty() {
            let Some(characters) = vt100.screen().row(row) else {
                continue;
            };

            for (column, character) in characters.iter().take(dimensions.columns).enumerate() {
                terminal.display.buffered_write_byte(
                    encode_ascii_character(*character),
                    eab_byte,
                    Position::RowColumn(row, column),
                )?;
            }
        }

        terminal.display.flush()?;

        let cursor = vt100.cursor();

        terminal
            .display
            .move_cursor(Position::RowColumn(cursor.row, cursor.col), false)?;

        Ok(())
    }
}

/// Bytes sent to the host for a key, if any
pub fn map_key(key: Key, modifiers: KeyboardModifiers) -> Option<Vec<u8>> {
    if modifiers.is_alt() {
        // Modifier keys are expected while ALT is held.
        if matches!(
            key,
            Key::LeftAlt | Key::RightAlt | Key::LeftShift | Key::RightShift | Key::CapsLock
        ) {
            return None;
        }

        let bytes = map_alt_key(key);

        if bytes.is_none() {
            tracing::warn!("No key mapping found for ALT + {:?}", key);
        }

        return bytes.map(|byte| vec![byte]);
    }

    let bytes: &[u8] = match key {
        Key::Not => b"^",
        Key::Cent => b"[",
        Key::BrokenBar => b"]",
        Key::Attn => b"\x1b",
        Key::Newline | Key::Enter | Key::FieldExit => b"\r",
        Key::Backspace => b"\x08",
        Key::Tab => b"\t",
        Key::Up => b"\x1b[A",
        Key::Down => b"\x1b[B",
        Key::Left => b"\x1b[D",
        Key::Right => b"\x1b[C",
        _ => {
            let character = get_ascii_character_for_key(key)?;

            if character.is_ascii_graphic() || character == ' ' {
                let mut buf = [0u8; 4];

                return Some(character.encode_utf8(&mut buf).as_bytes().to_vec());
            }

            return None;
        },
    };

    Some(bytes.to_vec())
}

/// Control characters for ALT chords
fn map_alt_key(key: Key) -> Option<u8> {
    let byte = match key {
        Key::Space => 0x00,
        Key::LowerA => 0x01,
        Key::LowerB => 0x02,
        Key::LowerC => 0x03,
        Key::LowerD => 0x04,
        Key::LowerE => 0x05,
        Key::LowerF => 0x06,
        Key::LowerG => 0x07,
        Key::LowerH => 0x08,
        Key::LowerI => 0x09,
        Key::LowerJ => 0x0a,
        Key::LowerK => 0x0b,
        Key::LowerL => 0x0c,
        Key::LowerM => 0x0d,
        Key::LowerN => 0x0e,
        Key::LowerO => 0x0f,
        Key::LowerP => 0x10,
        Key::LowerQ => 0x11,
        Key::LowerR => 0x12,
        Key::LowerS => 0x13,
        Key::LowerT => 0x14,
        Key::LowerU => 0x15,
        Key::LowerV => 0x16,
        Key::LowerW => 0x17,
        Key::LowerX => 0x18,
        Key::LowerY => 0x19,
        Key::LowerZ => 0x1a,
        // Ctrl + [
        Key::Cent => 0x1b,
        Key::Backslash => 0x1c,
        // Ctrl + ]
        Key::Equal => 0x1d,
        // Ctrl + ~
        Key::Less => 0x1e,
        // Ctrl + ?
        Key::Slash => 0x1f,
        Key::Newline => 0x0a,
        _ => return None,
    };

    Some(byte)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::coax::{Command, Feature, Features, PollAction, TerminalId};
    use crate::device::Device;
    use crate::keyboard::keymap_3278_typewriter;
    use crate::mock::{mock_interface, MockState};

    #[derive(Debug, Default)]
    struct HostState {
        output: VecDeque<PtyResult<Vec<u8>>>,
        written: Vec<u8>,
        terminated: bool,
        dimensions: Option<Dimensions>,
    }

    type SharedState = Rc<RefCell<HostState>>;

    struct FakeHost {
        state: SharedState,
    }

    impl HostProcess for FakeHost {
        fn fileno(&self) -> RawFd {
            9
        }

        fn read(&mut self, buf: &mut [u8]) -> PtyResult<usize> {
            match self.state.borrow_mut().output.pop_front() {
                None => Ok(0),
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                },
                Some(Err(error)) => Err(error),
            }
        }

        fn write_all(&mut self, data: &[u8]) -> PtyResult<()> {
            self.state.borrow_mut().written.extend_from_slice(data);
            Ok(())
        }

        fn terminate(&mut self) -> bool {
            self.state.borrow_mut().terminated = true;
            true
        }
    }

    struct FakeSpawner {
        state: SharedState,
    }

    impl HostSpawner for FakeSpawner {
        fn spawn(&self, _command: &HostCommand, dimensions: Dimensions) -> PtyResult<Box<dyn HostProcess>> {
            self.state.borrow_mut().dimensions = Some(dimensions);

            Ok(Box::new(FakeHost {
                state: self.state.clone(),
            }))
        }
    }

    fn setup(features: Features) -> (Vt100Session, Terminal, SharedState, MockState) {
        let (interface, mock) = mock_interface(false);

        let mut terminal = Terminal::new(
            Device::new(interface, None),
            TerminalId::try_from(0b1111_0100).unwrap(),
            None,
            features,
            keymap_3278_typewriter(),
        )
        .unwrap();

        terminal.setup().unwrap();

        let state = SharedState::default();

        let spawner = Rc::new(FakeSpawner {
            state: state.clone(),
        });

        let mut session = Vt100Session::new(spawner, HostCommand::new("/bin/sh", Vec::new()));

        session.start(&mut terminal).unwrap();

        mock.reset();

        (session, terminal, state, mock)
    }

    fn host_output(state: &SharedState, data: &[u8]) {
        state.borrow_mut().output.push_back(Ok(data.to_vec()));
    }

    fn written_data(mock: &MockState) -> Vec<u8> {
        mock.commands()
            .into_iter()
            .filter_map(|command| match command {
                Command::WriteData(payload) | Command::Data(payload) => Some(payload.expand()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_start() {
        let (session, _, state, _) = setup(Features::new());

        assert_eq!(state.borrow().dimensions, Some(Dimensions::new(24, 80)));
        assert_eq!(session.fileno(), Some(9));
    }

    #[test]
    fn test_handle_host() {
        let (mut session, mut terminal, state, _) = setup(Features::new());

        host_output(&state, b"abc");

        assert_eq!(
            session.handle_host(&mut terminal).unwrap(),
            HostIoOutcome::Progressed
        );

        assert_eq!(session.vt100().unwrap().screen().row(0).unwrap()[..3], ['a', 'b', 'c']);
    }

    #[test]
    fn test_handle_host_idle() {
        let (mut session, mut terminal, _, _) = setup(Features::new());

        assert_eq!(session.handle_host(&mut terminal).unwrap(), HostIoOutcome::Idle);
    }

    #[test]
    fn test_handle_host_eof() {
        let (mut session, mut terminal, state, _) = setup(Features::new());

        state.borrow_mut().output.push_back(Err(PtyError::Closed));

        assert_eq!(
            session.handle_host(&mut terminal).unwrap(),
            HostIoOutcome::Disconnected
        );

        assert!(state.borrow().terminated);
        assert_eq!(session.fileno(), None);
    }

    #[test]
    fn test_handle_host_bell() {
        let (mut session, mut terminal, state, _) = setup(Features::new());

        host_output(&state, b"\x07");

        session.handle_host(&mut terminal).unwrap();

        assert_eq!(terminal.get_poll_action(), PollAction::Alarm);
    }

    #[test]
    fn test_handle_host_status_report() {
        let (mut session, mut terminal, state, _) = setup(Features::new());

        host_output(&state, b"ab\x1b[6n");

        session.handle_host(&mut terminal).unwrap();

        assert_eq!(state.borrow().written, b"\x1b[1;3R".to_vec());
    }

    #[test]
    fn test_handle_key_printable() {
        let (mut session, mut terminal, state, _) = setup(Features::new());

        session
            .handle_key(&mut terminal, Key::LowerA, KeyboardModifiers::empty(), 0)
            .unwrap();

        assert_eq!(state.borrow().written, b"a".to_vec());
    }

    #[test]
    fn test_handle_key_mapped() {
        let (mut session, mut terminal, state, _) = setup(Features::new());

        session
            .handle_key(&mut terminal, Key::Enter, KeyboardModifiers::empty(), 0)
            .unwrap();

        assert_eq!(state.borrow().written, b"\r".to_vec());
    }

    #[test]
    fn test_handle_key_alt() {
        let (mut session, mut terminal, state, _) = setup(Features::new());

        session
            .handle_key(&mut terminal, Key::LowerC, KeyboardModifiers::LEFT_ALT, 0)
            .unwrap();

        assert_eq!(state.borrow().written, b"\x03".to_vec());
    }

    #[test]
    fn test_handle_key_unmapped_alt() {
        let (mut session, mut terminal, state, _) = setup(Features::new());

        session
            .handle_key(&mut terminal, Key::Three, KeyboardModifiers::LEFT_ALT, 0)
            .unwrap();

        session
            .handle_key(&mut terminal, Key::LeftAlt, KeyboardModifiers::LEFT_ALT, 0)
            .unwrap();

        assert!(state.borrow().written.is_empty());
    }

    #[test]
    fn test_map_key() {
        let none = KeyboardModifiers::empty();

        assert_eq!(map_key(Key::Up, none), Some(b"\x1b[A".to_vec()));
        assert_eq!(map_key(Key::Not, none), Some(b"^".to_vec()));
        assert_eq!(map_key(Key::UpperQ, none), Some(b"Q".to_vec()));
        assert_eq!(map_key(Key::Space, none), Some(b" ".to_vec()));
        assert_eq!(map_key(Key::Pf1, none), None);
        assert_eq!(map_key(Key::Newline, KeyboardModifiers::RIGHT_ALT), Some(b"\n".to_vec()));
        assert_eq!(map_key(Key::Space, KeyboardModifiers::LEFT_ALT), Some(vec![0x00]));
    }

    #[test]
    fn test_render() {
        let (mut session, mut terminal, state, mock) = setup(Features::new());

        host_output(&state, b"abc");

        session.handle_host(&mut terminal).unwrap();
        session.render(&mut terminal).unwrap();

        assert_eq!(&terminal.display.regen_buffer()[80..83], &[0x80, 0x81, 0x82]);
        assert_eq!(terminal.display.dirty().count(), 0);
        assert_eq!(terminal.display.address_counter(), Some(83));

        let data = written_data(&mock);

        assert_eq!(&data[..3], &[0x80, 0x81, 0x82]);
    }

    #[test]
    fn test_render_eab() {
        let (mut session, mut terminal, state, _) = setup(Features::from([(Feature::Eab, 7)]));

        host_output(&state, b"abc");

        session.handle_host(&mut terminal).unwrap();
        session.render(&mut terminal).unwrap();

        let eab = terminal.display.eab_buffer().unwrap();

        assert!(eab[80..83].iter().all(|byte| *byte == 0x00));
    }

    #[test]
    fn test_render_pending_wrap_cursor() {
        let (mut session, mut terminal, state, _) = setup(Features::new());

        host_output(&state, &[b'x'; 80]);

        session.handle_host(&mut terminal).unwrap();
        session.render(&mut terminal).unwrap();

        assert_eq!(terminal.display.address_counter(), Some(80 + 79));
    }

    #[test]
    fn test_terminate() {
        let (mut session, _, state, _) = setup(Features::new());

        session.terminate();
        session.terminate();

        assert!(state.borrow().terminated);
        assert_eq!(session.fileno(), None);
    }

    #[test]
    fn test_render_blank_screen() {
        let (mut session, mut terminal, _, mock) = setup(Features::new());

        session.render(&mut terminal).unwrap();

        // Blank rows match the cleared display.
        assert!(written_data(&mock).is_empty());
    }
}
