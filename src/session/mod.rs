//! Host sessions
//!
//! A session connects an attached terminal to a host: either a TN3270 host
//! reached over the network, or a local process driven through a VT100
//! screen. The controller owns exactly one session per attached terminal
//! and drives it through the [`Session`] trait.

pub mod tn3270;
pub mod vt100;

use std::io;
use std::os::unix::io::RawFd;

use crate::display::DisplayError;
use crate::keyboard::{Key, KeyboardModifiers};
use crate::pty::PtyError;
use crate::terminal::Terminal;

pub use self::tn3270::Tn3270Session;
pub use self::vt100::Vt100Session;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Unable to connect to host: {0}")]
    Connect(#[source] io::Error),

    #[error("Session is not started")]
    NotStarted,

    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error(transparent)]
    Display(#[from] DisplayError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Result of servicing host I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostIoOutcome {
    /// Host output was processed and the screen needs rendering
    Progressed,
    /// Nothing to do
    Idle,
    /// The host went away; the session must be replaced
    Disconnected,
}

pub trait Session {
    /// Open the host connection and paint the initial screen
    fn start(&mut self, terminal: &mut Terminal) -> SessionResult<()>;

    /// Close the host connection; safe to call more than once
    fn terminate(&mut self);

    /// Descriptor to wait on for host output, once started
    fn fileno(&self) -> Option<RawFd>;

    fn handle_host(&mut self, terminal: &mut Terminal) -> SessionResult<HostIoOutcome>;

    fn handle_key(
        &mut self,
        terminal: &mut Terminal,
        key: Key,
        modifiers: KeyboardModifiers,
        scan_code: u8,
    ) -> SessionResult<()>;

    /// Push pending screen changes to the terminal
    fn render(&mut self, terminal: &mut Terminal) -> SessionResult<()>;
}
