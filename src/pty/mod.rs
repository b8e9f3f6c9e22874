//! Host processes on a pseudoterminal
//!
//! A VT100 session runs its host process on the slave side of a PTY sized
//! to the terminal display, and talks to it through the non-blocking master.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::Pty;

/// Failures over the life of a host process
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    /// Allocating or sizing the pseudoterminal failed
    #[error("Unable to open pseudoterminal: {0}")]
    Open(#[source] nix::Error),

    #[error("Unable to start host process: {0}")]
    Start(#[source] nix::Error),

    #[error("Invalid host command: {0}")]
    InvalidCommand(String),

    #[error("Unable to read from host process: {0}")]
    Read(#[source] nix::Error),

    #[error("Unable to write to host process: {0}")]
    Write(#[source] nix::Error),

    /// The host process closed its side of the PTY
    #[error("Host process closed")]
    Closed,

    #[error("Unable to reap host process: {0}")]
    Terminate(#[source] nix::Error),
}

pub type PtyResult<T> = Result<T, PtyError>;
