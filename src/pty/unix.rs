//! PTY allocation and host process management on Unix

use std::ffi::CString;
use std::os::unix::io::{AsRawFd, RawFd};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, open, FcntlArg, OFlag};
use nix::libc::{self, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::pty::{grantpt, posix_openpt, ptsname, unlockpt, PtyMaster};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, dup2, execvp, fork, read, setsid, write, ForkResult, Pid};

use super::{PtyError, PtyResult};
use crate::display::Dimensions;

/// Time allowed for the child to exit after SIGHUP before it is killed
const HANGUP_GRACE: Duration = Duration::from_millis(100);
const HANGUP_CHECKS: u32 = 10;

/// A pseudoterminal with a spawned child process
pub struct Pty {
    master: PtyMaster,
    child_pid: Pid,
    child_alive: bool,
}

impl Pty {
    /// Spawn `command` on a new PTY sized to `dimensions`
    ///
    /// `env` entries are added to the inherited environment of the child.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &[(&str, &str)],
        dimensions: Dimensions,
    ) -> PtyResult<Self> {
        // Everything the child needs is prepared before forking.
        let program = to_cstring(command)?;

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(program.clone());
        for arg in args {
            argv.push(to_cstring(arg)?);
        }

        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(PtyError::Open)?;

        grantpt(&master).map_err(PtyError::Open)?;
        unlockpt(&master).map_err(PtyError::Open)?;

        // SAFETY: ptsname is not thread-safe; the controller is single threaded
        let slave_name = unsafe { ptsname(&master) }.map_err(PtyError::Open)?;

        set_window_size(master.as_raw_fd(), dimensions)?;

        // SAFETY: the child only calls async-signal-safe functions (and
        // setenv, which is fine in the single threaded child) before exec
        match unsafe { fork() }.map_err(PtyError::Start)? {
            ForkResult::Child => {
                drop(master);

                let error = exec_child(&slave_name, &program, &argv, env);

                tracing::error!("Unable to start host process {}: {}", command, error);

                // SAFETY: _exit never returns and skips the parent's atexit handlers
                unsafe { libc::_exit(127) }
            },
            ForkResult::Parent { child } => {
                let mut pty = Pty {
                    master,
                    child_pid: child,
                    child_alive: true,
                };

                if let Err(error) = set_non_blocking(pty.master.as_raw_fd()) {
                    pty.terminate();

                    return Err(PtyError::Start(error));
                }

                tracing::debug!("Spawned host process {} (pid {})", command, child);

                Ok(pty)
            },
        }
    }

    /// Get the raw file descriptor of the PTY master
    pub fn master_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    /// Check if the child process is still running
    pub fn is_alive(&mut self) -> bool {
        if !self.child_alive {
            return false;
        }

        match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            _ => {
                self.child_alive = false;
                false
            },
        }
    }

    /// Read from the PTY master (non-blocking)
    ///
    /// Returns 0 if no data is available and [`PtyError::Closed`] once the
    /// child has gone away.
    pub fn read(&self, buf: &mut [u8]) -> PtyResult<usize> {
        match read(self.master.as_raw_fd(), buf) {
            Ok(0) => Err(PtyError::Closed),
            Ok(n) => Ok(n),
            // EAGAIN and EWOULDBLOCK are the same value on Linux
            Err(Errno::EAGAIN) => Ok(0),
            // Linux reports a hung up slave as EIO
            Err(Errno::EIO) => Err(PtyError::Closed),
            Err(e) => Err(PtyError::Read(e)),
        }
    }

    pub fn write(&self, data: &[u8]) -> PtyResult<usize> {
        write(self.master.as_raw_fd(), data).map_err(PtyError::Write)
    }

    pub fn write_all(&self, mut data: &[u8]) -> PtyResult<()> {
        while !data.is_empty() {
            match self.write(data) {
                Ok(n) => data = &data[n..],
                Err(PtyError::Write(Errno::EAGAIN)) => thread::yield_now(),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Hang up the child, killing it if it does not exit, and reap it
    ///
    /// Returns whether the child is gone.
    pub fn terminate(&mut self) -> bool {
        if !self.is_alive() {
            return true;
        }

        let _ = kill(self.child_pid, Signal::SIGHUP);

        for _ in 0..HANGUP_CHECKS {
            if !self.is_alive() {
                return true;
            }

            thread::sleep(HANGUP_GRACE / HANGUP_CHECKS);
        }

        if self.is_alive() {
            let _ = kill(self.child_pid, Signal::SIGKILL);
        }

        match waitpid(self.child_pid, None) {
            Ok(_) | Err(Errno::ECHILD) => {
                self.child_alive = false;
                true
            },
            Err(e) => {
                tracing::warn!("{}", PtyError::Terminate(e));
                false
            },
        }
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        if self.child_alive {
            let _ = waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG));
        }
    }
}

fn to_cstring(value: &str) -> PtyResult<CString> {
    CString::new(value).map_err(|_| PtyError::InvalidCommand(format!("{:?} contains NUL", value)))
}

fn set_non_blocking(fd: RawFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);

    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

    Ok(())
}

/// Runs in the forked child; only returns on failure
fn exec_child(slave_name: &str, program: &CString, argv: &[CString], env: &[(&str, &str)]) -> nix::Error {
    if let Err(e) = setsid() {
        return e;
    }

    let slave_fd = match open(slave_name, OFlag::O_RDWR, Mode::empty()) {
        Ok(fd) => fd,
        Err(e) => return e,
    };

    // SAFETY: TIOCSCTTY is a valid ioctl for setting the controlling terminal
    unsafe {
        libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);
    }

    for fd in [STDIN_FILENO, STDOUT_FILENO, STDERR_FILENO] {
        if let Err(e) = dup2(slave_fd, fd) {
            return e;
        }
    }

    if slave_fd > STDERR_FILENO {
        let _ = close(slave_fd);
    }

    for (key, value) in env {
        std::env::set_var(key, value);
    }

    match execvp(program.as_c_str(), argv) {
        Ok(never) => match never {},
        Err(e) => e,
    }
}

fn set_window_size(fd: RawFd, dimensions: Dimensions) -> PtyResult<()> {
    let winsize = libc::winsize {
        ws_row: u16::try_from(dimensions.rows).unwrap_or(u16::MAX),
        ws_col: u16::try_from(dimensions.columns).unwrap_or(u16::MAX),
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCSWINSZ is a valid ioctl for setting window size
    let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &winsize) };

    if result < 0 {
        Err(PtyError::Open(Errno::last()))
    } else {
        Ok(())
    }
}

/// Rows and columns the PTY reports
#[cfg(test)]
fn get_window_size(fd: RawFd) -> nix::Result<(u16, u16)> {
    let mut winsize = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCGWINSZ is a valid ioctl for getting window size
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut winsize) };

    if result < 0 {
        Err(Errno::last())
    } else {
        Ok((winsize.ws_row, winsize.ws_col))
    }
}
