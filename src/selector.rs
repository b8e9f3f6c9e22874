//! Readiness selection for host session descriptors

use std::io;
use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};

/// Waits for registered descriptors to become readable
pub trait Selector {
    fn register(&mut self, fd: RawFd);

    fn unregister(&mut self, fd: RawFd);

    fn clear(&mut self);

    fn is_empty(&self) -> bool;

    /// Wait at most `timeout` for readable descriptors
    ///
    /// Returns immediately with nothing when no descriptors are registered.
    fn select(&mut self, timeout: Duration) -> io::Result<Vec<RawFd>>;
}

/// [`Selector`] backed by `poll(2)`
#[derive(Debug, Default)]
pub struct PollSelector {
    fds: Vec<RawFd>,
}

impl PollSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for PollSelector {
    fn register(&mut self, fd: RawFd) {
        if !self.fds.contains(&fd) {
            self.fds.push(fd);
        }
    }

    fn unregister(&mut self, fd: RawFd) {
        self.fds.retain(|registered| *registered != fd);
    }

    fn clear(&mut self) {
        self.fds.clear();
    }

    fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    fn select(&mut self, timeout: Duration) -> io::Result<Vec<RawFd>> {
        if self.fds.is_empty() {
            return Ok(Vec::new());
        }

        // SAFETY: registered descriptors stay open until they are unregistered
        let borrowed: Vec<BorrowedFd<'_>> = self
            .fds
            .iter()
            .map(|fd| unsafe { BorrowedFd::borrow_raw(*fd) })
            .collect();

        let mut poll_fds: Vec<PollFd<'_>> = borrowed
            .iter()
            .map(|fd| PollFd::new(fd, PollFlags::POLLIN))
            .collect();

        match poll(&mut poll_fds, poll_timeout(timeout)) {
            Ok(0) | Err(Errno::EINTR) => return Ok(Vec::new()),
            Ok(_) => {},
            Err(e) => return Err(io::Error::from(e)),
        }

        // Hang ups are reported as readable so the session sees the EOF.
        let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;

        Ok(self
            .fds
            .iter()
            .zip(&poll_fds)
            .filter(|(_, poll_fd)| poll_fd.revents().is_some_and(|r| r.intersects(ready)))
            .map(|(fd, _)| *fd)
            .collect())
    }
}

/// `poll(2)` timeout in milliseconds, rounded up so a short wait still waits
fn poll_timeout(timeout: Duration) -> i32 {
    let millis = timeout.saturating_add(Duration::from_nanos(999_999)).as_millis();

    i32::try_from(millis).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::io::Write;
    use std::time::Instant;

    #[test]
    fn test_poll_timeout_rounds_up() {
        assert_eq!(poll_timeout(Duration::ZERO), 0);
        assert_eq!(poll_timeout(Duration::from_micros(1)), 1);
        assert_eq!(poll_timeout(Duration::from_millis(5)), 5);
        assert_eq!(poll_timeout(Duration::from_micros(5_001)), 6);
        assert_eq!(poll_timeout(Duration::MAX), i32::MAX);
    }

    #[test]
    fn test_select_sub_millisecond_timeout_waits() {
        let (_writer, reader) = UnixStream::pair().unwrap();

        let mut selector = PollSelector::new();

        selector.register(reader.as_raw_fd());

        let start = Instant::now();

        assert!(selector.select(Duration::from_micros(500)).unwrap().is_empty());
        assert!(start.elapsed() >= Duration::from_micros(500));
    }

    #[test]
    fn test_select_empty() {
        let mut selector = PollSelector::new();

        assert!(selector.is_empty());
        assert!(selector.select(Duration::from_secs(5)).unwrap().is_empty());
    }

    #[test]
    fn test_select_readable() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        let (_idle_writer, idle_reader) = UnixStream::pair().unwrap();

        let mut selector = PollSelector::new();

        selector.register(reader.as_raw_fd());
        selector.register(idle_reader.as_raw_fd());

        assert!(selector.select(Duration::from_millis(10)).unwrap().is_empty());

        writer.write_all(b"x").unwrap();

        assert_eq!(
            selector.select(Duration::from_millis(100)).unwrap(),
            vec![reader.as_raw_fd()]
        );
    }

    #[test]
    fn test_unregister() {
        let (mut writer, reader) = UnixStream::pair().unwrap();

        let mut selector = PollSelector::new();

        selector.register(reader.as_raw_fd());
        selector.register(reader.as_raw_fd());
        selector.unregister(reader.as_raw_fd());

        writer.write_all(b"x").unwrap();

        assert!(selector.is_empty());
        assert!(selector.select(Duration::from_millis(10)).unwrap().is_empty());
    }

    #[test]
    fn test_hang_up_is_readable() {
        let (writer, reader) = UnixStream::pair().unwrap();

        let mut selector = PollSelector::new();

        selector.register(reader.as_raw_fd());

        drop(writer);

        assert_eq!(
            selector.select(Duration::from_millis(100)).unwrap(),
            vec![reader.as_raw_fd()]
        );
    }
}
