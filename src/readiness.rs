//! Readiness multiplexer
//!
//! Blocks on a set of descriptors until at least one of them is readable (or
//! writable, for [`wait_ready`]) or a timeout expires. Built on poll(2), so the cost of a wait grows with the
//! number of descriptors rather than with the largest descriptor value.

use std::os::fd::{AsRawFd, BorrowedFd, RawFd};

use nix::errno::Errno;
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags};

use crate::error::{Error, Result};

/// Descriptors found readable by a wait, in the order they were submitted
#[derive(Debug, Clone, Default)]
pub struct ReadySet<'fd> {
    fds: Vec<BorrowedFd<'fd>>,
}

impl<'fd> ReadySet<'fd> {
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn contains<F: AsRawFd>(&self, fd: &F) -> bool {
        let raw = fd.as_raw_fd();
        self.fds.iter().any(|ready| ready.as_raw_fd() == raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = BorrowedFd<'fd>> + '_ {
        self.fds.iter().copied()
    }

    pub fn raw_fds(&self) -> Vec<RawFd> {
        self.fds.iter().map(AsRawFd::as_raw_fd).collect()
    }
}

/// Wait until some of `fds` are readable, for at most `timeout_ms`
///
/// A timeout of 0 polls without blocking. Timeouts, interrupted waits and
/// failed waits all come back as an empty set, so callers should treat an
/// empty result as "try again". Use [`poll_readable`] to tell failures apart.
///
/// Each descriptor may appear at most once in `fds`.
pub fn wait_readable<'fd>(fds: &[BorrowedFd<'fd>], timeout_ms: u32) -> ReadySet<'fd> {
    match poll_readable(fds, timeout_ms) {
        Ok(ready) => ready,
        Err(e) => {
            tracing::debug!("Readiness wait failed: {}", e);
            ReadySet::default()
        },
    }
}

/// Like [`wait_readable`], but reports a descriptor that is not open as
/// [`Error::InvalidDescriptor`] and a failed wait as [`Error::Poll`]
///
/// An interrupted wait is still an empty set.
pub fn poll_readable<'fd>(fds: &[BorrowedFd<'fd>], timeout_ms: u32) -> Result<ReadySet<'fd>> {
    poll_ready(fds, &[], timeout_ms).map(|ready| ready.readable)
}

/// Result of a wait on both directions
#[derive(Debug, Clone, Default)]
pub struct Readiness<'fd> {
    pub readable: ReadySet<'fd>,
    pub writable: ReadySet<'fd>,
}

/// Wait until some of `read` are readable or some of `write` are writable
///
/// Same contract as [`wait_readable`]: any failure is an empty result.
pub fn wait_ready<'fd>(
    read: &[BorrowedFd<'fd>],
    write: &[BorrowedFd<'fd>],
    timeout_ms: u32,
) -> Readiness<'fd> {
    match poll_ready(read, write, timeout_ms) {
        Ok(ready) => ready,
        Err(e) => {
            tracing::debug!("Readiness wait failed: {}", e);
            Readiness::default()
        },
    }
}

/// [`wait_ready`] with failures reported as in [`poll_readable`]
///
/// A descriptor may appear in both lists; it is polled once for both.
pub fn poll_ready<'fd>(
    read: &[BorrowedFd<'fd>],
    write: &[BorrowedFd<'fd>],
    timeout_ms: u32,
) -> Result<Readiness<'fd>> {
    debug_assert!(
        !has_duplicates(read) && !has_duplicates(write),
        "descriptor submitted twice to the readiness wait"
    );

    let mut interest: Vec<(BorrowedFd<'fd>, PollFlags)> =
        read.iter().map(|fd| (*fd, PollFlags::POLLIN)).collect();
    for fd in write {
        match interest
            .iter_mut()
            .find(|(seen, _)| seen.as_raw_fd() == fd.as_raw_fd())
        {
            Some((_, flags)) => *flags |= PollFlags::POLLOUT,
            None => interest.push((*fd, PollFlags::POLLOUT)),
        }
    }

    let mut poll_fds: Vec<PollFd> = interest
        .iter()
        .map(|(fd, flags)| PollFd::new(fd, *flags))
        .collect();

    let timeout = libc::c_int::try_from(timeout_ms).unwrap_or(libc::c_int::MAX);

    match poll(&mut poll_fds, timeout) {
        Ok(0) | Err(Errno::EINTR) => return Ok(Readiness::default()),
        Ok(_) => {},
        Err(e) => return Err(Error::Poll(e)),
    }

    // Hang-up and error conditions count as ready: the next call will not block
    let failed = PollFlags::POLLHUP | PollFlags::POLLERR;

    let mut ready = Readiness::default();
    for ((fd, flags), polled) in interest.iter().zip(&poll_fds) {
        let revents = polled.revents().unwrap_or_else(PollFlags::empty);
        if revents.contains(PollFlags::POLLNVAL) {
            return Err(Error::InvalidDescriptor(fd.as_raw_fd()));
        }
        if flags.contains(PollFlags::POLLIN) && revents.intersects(PollFlags::POLLIN | failed) {
            ready.readable.fds.push(*fd);
        }
        if flags.contains(PollFlags::POLLOUT) && revents.intersects(PollFlags::POLLOUT | failed) {
            ready.writable.fds.push(*fd);
        }
    }

    Ok(ready)
}

fn has_duplicates(fds: &[BorrowedFd<'_>]) -> bool {
    fds.iter()
        .enumerate()
        .any(|(i, a)| fds[i + 1..].iter().any(|b| a.as_raw_fd() == b.as_raw_fd()))
}
