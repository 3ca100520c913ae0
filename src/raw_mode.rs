//! Terminal mode control
//!
//! Captures the line discipline of a terminal and switches it to raw mode.
//! Entering raw mode hands back a [`RawModeGuard`]; the guard restores the
//! captured settings exactly once, either through [`RawModeGuard::restore`]
//! or when it is dropped.
//!
//! Reference: termios(3), https://man7.org/linux/man-pages/man3/termios.3.html

use std::os::fd::{AsRawFd, BorrowedFd};

use nix::libc;
use nix::sys::termios::{
    self, InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices, Termios,
};

use crate::error::{Error, Result};

/// Line discipline settings captured before entering raw mode
///
/// A snapshot is consumed when it is restored, so the same capture can never
/// be applied twice.
#[derive(Debug)]
pub struct TerminalSnapshot {
    termios: Termios,
}

impl TerminalSnapshot {
    /// Capture the current settings of a terminal
    pub fn capture(fd: BorrowedFd<'_>) -> Result<Self> {
        let termios = termios::tcgetattr(fd).map_err(Error::GetAttr)?;
        Ok(Self { termios })
    }

    /// The captured settings
    pub fn termios(&self) -> &Termios {
        &self.termios
    }

    /// Apply the captured settings immediately
    pub fn restore(self, fd: BorrowedFd<'_>) -> Result<()> {
        termios::tcsetattr(fd, SetArg::TCSANOW, &self.termios).map_err(Error::SetAttr)
    }

    /// Raw-mode variant of the captured settings
    fn to_raw(&self) -> Termios {
        let mut raw = self.termios.clone();

        raw.input_flags.remove(InputFlags::ICRNL | InputFlags::IXON);
        raw.output_flags.remove(OutputFlags::OPOST);
        raw.local_flags
            .remove(LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::ISIG | LocalFlags::IEXTEN);

        // Return from read() after a single byte, no inter-byte timer
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

        raw
    }
}

/// RAII guard for raw terminal mode
///
/// Restores the terminal when dropped unless [`RawModeGuard::restore`] was
/// called first.
#[derive(Debug)]
pub struct RawModeGuard<'fd> {
    fd: BorrowedFd<'fd>,
    snapshot: Option<TerminalSnapshot>,
}

impl RawModeGuard<'_> {
    /// The settings that will be restored
    pub fn snapshot(&self) -> Option<&TerminalSnapshot> {
        self.snapshot.as_ref()
    }

    /// Restore the captured settings now
    ///
    /// On failure the guard is already spent; the error is only for
    /// reporting and the drop will not try again.
    pub fn restore(mut self) -> Result<()> {
        match self.snapshot.take() {
            Some(snapshot) => snapshot.restore(self.fd),
            None => Ok(()),
        }
    }
}

impl Drop for RawModeGuard<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            if let Err(e) = snapshot.restore(self.fd) {
                tracing::warn!(fd = self.fd.as_raw_fd(), "Failed to restore terminal: {}", e);
            }
        }
    }
}

/// Put stdin into raw mode
pub fn enter_raw() -> Result<RawModeGuard<'static>> {
    // SAFETY: stdin stays open for the lifetime of the process
    let fd = unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) };
    enter_raw_on(fd)
}

/// Put the given terminal into raw mode
///
/// Fails if `fd` is not a terminal or the new settings are rejected; in
/// either case the terminal is left untouched.
pub fn enter_raw_on(fd: BorrowedFd<'_>) -> Result<RawModeGuard<'_>> {
    let snapshot = TerminalSnapshot::capture(fd)?;
    let raw = snapshot.to_raw();

    termios::tcsetattr(fd, SetArg::TCSANOW, &raw).map_err(Error::SetAttr)?;
    tracing::debug!(fd = fd.as_raw_fd(), "Entered raw mode");

    Ok(RawModeGuard {
        fd,
        snapshot: Some(snapshot),
    })
}
