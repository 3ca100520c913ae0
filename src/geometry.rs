//! PTY geometry sync
//!
//! Reads the character grid of the controlling terminal and applies it to a
//! PTY, so that programs on the slave side see the same size as the user.
//!
//! Reference: tty_ioctl(4), https://man7.org/linux/man-pages/man4/tty_ioctl.4.html

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};

use nix::libc;
use nix::pty::Winsize;

/// Terminal size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub rows: u16,
    pub cols: u16,
}

impl Geometry {
    pub const fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    fn to_winsize(self) -> Winsize {
        Winsize {
            ws_row: self.rows,
            ws_col: self.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

impl From<Winsize> for Geometry {
    fn from(ws: Winsize) -> Self {
        Self::new(ws.ws_row, ws.ws_col)
    }
}

/// Anything that can report a window size
pub trait WinsizeSource {
    fn winsize(&self) -> io::Result<Winsize>;
}

/// Window size of a terminal descriptor, read with `TIOCGWINSZ`
#[derive(Debug, Clone, Copy)]
pub struct TerminalSource<'fd> {
    fd: BorrowedFd<'fd>,
}

impl<'fd> TerminalSource<'fd> {
    pub fn new(fd: BorrowedFd<'fd>) -> Self {
        Self { fd }
    }
}

impl TerminalSource<'static> {
    /// The controlling terminal, as seen through stdout
    pub fn stdout() -> Self {
        // SAFETY: stdout stays open for the lifetime of the process
        Self::new(unsafe { BorrowedFd::borrow_raw(libc::STDOUT_FILENO) })
    }
}

impl WinsizeSource for TerminalSource<'_> {
    fn winsize(&self) -> io::Result<Winsize> {
        let mut ws = Winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: TIOCGWINSZ writes a winsize into the provided struct
        let result = unsafe { libc::ioctl(self.fd.as_raw_fd(), libc::TIOCGWINSZ, &mut ws) };

        if result < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ws)
        }
    }
}

/// Size of the controlling terminal, falling back to 24x80
///
/// Never fails: an unreadable size or one with at most a single row yields
/// [`Geometry::default`].
pub fn query_controlling_terminal() -> Geometry {
    query_from(&TerminalSource::stdout())
}

/// Size reported by `source`, with the same fallback rule as
/// [`query_controlling_terminal`]
pub fn query_from<S: WinsizeSource + ?Sized>(source: &S) -> Geometry {
    match source.winsize() {
        Ok(ws) if ws.ws_row > 1 => Geometry::from(ws),
        Ok(ws) => {
            tracing::debug!(rows = ws.ws_row, cols = ws.ws_col, "Degenerate terminal size");
            Geometry::default()
        },
        Err(e) => {
            tracing::debug!("Failed to read terminal size: {}", e);
            Geometry::default()
        },
    }
}

/// Read the window size of any terminal or PTY descriptor
pub fn read_winsize(fd: BorrowedFd<'_>) -> io::Result<Geometry> {
    TerminalSource::new(fd).winsize().map(Geometry::from)
}

/// Set the window size of a PTY
///
/// Best effort: a failure leaves the old size in place and is only logged.
pub fn apply(fd: BorrowedFd<'_>, size: Geometry) {
    let ws = size.to_winsize();

    // SAFETY: TIOCSWINSZ reads a winsize from the provided struct
    let result = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCSWINSZ, &ws) };

    if result < 0 {
        tracing::debug!(
            fd = fd.as_raw_fd(),
            "Failed to set window size: {}",
            io::Error::last_os_error()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::PtyPair;
    use proptest::prelude::*;
    use std::os::fd::AsFd;

    struct Fixed(io::Result<Winsize>);

    impl WinsizeSource for Fixed {
        fn winsize(&self) -> io::Result<Winsize> {
            match &self.0 {
                Ok(ws) => Ok(*ws),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    fn ws(rows: u16, cols: u16) -> Winsize {
        Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }

    #[test]
    fn test_geometry_default() {
        assert_eq!(Geometry::default(), Geometry::new(24, 80));
    }

    #[test]
    fn test_query_falls_back_on_error() {
        let source = Fixed(Err(io::Error::from_raw_os_error(libc::ENOTTY)));
        assert_eq!(query_from(&source), Geometry::new(24, 80));
    }

    #[test]
    fn test_query_falls_back_on_single_row() {
        assert_eq!(query_from(&Fixed(Ok(ws(1, 200)))), Geometry::default());
        assert_eq!(query_from(&Fixed(Ok(ws(0, 0)))), Geometry::default());
    }

    #[test]
    fn test_query_reads_real_size() {
        assert_eq!(query_from(&Fixed(Ok(ws(50, 132)))), Geometry::new(50, 132));
    }

    #[test]
    fn test_query_non_terminal_falls_back() {
        let file = tempfile::tempfile().unwrap();
        let source = TerminalSource::new(file.as_fd());
        assert_eq!(query_from(&source), Geometry::default());
    }

    #[test]
    fn test_apply_round_trip() {
        let pair = PtyPair::open().unwrap();
        apply(pair.master_fd(), Geometry::new(40, 120));

        assert_eq!(read_winsize(pair.slave_fd()).unwrap(), Geometry::new(40, 120));
        assert_eq!(
            query_from(&TerminalSource::new(pair.slave_fd())),
            Geometry::new(40, 120)
        );
    }

    #[test]
    fn test_apply_ignores_non_terminal() {
        let file = tempfile::tempfile().unwrap();
        apply(file.as_fd(), Geometry::new(40, 120));
    }

    proptest! {
        #[test]
        fn prop_query_fallback(rows in 0u16..=u16::MAX, cols in 0u16..=u16::MAX) {
            let got = query_from(&Fixed(Ok(ws(rows, cols))));
            if rows > 1 {
                prop_assert_eq!(got, Geometry::new(rows, cols));
            } else {
                prop_assert_eq!(got, Geometry::default());
            }
        }
    }
}
