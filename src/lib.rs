//! mux-term: terminal-control primitives for a PTY-backed session
//!
//! - `raw_mode`: capture terminal settings and enter/leave raw mode
//! - `geometry`: query the controlling terminal size and apply it to a PTY
//! - `readiness`: wait for descriptors to become readable or writable
//! - `launcher`: replace the process image with the session program
//! - `latch`: signal-to-main-loop flags for resize and termination
//! - `pty`: PTY pair allocation and the child session
//! - `relay`: the loop tying it all together

pub mod config;
pub mod error;
pub mod geometry;
pub mod latch;
pub mod launcher;
pub mod pty;
pub mod raw_mode;
pub mod readiness;
pub mod relay;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use geometry::{query_controlling_terminal, Geometry};
pub use latch::{ResizeLatch, TerminationLatch};
pub use launcher::{launch, LAUNCH_FAILURE};
pub use pty::{PtyPair, PtySession, HANGUP_GRACE};
pub use raw_mode::{enter_raw, RawModeGuard, TerminalSnapshot};
pub use readiness::{poll_readable, poll_ready, wait_readable, wait_ready, Readiness, ReadySet};
pub use relay::Relay;
