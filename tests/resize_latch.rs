//! SIGWINCH delivery into the resize latch
//!
//! Runs in its own test binary so no other test shares the process-wide
//! signal disposition.

use mux_term::ResizeLatch;
use nix::sys::signal::{raise, Signal};

#[test]
fn test_resize_latch_collapses_signals() {
    let latch = ResizeLatch::install().expect("Failed to install SIGWINCH handler");

    assert!(!latch.poll_and_clear());

    raise(Signal::SIGWINCH).unwrap();
    raise(Signal::SIGWINCH).unwrap();

    assert!(latch.poll_and_clear());
    assert!(!latch.poll_and_clear());

    raise(Signal::SIGWINCH).unwrap();
    assert!(latch.poll_and_clear());
    assert!(!latch.poll_and_clear());
}
