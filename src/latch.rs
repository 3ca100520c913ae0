//! Signal latches
//!
//! Bridges asynchronous signal delivery into the main loop. A handler does a
//! single atomic store; the loop later reads and clears the flag. Signals
//! arriving between two polls collapse into one notification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{Error, Result};

static RESIZE_PENDING: AtomicBool = AtomicBool::new(false);
static TERMINATE_PENDING: AtomicBool = AtomicBool::new(false);

static RESIZE_INSTALLED: OnceLock<std::result::Result<(), Errno>> = OnceLock::new();
static TERMINATE_INSTALLED: OnceLock<std::result::Result<(), Errno>> = OnceLock::new();

extern "C" fn on_resize(_: libc::c_int) {
    RESIZE_PENDING.store(true, Ordering::SeqCst);
}

extern "C" fn on_terminate(_: libc::c_int) {
    TERMINATE_PENDING.store(true, Ordering::SeqCst);
}

fn install_handler(signal: Signal, handler: extern "C" fn(libc::c_int)) -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handlers only store to an atomic, which is async-signal-safe
    unsafe { sigaction(signal, &action) }?;
    Ok(())
}

/// Set when the controlling terminal is resized (SIGWINCH)
///
/// Meant to be polled from a single main loop.
#[derive(Debug)]
pub struct ResizeLatch {
    _private: (),
}

impl ResizeLatch {
    /// Install the SIGWINCH handler
    ///
    /// The handler is registered once per process; later calls hand out
    /// another view of the same latch.
    pub fn install() -> Result<Self> {
        (*RESIZE_INSTALLED.get_or_init(|| install_handler(Signal::SIGWINCH, on_resize)))
            .map_err(Error::Signal)?;
        Ok(Self { _private: () })
    }

    /// Whether a resize was signaled since the last call
    pub fn poll_and_clear(&self) -> bool {
        RESIZE_PENDING.swap(false, Ordering::SeqCst)
    }
}

/// Set when the process is asked to stop (SIGTERM, SIGHUP or SIGINT)
///
/// Lets the main loop leave through its normal exit path, so the terminal
/// gets restored.
#[derive(Debug)]
pub struct TerminationLatch {
    _private: (),
}

impl TerminationLatch {
    pub fn install() -> Result<Self> {
        let installed = TERMINATE_INSTALLED.get_or_init(|| {
            [Signal::SIGTERM, Signal::SIGHUP, Signal::SIGINT]
                .into_iter()
                .try_for_each(|signal| install_handler(signal, on_terminate))
        });
        (*installed).map_err(Error::Signal)?;
        Ok(Self { _private: () })
    }

    /// Whether a termination signal arrived since the last call
    pub fn poll_and_clear(&self) -> bool {
        TERMINATE_PENDING.swap(false, Ordering::SeqCst)
    }
}
