//! Relay loop
//!
//! Shuttles bytes between an input descriptor (normally the user's terminal)
//! and a PTY session, and writes the session's output to a writer. The loop
//! sleeps only inside the readiness wait and keeps the PTY size in step with
//! the controlling terminal whenever the resize latch fires.

use std::io::Write;
use std::os::fd::{AsRawFd, BorrowedFd};

use nix::errno::Errno;
use nix::unistd::read;

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::geometry;
use crate::latch::{ResizeLatch, TerminationLatch};
use crate::pty::{PtySession, HANGUP_GRACE};
use crate::readiness::wait_ready;

/// Drives one PTY session until its child exits
pub struct Relay<'fd, W: Write> {
    input: BorrowedFd<'fd>,
    output: W,
    session: PtySession,
    poll_interval_ms: u32,
    read_buffer_size: usize,
    resize: Option<ResizeLatch>,
    termination: Option<TerminationLatch>,
}

impl<'fd, W: Write> Relay<'fd, W> {
    pub fn new(
        input: BorrowedFd<'fd>,
        output: W,
        session: PtySession,
        config: &RelayConfig,
    ) -> Self {
        Self {
            input,
            output,
            session,
            poll_interval_ms: config.poll_interval_ms,
            read_buffer_size: config.read_buffer_size.max(1),
            resize: None,
            termination: None,
        }
    }

    /// Re-sync the PTY size with the controlling terminal on SIGWINCH
    pub fn with_resize(mut self, latch: ResizeLatch) -> Self {
        self.resize = Some(latch);
        self
    }

    /// Stop and hang up the child on SIGTERM, SIGHUP or SIGINT
    ///
    /// A child still running [`HANGUP_GRACE`] after the hang-up is killed.
    pub fn with_termination(mut self, latch: TerminationLatch) -> Self {
        self.termination = Some(latch);
        self
    }

    pub fn session(&self) -> &PtySession {
        &self.session
    }

    /// Run until the child exits and return its exit status
    ///
    /// End of input stops forwarding but keeps draining the child's output.
    /// Input the PTY cannot take yet is held back, and no more input is read
    /// until it has been delivered, so a child that stops reading never
    /// stalls its own output.
    pub fn run(&mut self) -> Result<i32> {
        let mut input_buf = vec![0u8; self.read_buffer_size];
        let mut output_buf = vec![0u8; self.read_buffer_size];
        let mut pending: Vec<u8> = Vec::new();
        let mut input_open = true;

        loop {
            if self.termination.as_ref().is_some_and(|l| l.poll_and_clear()) {
                tracing::debug!("Termination requested, hanging up child");
                return self.session.terminate(HANGUP_GRACE);
            }

            if self.resize.as_ref().is_some_and(|l| l.poll_and_clear()) {
                let size = geometry::query_controlling_terminal();
                tracing::debug!(rows = size.rows, cols = size.cols, "Resizing PTY");
                self.session.resize(size);
            }

            let poll_input = input_open && pending.is_empty();
            let (input_ready, master_readable, master_writable) = {
                let master = self.session.master_fd();
                let read_fds = if poll_input {
                    vec![self.input, master]
                } else {
                    vec![master]
                };
                let write_fds = if pending.is_empty() {
                    vec![]
                } else {
                    vec![master]
                };
                let ready = wait_ready(&read_fds, &write_fds, self.poll_interval_ms);
                (
                    poll_input && ready.readable.contains(&self.input),
                    ready.readable.contains(&master),
                    ready.writable.contains(&master),
                )
            };

            if master_writable {
                let n = self.forward(&pending)?;
                pending.drain(..n);
            }

            if input_ready {
                match read(self.input.as_raw_fd(), &mut input_buf) {
                    Ok(0) | Err(Errno::EIO) => {
                        tracing::debug!("Input closed");
                        input_open = false;
                    },
                    Ok(n) => {
                        let written = self.forward(&input_buf[..n])?;
                        pending.extend_from_slice(&input_buf[written..n]);
                    },
                    Err(Errno::EAGAIN) | Err(Errno::EINTR) => {},
                    Err(e) => return Err(Error::Read(e)),
                }
            }

            if master_readable {
                match self.session.read(&mut output_buf)? {
                    Some(0) => {},
                    Some(n) => {
                        self.output.write_all(&output_buf[..n])?;
                        self.output.flush()?;
                    },
                    None => {
                        // The child let go of the terminal
                        return self.session.wait();
                    },
                }
            }
        }
    }

    /// Write to the child, returning how much it took
    ///
    /// A closed slave swallows the data; the next master read reports it.
    fn forward(&self, data: &[u8]) -> Result<usize> {
        match self.session.write(data) {
            Err(Error::Write(Errno::EIO)) => {
                tracing::debug!(dropped = data.len(), "PTY closed, dropping input");
                Ok(data.len())
            },
            result => result,
        }
    }
}
