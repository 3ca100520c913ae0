//! PTY pair and child session
//!
//! Opens a pseudoterminal pair and runs a program on its slave side. The
//! slave is handed to the child and closed in the parent, so the master
//! reports end of stream once the child (and anything it spawned) lets go
//! of the terminal.
//!
//! Reference: https://www.man7.org/linux/man-pages/man3/posix_openpt.3.html

use std::ffi::{CString, OsStr};
use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc::{self, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::pty::{grantpt, posix_openpt, ptsname, unlockpt, PtyMaster};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{dup2, fork, read, setsid, write, ForkResult, Pid};

use crate::error::{Error, Result};
use crate::geometry::{self, Geometry};
use crate::launcher::{self, LAUNCH_FAILURE};
use crate::readiness;

/// How long a hung-up child gets to exit before it is killed
pub const HANGUP_GRACE: Duration = Duration::from_millis(500);

const REAP_INTERVAL: Duration = Duration::from_millis(10);
const WRITE_RETRY_MS: u32 = 100;

/// A pseudoterminal master with its slave opened
pub struct PtyPair {
    master: PtyMaster,
    slave: File,
    slave_path: String,
}

impl PtyPair {
    /// Allocate a new PTY and open its slave side
    pub fn open() -> Result<Self> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(Error::OpenMaster)?;
        grantpt(&master).map_err(Error::GrantPty)?;
        unlockpt(&master).map_err(Error::UnlockPty)?;

        // SAFETY: ptsname is not thread-safe; the name is copied out before
        // any other PTY is touched on this thread
        let slave_path = unsafe { ptsname(&master) }.map_err(Error::PtsName)?;

        let slave = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&slave_path)
            .map_err(Error::OpenSlave)?;

        Ok(Self {
            master,
            slave,
            slave_path,
        })
    }

    /// Path of the slave device, e.g. `/dev/pts/3`
    pub fn slave_path(&self) -> &str {
        &self.slave_path
    }

    pub fn master_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the master fd is valid for the lifetime of this pair
        unsafe { BorrowedFd::borrow_raw(self.master.as_raw_fd()) }
    }

    pub fn slave_fd(&self) -> BorrowedFd<'_> {
        self.slave.as_fd()
    }

    /// Split into the master and the slave
    pub fn into_parts(self) -> (PtyMaster, File) {
        (self.master, self.slave)
    }
}

/// A program running on the slave side of a PTY
pub struct PtySession {
    /// The PTY master
    master: PtyMaster,
    /// Child process ID
    pid: Pid,
    /// Exit status once the child has been reaped
    exit_code: Option<i32>,
}

impl PtySession {
    /// Run `program` in a fresh PTY of the given size
    ///
    /// The program gets no arguments beyond its own name. If it cannot be
    /// executed the child exits with [`LAUNCH_FAILURE`], which shows up in
    /// [`PtySession::wait`] rather than here.
    pub fn spawn<S: AsRef<OsStr>>(program: S, size: Geometry) -> Result<Self> {
        let program =
            CString::new(program.as_ref().as_bytes()).map_err(Error::InvalidProgram)?;

        let pair = PtyPair::open()?;
        geometry::apply(pair.master_fd(), size);
        let (master, slave) = pair.into_parts();

        // SAFETY: the child only makes async-signal-safe calls before exec
        match unsafe { fork() }.map_err(Error::Fork)? {
            ForkResult::Child => {
                drop(master);
                attach_to_slave(slave.as_raw_fd());
                launcher::launch_cstr(&program)
            },
            ForkResult::Parent { child } => {
                // The child holds the only slave descriptor from here on
                drop(slave);

                let flags = fcntl(master.as_raw_fd(), FcntlArg::F_GETFL)
                    .map_err(Error::SetNonBlocking)?;
                let flags = OFlag::from_bits_truncate(flags);
                fcntl(
                    master.as_raw_fd(),
                    FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK),
                )
                .map_err(Error::SetNonBlocking)?;

                tracing::debug!(pid = child.as_raw(), "Spawned PTY child");

                Ok(Self {
                    master,
                    pid: child,
                    exit_code: None,
                })
            },
        }
    }

    pub fn master_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the master fd is valid for the lifetime of this session
        unsafe { BorrowedFd::borrow_raw(self.master.as_raw_fd()) }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Read child output from the master (non-blocking)
    ///
    /// Returns `Ok(Some(0))` when nothing is available yet and `Ok(None)`
    /// once the slave side has been closed.
    pub fn read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        match read(self.master.as_raw_fd(), buf) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(n)),
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => Ok(Some(0)),
            // Linux reports a hung-up slave as EIO on the master
            Err(Errno::EIO) => Ok(None),
            Err(e) => Err(Error::Read(e)),
        }
    }

    /// Write as much of `data` as the PTY accepts right now (non-blocking)
    ///
    /// Returns the number of bytes written, 0 when the input queue is full.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        match write(self.master.as_raw_fd(), data) {
            Ok(n) => Ok(n),
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => Ok(0),
            Err(e) => Err(Error::Write(e)),
        }
    }

    /// Write all of `data`, sleeping in poll while the input queue is full
    ///
    /// Only suitable when something else drains the child's output; the
    /// relay uses [`PtySession::write`] and keeps the remainder pending.
    pub fn write_all(&self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data)?;
            if n == 0 {
                readiness::poll_ready(&[], &[self.master_fd()], WRITE_RETRY_MS)?;
            }
            data = &data[n..];
        }
        Ok(())
    }

    /// Apply a new window size; the kernel notifies the child with SIGWINCH
    pub fn resize(&self, size: Geometry) {
        geometry::apply(self.master_fd(), size);
    }

    /// Reap the child if it has exited
    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        if let Some(code) = self.exit_code {
            return Ok(Some(code));
        }

        let status = waitpid(self.pid, Some(WaitPidFlag::WNOHANG)).map_err(Error::Wait)?;
        Ok(self.record(status))
    }

    /// Block until the child exits
    ///
    /// A child killed by a signal reports `128 + signal`, as shells do.
    pub fn wait(&mut self) -> Result<i32> {
        loop {
            if let Some(code) = self.exit_code {
                return Ok(code);
            }

            match waitpid(self.pid, None) {
                Ok(status) => {
                    self.record(status);
                },
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(Error::Wait(e)),
            }
        }
    }

    /// Send a signal to the child process
    pub fn signal(&self, signal: Signal) -> Result<()> {
        kill(self.pid, signal).map_err(Error::Kill)
    }

    /// Hang up the child and reap it
    ///
    /// Sends SIGHUP, gives the child `grace` to exit, then sends SIGKILL and
    /// blocks until it is gone.
    pub fn terminate(&mut self, grace: Duration) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }

        if let Err(e) = self.signal(Signal::SIGHUP) {
            tracing::warn!(pid = self.pid.as_raw(), "Failed to hang up child: {}", e);
        }

        let deadline = Instant::now() + grace;
        loop {
            if let Some(code) = self.try_wait()? {
                return Ok(code);
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(REAP_INTERVAL);
        }

        tracing::debug!(pid = self.pid.as_raw(), "Child ignored SIGHUP, killing it");
        if let Err(e) = self.signal(Signal::SIGKILL) {
            tracing::warn!(pid = self.pid.as_raw(), "Failed to kill child: {}", e);
        }
        self.wait()
    }

    fn record(&mut self, status: WaitStatus) -> Option<i32> {
        let code = match status {
            WaitStatus::Exited(_, code) => code,
            WaitStatus::Signaled(_, signal, _) => 128 + signal as i32,
            _ => return None,
        };
        tracing::debug!(pid = self.pid.as_raw(), code, "PTY child exited");
        self.exit_code = Some(code);
        Some(code)
    }
}

impl AsRawFd for PtySession {
    fn as_raw_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if self.exit_code.is_none() {
            if let Err(e) = self.terminate(HANGUP_GRACE) {
                tracing::warn!(pid = self.pid.as_raw(), "Failed to reap child: {}", e);
            }
        }
    }
}

/// Make the slave the controlling terminal and the standard streams of the
/// forked child. Exits the child on failure.
fn attach_to_slave(slave_fd: RawFd) {
    if setsid().is_err() {
        launcher::exit_child(LAUNCH_FAILURE);
    }

    // SAFETY: TIOCSCTTY is a valid ioctl for setting the controlling terminal
    if unsafe { libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0) } < 0 {
        launcher::exit_child(LAUNCH_FAILURE);
    }

    for target in [STDIN_FILENO, STDOUT_FILENO, STDERR_FILENO] {
        if dup2(slave_fd, target).is_err() {
            launcher::exit_child(LAUNCH_FAILURE);
        }
    }

    if slave_fd > STDERR_FILENO {
        // SAFETY: the original slave fd is no longer needed once duplicated
        unsafe { libc::close(slave_fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn read_until_closed(session: &PtySession, timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        let mut output = Vec::new();
        let mut buf = [0u8; 1024];

        while Instant::now() < deadline {
            match session.read(&mut buf).unwrap() {
                Some(0) => std::thread::sleep(Duration::from_millis(10)),
                Some(n) => output.extend_from_slice(&buf[..n]),
                None => break,
            }
        }
        output
    }

    #[test]
    fn test_pair_open() {
        let pair = PtyPair::open().expect("Failed to open PTY");
        assert!(pair.slave_path().starts_with("/dev/pts/"));
        assert!(pair.master_fd().as_raw_fd() >= 0);
    }

    #[test]
    fn test_spawn_applies_size() {
        let mut session = PtySession::spawn("/bin/cat", Geometry::new(40, 120)).unwrap();

        let size = geometry::read_winsize(session.master_fd()).unwrap();
        assert_eq!(size, Geometry::new(40, 120));

        session.resize(Geometry::new(50, 132));
        let size = geometry::read_winsize(session.master_fd()).unwrap();
        assert_eq!(size, Geometry::new(50, 132));

        session.signal(Signal::SIGKILL).unwrap();
        assert_eq!(session.wait().unwrap(), 128 + Signal::SIGKILL as i32);
    }

    #[test]
    fn test_spawn_true_exits_cleanly() {
        let mut session = PtySession::spawn("/bin/true", Geometry::default()).unwrap();
        let _ = read_until_closed(&session, Duration::from_secs(5));
        assert_eq!(session.wait().unwrap(), 0);
        assert_eq!(session.try_wait().unwrap(), Some(0));
    }

    #[test]
    fn test_spawn_missing_program() {
        let mut session =
            PtySession::spawn("/nonexistent/program", Geometry::default()).unwrap();
        assert_eq!(session.wait().unwrap(), LAUNCH_FAILURE);
    }

    #[test]
    fn test_spawn_rejects_nul_in_path() {
        let program = OsStr::from_bytes(b"bad\0path");
        match PtySession::spawn(program, Geometry::default()) {
            Err(Error::InvalidProgram(_)) => {},
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Spawned a program with a NUL in its path"),
        }
    }

    #[test]
    fn test_drop_reaps_child() {
        let session = PtySession::spawn("/bin/cat", Geometry::default()).unwrap();
        let proc_entry = format!("/proc/{}", session.pid());
        assert!(Path::new(&proc_entry).exists());

        drop(session);
        assert!(!Path::new(&proc_entry).exists(), "Child left behind after drop");
    }

    #[test]
    fn test_terminate_hung_up_child() {
        let mut session = PtySession::spawn("/bin/cat", Geometry::default()).unwrap();
        let code = session.terminate(Duration::from_secs(5)).unwrap();
        assert_eq!(code, 128 + Signal::SIGHUP as i32);
    }

    #[test]
    fn test_terminate_kills_child_ignoring_hangup() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("stubborn.sh");
        fs::write(
            &script,
            "#!/bin/sh\ntrap '' HUP\necho ready\nwhile :; do sleep 1; done\n",
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut session = PtySession::spawn(&script, Geometry::default()).unwrap();

        // Wait for the trap to be in place
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut output = Vec::new();
        let mut buf = [0u8; 256];
        while Instant::now() < deadline && !String::from_utf8_lossy(&output).contains("ready") {
            match session.read(&mut buf).unwrap() {
                Some(n) => output.extend_from_slice(&buf[..n]),
                None => break,
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(String::from_utf8_lossy(&output).contains("ready"));

        let start = Instant::now();
        let code = session.terminate(Duration::from_millis(200)).unwrap();
        assert_eq!(code, 128 + Signal::SIGKILL as i32);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_write_read_cat() {
        let mut session = PtySession::spawn("/bin/cat", Geometry::default()).unwrap();
        session.write_all(b"ping\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut output = Vec::new();
        let mut buf = [0u8; 256];
        while Instant::now() < deadline && !String::from_utf8_lossy(&output).contains("ping") {
            match session.read(&mut buf).unwrap() {
                Some(n) => output.extend_from_slice(&buf[..n]),
                None => break,
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(
            String::from_utf8_lossy(&output).contains("ping"),
            "Unexpected output: {:?}",
            String::from_utf8_lossy(&output)
        );

        session.signal(Signal::SIGKILL).unwrap();
        let _ = session.wait();
    }
}
