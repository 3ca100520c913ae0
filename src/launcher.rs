//! Session launcher
//!
//! Replaces the current process image with the session program. Meant to
//! run in the child right after the fork, on the slave side of a PTY.

use std::ffi::{CStr, CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::ptr;

use nix::libc;

/// Exit status of a child whose program could not be executed
pub const LAUNCH_FAILURE: i32 = 127;

/// Execute `path`, looked up through `PATH` when it has no slash
///
/// The program receives only its own name as `argv[0]`. This never returns:
/// either the program is now running in this process, or the process exits
/// with [`LAUNCH_FAILURE`].
pub fn launch<P: AsRef<OsStr>>(path: P) -> ! {
    match CString::new(path.as_ref().as_bytes()) {
        Ok(path) => launch_cstr(&path),
        Err(_) => exit_child(LAUNCH_FAILURE),
    }
}

/// [`launch`] for a path that is already a C string
///
/// Does not allocate, so it is safe to call in a child forked from a
/// multithreaded parent.
pub fn launch_cstr(path: &CStr) -> ! {
    let argv: [*const libc::c_char; 2] = [path.as_ptr(), ptr::null()];

    // SAFETY: argv is a null-terminated array of valid C strings
    unsafe {
        libc::execvp(path.as_ptr(), argv.as_ptr());
    }

    // execvp only returns on error
    exit_child(LAUNCH_FAILURE)
}

/// Terminate a forked child without running atexit handlers or flushing
/// stdio buffers inherited from the parent
pub(crate) fn exit_child(status: i32) -> ! {
    // SAFETY: _exit is async-signal-safe and touches no process state
    unsafe { libc::_exit(status) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};

    /// Run `launch` in a forked child and return how the child ended
    fn launch_in_child(path: &str) -> WaitStatus {
        let path = CString::new(path).unwrap();
        match unsafe { fork() }.expect("Failed to fork") {
            ForkResult::Child => launch_cstr(&path),
            ForkResult::Parent { child } => waitpid(child, None).expect("Failed to wait"),
        }
    }

    #[test]
    fn test_launch_missing_program_exits_nonzero() {
        match launch_in_child("/nonexistent/definitely-not-here") {
            WaitStatus::Exited(_, code) => assert_eq!(code, LAUNCH_FAILURE),
            other => panic!("Unexpected status: {:?}", other),
        }
    }

    #[test]
    fn test_launch_runs_program() {
        match launch_in_child("/bin/true") {
            WaitStatus::Exited(_, code) => assert_eq!(code, 0),
            other => panic!("Unexpected status: {:?}", other),
        }
    }

    #[test]
    fn test_launch_reports_program_status() {
        match launch_in_child("false") {
            WaitStatus::Exited(_, code) => assert_eq!(code, 1),
            other => panic!("Unexpected status: {:?}", other),
        }
    }

    #[test]
    fn test_launch_by_os_str() {
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => launch(OsStr::new("/nonexistent/by-os-str")),
            ForkResult::Parent { child } => match waitpid(child, None).unwrap() {
                WaitStatus::Exited(_, code) => assert_eq!(code, LAUNCH_FAILURE),
                other => panic!("Unexpected status: {:?}", other),
            },
        }
    }
}
