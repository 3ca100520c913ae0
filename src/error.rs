//! Error types for terminal and PTY operations

use std::io;
use std::os::unix::io::RawFd;

use thiserror::Error;

/// Terminal control error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read terminal attributes: {0}")]
    GetAttr(#[source] nix::Error),

    #[error("Failed to set terminal attributes: {0}")]
    SetAttr(#[source] nix::Error),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] nix::Error),

    #[error("Failed to poll descriptors: {0}")]
    Poll(#[source] nix::Error),

    #[error("Descriptor {0} is not open")]
    InvalidDescriptor(RawFd),

    #[error("Failed to open PTY master: {0}")]
    OpenMaster(#[source] nix::Error),

    #[error("Failed to grant PTY access: {0}")]
    GrantPty(#[source] nix::Error),

    #[error("Failed to unlock PTY: {0}")]
    UnlockPty(#[source] nix::Error),

    #[error("Failed to get PTY slave name: {0}")]
    PtsName(#[source] nix::Error),

    #[error("Failed to open PTY slave: {0}")]
    OpenSlave(#[source] io::Error),

    #[error("Failed to set non-blocking mode: {0}")]
    SetNonBlocking(#[source] nix::Error),

    #[error("Invalid program path: {0}")]
    InvalidProgram(#[source] std::ffi::NulError),

    #[error("Failed to fork: {0}")]
    Fork(#[source] nix::Error),

    #[error("Failed to read from PTY: {0}")]
    Read(#[source] nix::Error),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] nix::Error),

    #[error("Failed to signal child: {0}")]
    Kill(#[source] nix::Error),

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] nix::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for terminal control operations
pub type Result<T> = std::result::Result<T, Error>;
