//! mux-relay - run a program on a PTY attached to this terminal
//!
//! Puts the terminal in raw mode, runs the program on a fresh PTY sized like
//! the terminal, relays I/O until the program exits and then restores the
//! terminal.

use std::io;
use std::os::fd::BorrowedFd;
use std::path::PathBuf;
use std::process::ExitCode;

use mux_term::{
    enter_raw, query_controlling_terminal, PtySession, Relay, RelayConfig, ResizeLatch,
    TerminationLatch,
};
use nix::libc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments
#[derive(Default)]
struct Args {
    /// Program to run (overrides the config file)
    program: Option<String>,
    /// JSON config file
    config: Option<PathBuf>,
    /// Poll interval in milliseconds (overrides the config file)
    interval: Option<u32>,
    /// Show help
    help: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut argv = std::env::args().skip(1);

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "-p" | "--program" => {
                args.program = Some(argv.next().ok_or("--program needs a path")?);
            },
            "-c" | "--config" => {
                args.config = Some(argv.next().ok_or("--config needs a path")?.into());
            },
            "-t" | "--interval" => {
                let value = argv.next().ok_or("--interval needs a value")?;
                let ms = value
                    .parse()
                    .map_err(|_| format!("invalid interval: {}", value))?;
                args.interval = Some(ms);
            },
            "-h" | "--help" => args.help = true,
            other => return Err(format!("unknown argument: {}", other)),
        }
    }

    Ok(args)
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("mux-relay: {}", e);
            print_help();
            return ExitCode::FAILURE;
        },
    };

    if args.help {
        print_help();
        return ExitCode::SUCCESS;
    }

    let mut config = match &args.config {
        Some(path) => match RelayConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("mux-relay: {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            },
        },
        None => RelayConfig::default(),
    };
    if let Some(program) = args.program {
        config.program = program;
    }
    if let Some(interval) = args.interval {
        config.poll_interval_ms = interval;
    }

    match run(&config) {
        Ok(code) => {
            tracing::info!("Child exited with code: {}", code);
            ExitCode::from(code as u8)
        },
        Err(e) => {
            eprintln!("mux-relay: {}", e);
            ExitCode::FAILURE
        },
    }
}

fn run(config: &RelayConfig) -> mux_term::Result<i32> {
    let resize = ResizeLatch::install()?;
    let termination = TerminationLatch::install()?;

    let guard = enter_raw()?;

    let size = query_controlling_terminal();
    tracing::info!("Spawning {} ({}x{})", config.program, size.cols, size.rows);
    let session = PtySession::spawn(&config.program, size)?;

    // SAFETY: stdin stays open for the lifetime of the process
    let stdin = unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) };
    let result = Relay::new(stdin, io::stdout(), session, config)
        .with_resize(resize)
        .with_termination(termination)
        .run();

    // A failed restore is reported but must not keep us from exiting
    if let Err(e) = guard.restore() {
        eprintln!("mux-relay: failed to restore terminal: {}", e);
    }

    result
}

fn print_help() {
    println!("mux-relay - run a program on a PTY attached to this terminal");
    println!();
    println!("Usage: mux-relay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -p, --program <PATH>  Program to run (default: $SHELL or /bin/sh)");
    println!("  -c, --config <FILE>   JSON config file");
    println!("  -t, --interval <MS>   Poll interval in milliseconds (default: 100)");
    println!("  -h, --help            Show this help message");
}
