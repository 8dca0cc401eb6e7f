//! hilbridge CLI - Drive hardware-in-the-loop UART/I2C tests over a TCP test instrument.
//!
//! ## Features
//!
//! - Write session templates for every UART and I2C test case
//! - Dry-run encoding of the wire message
//! - Single-response and streaming test runs with classified output
//! - Listening for results reported back by the instrument
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use hilbridge::ProtocolFamily;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod session_file;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if spinners and colors should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// hilbridge - Drive hardware-in-the-loop protocol tests over a TCP test instrument.
///
/// Environment variables:
///   HILBRIDGE_HOST   - Instrument host (default: 127.0.0.1)
///   HILBRIDGE_PORT   - Instrument send port (default: per protocol family)
///   HILBRIDGE_CONFIG - Path to a configuration file
#[derive(Parser)]
#[command(name = "hilbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Instrument host.
    #[arg(long, global = true, env = "HILBRIDGE_HOST")]
    host: Option<String>,

    /// Instrument send port (overrides the protocol family default).
    #[arg(short, long, global = true, env = "HILBRIDGE_PORT")]
    port: Option<u16>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH", env = "HILBRIDGE_CONFIG")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Protocol family selector.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub(crate) enum Family {
    /// UART tests.
    Uart,
    /// I2C tests.
    I2c,
}

impl From<Family> for ProtocolFamily {
    fn from(family: Family) -> Self {
        match family {
            Family::Uart => ProtocolFamily::Uart,
            Family::I2c => ProtocolFamily::I2c,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a session template.
    Init {
        /// Protocol family.
        #[arg(value_enum)]
        family: Family,

        /// Output path of the session file.
        path: PathBuf,

        /// Test case name, e.g. "LOOPBACK TEST".
        #[arg(long)]
        test: Option<String>,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Print the wire message for a session without sending it.
    Encode {
        /// Path to the session file.
        session: PathBuf,
    },

    /// Send a session to the instrument and classify the response.
    Run {
        /// Path to the session file.
        session: PathBuf,

        /// Output results as JSON to stdout.
        #[arg(long)]
        json: bool,

        /// Response timeout in seconds (overrides configuration).
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,
    },

    /// Wait for the instrument to connect back with a result.
    Listen {
        /// Protocol family.
        #[arg(value_enum)]
        family: Family,

        /// How long to wait, in seconds.
        #[arg(long, value_name = "SECS", default_value = "30")]
        timeout_secs: u64,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// CLI errors that map to specific exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid session or configuration.
    #[error("{0}")]
    Config(String),
    /// The instrument could not be reached or did not answer.
    #[error("{0}")]
    Instrument(String),
    /// Interrupted by the user.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 3,
            Self::Instrument(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Exit code for an error returned by a command.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(cli) = err.downcast_ref::<CliError>() {
        return cli.exit_code();
    }
    match err.downcast_ref::<hilbridge::Error>() {
        Some(hilbridge::Error::Validation(_) | hilbridge::Error::Config(_)) => 3,
        Some(hilbridge::Error::ConnectionFailed(_) | hilbridge::Error::Timeout(_)) => 4,
        Some(hilbridge::Error::Cancelled) => 130,
        _ => 1,
    }
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "hilbridge v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code_for(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Init {
            family,
            path,
            test,
            force,
        } => commands::init::cmd_init(cli, (*family).into(), path, test.as_deref(), *force),
        Commands::Encode { session } => commands::encode::cmd_encode(session),
        Commands::Run {
            session,
            json,
            timeout_secs,
        } => commands::run::cmd_run(cli, &config, session, *json, *timeout_secs),
        Commands::Listen {
            family,
            timeout_secs,
        } => commands::listen::cmd_listen(cli, &config, (*family).into(), *timeout_secs),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}
