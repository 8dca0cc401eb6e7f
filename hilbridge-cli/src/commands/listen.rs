//! Waiting for the instrument to report back.

use anyhow::Result;
use console::style;
use hilbridge::{ProtocolFamily, TransportResult, await_response};
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError};

/// Accept one connection on the family's receive port and print what the
/// instrument sends.
pub(crate) fn cmd_listen(
    cli: &Cli,
    config: &Config,
    family: ProtocolFamily,
    timeout_secs: u64,
) -> Result<()> {
    let endpoints = config.endpoints(family, cli.host.as_deref(), None);
    if !cli.quiet {
        eprintln!(
            "{} Listening on {} for {}s",
            style("⏳").yellow(),
            style(&endpoints.receive).cyan(),
            timeout_secs
        );
    }

    match await_response(&endpoints.receive, Duration::from_secs(timeout_secs)) {
        TransportResult::Ok(text) => {
            println!("{text}");
            Ok(())
        },
        other => Err(CliError::Instrument(other.to_string()).into()),
    }
}
