//! Session template generation.

use anyhow::Result;
use console::style;
use hilbridge::ProtocolFamily;
use std::path::Path;

use crate::Cli;
use crate::session_file::SessionFile;

/// Write a template session file for `family`.
pub(crate) fn cmd_init(
    cli: &Cli,
    family: ProtocolFamily,
    path: &Path,
    test: Option<&str>,
    force: bool,
) -> Result<()> {
    let session = SessionFile::template(family, test)?;
    session.save(path, force)?;

    if !cli.quiet {
        eprintln!(
            "{} Wrote {} session ({}) to {}",
            style("✓").green(),
            family,
            session.base_config.test_name(),
            style(path.display()).cyan()
        );
    }
    Ok(())
}
