//! Dry-run encoding of a session.

use anyhow::Result;
use hilbridge::encode;
use log::debug;
use std::path::Path;

use crate::session_file::SessionFile;

/// Print the wire message a session would send.
pub(crate) fn cmd_encode(session: &Path) -> Result<()> {
    let file = SessionFile::load(session)?;
    file.base_config.validate()?;

    let message = encode(&file.base_config, &file.payload()?)?;
    debug!("Encoded {} bytes", message.as_str().len());

    println!("{}", message.as_str().trim_end_matches('\n'));
    Ok(())
}
