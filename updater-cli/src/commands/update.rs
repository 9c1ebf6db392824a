//! `updater update <file>`: bring one file up to date on its own.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use updater_core::FileName;

use crate::progress::TermProgress;
use crate::session::Session;

/// Arguments for `updater update`.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// File to install or update, relative to the installation root.
    pub file: String,
}

impl UpdateArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let session = Session::open(root)?;
        session.refresh()?;
        let name = FileName::from(self.file);
        let result = session.run_cancelable(
            session
                .executor()
                .update_single(name.clone(), TermProgress::boxed()),
        );
        session.close()?;

        let report = result.with_context(|| format!("update of '{name}' failed"))?;
        if let Some((_, error)) = report.failures.first() {
            bail!("update of '{name}' failed: {error}");
        }
        if report.installed.is_empty() {
            println!("✓ '{name}' is already up to date");
        } else if report.deferred.contains(&name) {
            println!("✓ '{name}' staged; it is replaced on next start");
        } else {
            println!("✓ '{name}' updated");
        }
        Ok(())
    }
}
