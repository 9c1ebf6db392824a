//! `updater check`: dependency problems in the pending batch.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use updater_sync::{resolve, Resolution};

use crate::session::Session;

/// Arguments for `updater check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Skip contacting update sites; check against the last known state.
    #[arg(long)]
    pub offline: bool,
}

impl CheckArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let session = Session::open(root)?;
        if !self.offline {
            session.refresh()?;
        }
        let mut files = session
            .block_on(session.executor().snapshot())
            .context("failed to read collection")?;
        session.close()?;

        let for_upload = files.has_upload_or_remove();
        let implicated = files.dependencies(for_upload);
        match resolve(&mut files, for_upload) {
            Resolution::Resolved { added } => {
                for name in &added {
                    let by: Vec<&str> = implicated
                        .required_by(name)
                        .map(|set| set.iter().map(|n| n.as_str()).collect())
                        .unwrap_or_default();
                    println!(
                        "{} {name} would be added (required by {})",
                        "+".cyan(),
                        by.join(", ")
                    );
                }
            }
            conflicts => {
                for line in conflicts.diagnostic().unwrap_or_default().lines() {
                    println!("{} {line}", "✗".red());
                }
                bail!("pending changes have unresolvable dependency conflicts");
            }
        }

        match files.check_consistency() {
            None => {
                println!("{} pending changes are consistent", "✓".green());
                Ok(())
            }
            Some(diagnostic) => {
                for line in diagnostic.lines() {
                    println!("{} {line}", "✗".red());
                }
                bail!("pending changes are inconsistent")
            }
        }
    }
}
