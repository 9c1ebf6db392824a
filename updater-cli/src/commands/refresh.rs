//! `updater refresh`: re-read update sites and local files.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::session::Session;

/// Arguments for `updater refresh`.
#[derive(Args, Debug)]
pub struct RefreshArgs {}

impl RefreshArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let session = Session::open(root)?;
        let report = session.refresh()?;
        session.close()?;

        for site in &report.refreshed {
            println!("{} {site}", "✓".green());
        }
        for (site, _) in &report.unreachable {
            println!("{} {site}", "✗".red());
        }
        if report.refreshed.is_empty() && report.unreachable.is_empty() {
            println!("No update sites configured; local files refreshed.");
        }
        Ok(())
    }
}
