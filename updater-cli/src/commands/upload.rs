//! `updater upload`: publish pending uploads and removals.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use updater_core::SiteName;
use updater_sync::{checksummer, SyncError};
use updater_worker::WorkerError;

use crate::progress::TermProgress;
use crate::session::Session;

/// Arguments for `updater upload`.
#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Upload to this site only. Defaults to every site with pending changes.
    #[arg(long)]
    pub site: Option<String>,
}

impl UploadArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let session = Session::open(root)?;
        // Local only. The site timestamp must stay as last seen for the
        // SiteChanged check.
        session
            .block_on(session.executor().submit("refresh-local", |files, _| {
                checksummer::update_from_local(files, None)
            }))
            .context("failed to refresh local files")?
            .context("failed to refresh local files")?;

        let sites: Vec<SiteName> = match self.site {
            Some(site) => vec![SiteName::from(site)],
            None => session
                .block_on(session.executor().update(|files| {
                    if files.has_upload_or_remove() {
                        files.site_names_to_upload().into_iter().collect()
                    } else {
                        Vec::new()
                    }
                }))
                .context("failed to read collection")?,
        };
        if sites.is_empty() {
            session.close()?;
            println!("✓ nothing to upload");
            return Ok(());
        }

        let mut failed = 0;
        for site in sites {
            let result = session.run_cancelable(
                session
                    .executor()
                    .upload(site.clone(), TermProgress::boxed()),
            );
            match result {
                Ok(report) => {
                    for name in &report.uploaded {
                        println!("  {}  {name}", "↑".green());
                    }
                    for name in &report.removed {
                        println!("  {}  {name}", "✗".red());
                    }
                    println!(
                        "✓ '{site}' published ({} uploaded, {} removed)",
                        report.uploaded.len(),
                        report.removed.len()
                    );
                }
                Err(WorkerError::Sync(SyncError::SiteChanged { .. })) => {
                    failed += 1;
                    println!(
                        "{} '{site}' changed since the last refresh; run `updater refresh` and retry",
                        "✗".red()
                    );
                }
                Err(WorkerError::Sync(SyncError::SiteLocked { .. })) => {
                    failed += 1;
                    println!("{} '{site}' is busy with another upload; retry later", "✗".red());
                }
                Err(WorkerError::Sync(SyncError::Canceled)) => {
                    session.close()?;
                    bail!("upload to '{site}' canceled; the site is unchanged");
                }
                Err(e) => {
                    failed += 1;
                    println!("{} '{site}': {e}", "✗".red());
                }
            }
        }
        session.close()?;
        if failed > 0 {
            bail!("{failed} site(s) were not updated");
        }
        Ok(())
    }
}
