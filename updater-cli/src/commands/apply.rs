//! `updater apply`: run the pending install/update/uninstall batch.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use updater_sync::checksummer::read_only_files;
use updater_sync::{resolve, InstallReport, Resolution, SyncError};
use updater_worker::WorkerError;

use crate::progress::TermProgress;
use crate::session::Session;

/// Arguments for `updater apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Show what would change without touching any file.
    #[arg(long)]
    pub dry_run: bool,
}

impl ApplyArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let session = Session::open(root)?;
        session.refresh()?;
        let mut preview = session
            .block_on(session.executor().snapshot())
            .context("failed to read collection")?;

        for name in read_only_files(&preview) {
            eprintln!(
                "{} {name} is read-only and may not be replaceable",
                "warning:".yellow()
            );
        }

        let prefix = if self.dry_run { "[dry-run] " } else { "" };
        match resolve(&mut preview, false) {
            Resolution::Resolved { added } => {
                for name in &added {
                    println!("{prefix}{} {name} (dependency)", "+".cyan());
                }
            }
            conflicts => {
                session.close()?;
                for line in conflicts.diagnostic().unwrap_or_default().lines() {
                    println!("{} {line}", "✗".red());
                }
                bail!("nothing was changed: pending actions conflict");
            }
        }

        let summary = preview.summary();
        if preview.to_install().next().is_none() && preview.to_uninstall().next().is_none() {
            session.close()?;
            println!("{prefix}✓ nothing to install or uninstall");
            return Ok(());
        }
        println!("{prefix}{} {summary}", "pending:".bold());
        if self.dry_run {
            for record in preview.changes().filter(|r| r.action().is_local()) {
                println!("  ~  {} ({})", record.name, record.action().label());
            }
            session.close()?;
            return Ok(());
        }

        let result = session.run_cancelable(session.executor().apply(TermProgress::boxed()));
        let has_uploads = session
            .block_on(session.executor().update(|files| files.has_upload_or_remove()))
            .unwrap_or(false);
        session.close()?;

        match result {
            Ok(report) => {
                print_report(&report);
                if has_uploads {
                    println!("Uploads are still pending; run `updater upload`.");
                }
                if !report.is_clean() {
                    bail!("{} file(s) failed", report.failures.len());
                }
                Ok(())
            }
            Err(WorkerError::Sync(SyncError::Canceled)) => {
                bail!("canceled; files finished before the interrupt keep their new state")
            }
            Err(e) => Err(e).context("apply failed"),
        }
    }
}

fn print_report(report: &InstallReport) {
    for name in &report.installed {
        println!("  {}  {name}", "✎".green());
    }
    for name in &report.uninstalled {
        println!("  {}  {name}", "✗".red());
    }
    for name in &report.deferred {
        println!("  {}  {name} (completes on next start)", "…".yellow());
    }
    for (name, error) in &report.failures {
        println!("  {}  {name}: {error}", "!".red().bold());
    }
    println!(
        "✓ {} installed, {} uninstalled",
        report.installed.len(),
        report.uninstalled.len()
    );
}
