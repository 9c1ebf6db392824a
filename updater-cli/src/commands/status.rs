//! `updater status`: what is installed, what is pending.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use updater_core::{human_size, Action, ChangeSummary, Collection, FileRecord, Status};

use crate::session::Session;

/// Arguments for `updater status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only list files with a pending action.
    #[arg(long)]
    pub changes: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let session = Session::open(root)?;
        session.refresh()?;
        let files = session
            .block_on(session.executor().snapshot())
            .context("failed to read collection")?;
        session.close()?;

        let records: Vec<&FileRecord> = files
            .iter()
            .filter(|r| !self.changes || r.action() != Action::None)
            .collect();
        if self.json {
            return print_json(&files, &records);
        }
        print_table(&files, &records);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusReportJson<'a> {
    summary: SummaryJson,
    files: Vec<FileStatusJson<'a>>,
}

#[derive(Serialize)]
struct SummaryJson {
    install: usize,
    uninstall: usize,
    upload: usize,
    remove: usize,
    implicated: usize,
    bytes_to_download: u64,
    bytes_to_upload: u64,
}

impl From<ChangeSummary> for SummaryJson {
    fn from(s: ChangeSummary) -> Self {
        Self {
            install: s.install,
            uninstall: s.uninstall,
            upload: s.upload,
            remove: s.remove,
            implicated: s.implicated,
            bytes_to_download: s.bytes_to_download,
            bytes_to_upload: s.bytes_to_upload,
        }
    }
}

#[derive(Serialize)]
struct FileStatusJson<'a> {
    name: &'a str,
    status: &'static str,
    action: &'static str,
    site: Option<String>,
    filesize: u64,
    valid_actions: Vec<&'static str>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "file")]
    file: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "action")]
    action: String,
    #[tabled(rename = "site")]
    site: String,
    #[tabled(rename = "size")]
    size: String,
}

fn print_json(files: &Collection, records: &[&FileRecord]) -> Result<()> {
    let payload = StatusReportJson {
        summary: files.summary().into(),
        files: records
            .iter()
            .map(|r| FileStatusJson {
                name: r.name.as_str(),
                status: r.status().key(),
                action: r.action().key(),
                site: r.site.as_ref().map(ToString::to_string),
                filesize: r.filesize,
                valid_actions: files
                    .valid_actions(&r.name)
                    .into_iter()
                    .map(Action::key)
                    .collect(),
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to encode status")?
    );
    Ok(())
}

fn print_table(files: &Collection, records: &[&FileRecord]) {
    if files.is_empty() {
        println!("No files tracked yet.");
        println!("Run: updater site add <name> <url>");
        return;
    }
    if records.is_empty() {
        println!("{}", "Nothing marked.".dimmed());
    } else {
        let rows: Vec<StatusTableRow> = records
            .iter()
            .map(|r| StatusTableRow {
                file: r.name.to_string(),
                status: status_cell(r.status()).to_string(),
                action: action_cell(r.action()).to_string(),
                site: r
                    .site
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "-".to_string()),
                size: human_size(r.download_size()),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    let summary = files.summary();
    if summary.is_empty() {
        println!("{}", summary.to_string().dimmed());
    } else {
        println!("{} {summary}", "pending:".bold());
    }
}

fn status_cell(status: Status) -> ColoredString {
    let label = status.label();
    match status {
        Status::Installed => label.green(),
        Status::Updateable => label.yellow(),
        Status::Modified => label.magenta(),
        Status::Obsolete => label.red(),
        Status::New | Status::LocalOnly => label.cyan(),
        Status::NotInstalled | Status::ObsoleteUninstalled => label.dimmed(),
    }
}

fn action_cell(action: Action) -> ColoredString {
    match action {
        Action::None => "".normal(),
        Action::Uninstall | Action::Remove => action.label().red().bold(),
        _ => action.label().green().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_json_copies_every_counter() {
        let summary = ChangeSummary {
            install: 2,
            uninstall: 1,
            upload: 3,
            remove: 0,
            implicated: 1,
            bytes_to_download: 2048,
            bytes_to_upload: 10,
        };
        let json = serde_json::to_value(SummaryJson::from(summary)).unwrap();
        assert_eq!(json["install"], 2);
        assert_eq!(json["bytes_to_download"], 2048);
        assert_eq!(json["implicated"], 1);
    }
}
