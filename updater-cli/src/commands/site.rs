//! `updater site add|list|init`

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use updater_core::{manifest, SiteName, UpdateSite, UploadConfig};

use crate::session::Session;

/// Manage the update sites of this installation.
#[derive(Subcommand, Debug)]
pub enum SiteCommand {
    /// List configured update sites.
    List,

    /// Add (or replace) an update site.
    Add(AddArgs),

    /// Publish an empty index on a new, uploadable site.
    Init(InitArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Site name (e.g. "main", "plugins").
    pub name: String,

    /// Directory or `file://` URL the site is served from.
    pub url: String,

    /// Make the site uploadable, writing to this directory.
    #[arg(long, value_name = "DIR")]
    pub upload_dir: Option<String>,

    /// Make the site uploadable, writing back to its URL.
    #[arg(long, conflicts_with = "upload_dir")]
    pub uploadable: bool,

    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Name of a configured, uploadable site.
    pub name: String,
}

pub fn run(cmd: SiteCommand, root: &Path) -> Result<()> {
    match cmd {
        SiteCommand::List => list(root),
        SiteCommand::Add(args) => add(args, root),
        SiteCommand::Init(args) => init(args, root),
    }
}

#[derive(Tabled)]
struct SiteRow {
    #[tabled(rename = "site")]
    name: String,
    #[tabled(rename = "url")]
    url: String,
    #[tabled(rename = "uploadable")]
    uploadable: String,
    #[tabled(rename = "last index")]
    timestamp: String,
}

fn list(root: &Path) -> Result<()> {
    let files = manifest::load_at(root)
        .with_context(|| format!("failed to load manifest under {}", root.display()))?;

    let rows: Vec<SiteRow> = files
        .sites()
        .map(|site| SiteRow {
            name: site.name.to_string(),
            url: site.url.clone(),
            uploadable: if site.is_uploadable() { "yes" } else { "no" }.to_string(),
            timestamp: site
                .timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string()),
        })
        .collect();
    if rows.is_empty() {
        println!("No update sites configured.");
        println!("Run: updater site add <name> <url>");
        return Ok(());
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn add(args: AddArgs, root: &Path) -> Result<()> {
    let session = Session::open(root)?;
    let mut site = UpdateSite::new(args.name.as_str(), args.url.clone());
    site.description = args.description;
    if args.uploadable || args.upload_dir.is_some() {
        site = site.with_upload(UploadConfig {
            host: None,
            directory: args.upload_dir,
        });
    }

    let replaced = session
        .block_on(session.executor().update(move |files| files.add_site(site)))
        .context("failed to add site")?;
    session.save()?;
    session.close()?;

    if replaced.is_some() {
        println!("✓ site '{}' replaced ({})", args.name, args.url);
    } else {
        println!("✓ site '{}' added ({})", args.name, args.url);
    }
    println!("Run `updater status` to fetch its index.");
    Ok(())
}

fn init(args: InitArgs, root: &Path) -> Result<()> {
    let session = Session::open(root)?;
    let site = SiteName::from(args.name);
    let result = session.block_on(session.executor().initialize_site(site.clone()));
    session.close()?;

    match result.with_context(|| format!("failed to initialize '{site}'"))? {
        true => println!("✓ '{site}' initialized with an empty index"),
        false => {
            println!(
                "{} '{site}' already has an index; adopted its timestamp",
                "note:".cyan()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn add_persists_an_uploadable_site() {
        let root = TempDir::new().unwrap();
        add(
            AddArgs {
                name: "main".into(),
                url: "/srv/main".into(),
                upload_dir: None,
                uploadable: true,
                description: None,
            },
            root.path(),
        )
        .unwrap();

        let files = manifest::load_at(root.path()).unwrap();
        let site = files.site(&SiteName::from("main")).unwrap();
        assert_eq!(site.url, "/srv/main");
        assert!(site.is_uploadable());
    }

    #[test]
    fn init_rejects_unknown_site() {
        let root = TempDir::new().unwrap();
        let err = init(InitArgs { name: "ghost".into() }, root.path()).unwrap_err();
        assert!(format!("{err:#}").contains("ghost"));
    }
}
