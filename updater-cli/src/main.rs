//! Updater: keep a local installation in sync with its update sites.
//!
//! # Usage
//!
//! ```text
//! updater [--root <dir>] status [--json] [--changes]
//! updater refresh
//! updater mark install|update|uninstall|upload|remove|keep <file>...
//! updater check
//! updater apply [--dry-run]
//! updater upload [--site <name>]
//! updater update <file>
//! updater site add <name> <url> [--upload-dir <dir>]
//! updater site list
//! updater site init <name>
//! updater add-to-site <file> <site>
//! ```

mod commands;
mod progress;
mod session;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    add_to_site::AddToSiteArgs, apply::ApplyArgs, check::CheckArgs, mark::MarkArgs,
    refresh::RefreshArgs, site::SiteCommand, status::StatusArgs, update::UpdateArgs,
    upload::UploadArgs,
};
use updater_core::Action;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "updater",
    version,
    about = "Install, update and publish files from update sites",
    long_about = None,
)]
struct Cli {
    /// Installation root holding the tracked files.
    #[arg(long, global = true, env = "UPDATER_ROOT", default_value = ".")]
    root: PathBuf,

    /// Log as JSON lines instead of plain text.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Refresh and list every tracked file with its status and pending action.
    Status(StatusArgs),

    /// Re-read update sites and local files without listing them.
    Refresh(RefreshArgs),

    /// Set the pending action of one or more files.
    Mark(MarkArgs),

    /// Report dependency problems in the pending action set.
    Check(CheckArgs),

    /// Install, update and uninstall the marked files.
    Apply(ApplyArgs),

    /// Publish the marked uploads and removals.
    Upload(UploadArgs),

    /// Update a single file, leaving other pending actions alone.
    Update(UpdateArgs),

    /// Manage update sites.
    Site {
        #[command(subcommand)]
        command: SiteCommand,
    },

    /// Assign a local-only file to an update site.
    AddToSite(AddToSiteArgs),
}

// ---------------------------------------------------------------------------
// Mark verbs, parsed from CLI strings
// ---------------------------------------------------------------------------

/// What `updater mark` should do to each file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkVerb {
    Install,
    Update,
    Uninstall,
    Upload,
    Remove,
    Keep,
}

impl MarkVerb {
    /// Actions to try in order. `install` falls back to `update` so that
    /// one verb covers missing and outdated files alike.
    pub fn candidates(self) -> &'static [Action] {
        match self {
            MarkVerb::Install => &[Action::Install, Action::Update],
            MarkVerb::Update => &[Action::Update],
            MarkVerb::Uninstall => &[Action::Uninstall],
            MarkVerb::Upload => &[Action::Upload],
            MarkVerb::Remove => &[Action::Remove],
            MarkVerb::Keep => &[Action::None],
        }
    }
}

impl FromStr for MarkVerb {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "install" => Ok(Self::Install),
            "update" => Ok(Self::Update),
            "uninstall" => Ok(Self::Uninstall),
            "upload" => Ok(Self::Upload),
            "remove" => Ok(Self::Remove),
            "keep" | "none" => Ok(Self::Keep),
            other => Err(format!(
                "unknown action '{other}'; expected: install, update, uninstall, upload, remove, keep"
            )),
        }
    }
}

impl fmt::Display for MarkVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            MarkVerb::Install => "install",
            MarkVerb::Update => "update",
            MarkVerb::Uninstall => "uninstall",
            MarkVerb::Upload => "upload",
            MarkVerb::Remove => "remove",
            MarkVerb::Keep => "keep",
        };
        f.write_str(verb)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    updater_worker::init_tracing(cli.log_json);
    let root = cli.root;
    match cli.command {
        Commands::Status(args) => args.run(&root),
        Commands::Refresh(args) => args.run(&root),
        Commands::Mark(args) => args.run(&root),
        Commands::Check(args) => args.run(&root),
        Commands::Apply(args) => args.run(&root),
        Commands::Upload(args) => args.run(&root),
        Commands::Update(args) => args.run(&root),
        Commands::Site { command } => commands::site::run(command, &root),
        Commands::AddToSite(args) => args.run(&root),
    }
}
