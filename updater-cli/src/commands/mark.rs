//! `updater mark <verb> <file>...`

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use updater_core::{Action, FileName};

use crate::session::Session;
use crate::MarkVerb;

/// Arguments for `updater mark`.
#[derive(Args, Debug)]
pub struct MarkArgs {
    /// install | update | uninstall | upload | remove | keep
    pub verb: MarkVerb,

    /// Files to mark, relative to the installation root.
    #[arg(required = true)]
    pub files: Vec<String>,
}

enum Outcome {
    Marked(Action),
    Unknown,
    Refused(Vec<Action>),
}

impl MarkArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let session = Session::open(root)?;
        let names: Vec<FileName> = self.files.iter().map(|f| FileName::from(f.as_str())).collect();
        let candidates = self.verb.candidates();

        let outcomes = session
            .block_on(session.executor().update(move |files| {
                names
                    .into_iter()
                    .map(|name| {
                        let outcome = if !files.contains(&name) {
                            Outcome::Unknown
                        } else if files.set_first_valid_action(&name, candidates) {
                            Outcome::Marked(files.get(&name).map(|r| r.action()).unwrap_or_default())
                        } else {
                            Outcome::Refused(files.valid_actions(&name))
                        };
                        (name, outcome)
                    })
                    .collect::<Vec<_>>()
            }))
            .context("failed to update actions")?;
        session.save()?;
        session.close()?;

        let mut refused = 0;
        for (name, outcome) in &outcomes {
            match outcome {
                Outcome::Marked(action) => {
                    println!("{} {name}: {}", "✓".green(), action.label());
                }
                Outcome::Unknown => {
                    refused += 1;
                    println!("{} {name}: not tracked (run `updater status`)", "✗".red());
                }
                Outcome::Refused(valid) => {
                    refused += 1;
                    let valid: Vec<&str> = valid.iter().map(|a| a.key()).collect();
                    println!(
                        "{} {name}: cannot {}; valid: {}",
                        "✗".red(),
                        self.verb,
                        valid.join(", ")
                    );
                }
            }
        }
        if refused > 0 {
            bail!("{refused} file(s) could not be marked");
        }
        Ok(())
    }
}
