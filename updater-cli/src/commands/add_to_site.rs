//! `updater add-to-site <file> <site>`

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use updater_core::{Action, FileName, SiteName};
use updater_sync::{checksummer, SyncError};

use crate::session::Session;

/// Arguments for `updater add-to-site`.
#[derive(Args, Debug)]
pub struct AddToSiteArgs {
    /// Local-only file, relative to the installation root.
    pub file: String,

    /// Update site that should publish it.
    pub site: String,
}

impl AddToSiteArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let session = Session::open(root)?;
        let name = FileName::from(self.file);
        let site = SiteName::from(self.site);

        let marked = {
            let (name, site) = (name.clone(), site.clone());
            session.block_on(session.executor().submit("add-to-site", move |files, _| {
                checksummer::update_from_local(files, None)?;
                files.add_to_site(&name, &site)?;
                Ok::<_, SyncError>(files.set_action(&name, Action::Upload))
            }))
        };
        let marked = marked
            .context("failed to reach the executor")?
            .with_context(|| format!("cannot add '{name}' to '{site}'"))?;
        session.save()?;
        session.close()?;

        if marked {
            println!("✓ '{name}' now belongs to '{site}' and is marked for upload");
        } else {
            println!("✓ '{name}' now belongs to '{site}'");
        }
        Ok(())
    }
}
