//! One CLI invocation's view of the installation: the loaded collection, the
//! executor that owns it, and the runtime driving both.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tokio::runtime::Runtime;

use updater_core::manifest;
use updater_sync::{apply_deferred, DirRemote, RefreshReport};
use updater_worker::{Executor, WorkerError};

pub struct Session {
    runtime: Runtime,
    executor: Executor,
}

impl Session {
    /// Load the manifest under `root`, replay deferred file operations left
    /// by an earlier run, and start the executor.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            bail!("installation root {} is not a directory", root.display());
        }
        match apply_deferred(root) {
            Ok(0) => {}
            Ok(n) => tracing::info!("completed {n} deferred file operation(s)"),
            Err(e) => eprintln!("{} {e:#}", "warning:".yellow()),
        }
        let files = manifest::load_at(root)
            .with_context(|| format!("failed to load manifest under {}", root.display()))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        let executor = {
            let _guard = runtime.enter();
            Executor::spawn(files, Arc::new(DirRemote))
        };
        Ok(Self { runtime, executor })
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Drive a job to completion, canceling it on Ctrl-C. The job decides
    /// how far it gets before it notices.
    pub fn run_cancelable<T, F>(&self, job: F) -> Result<T, WorkerError>
    where
        F: Future<Output = Result<T, WorkerError>>,
    {
        self.runtime.block_on(async {
            tokio::pin!(job);
            let mut interrupted = false;
            loop {
                tokio::select! {
                    result = &mut job => return result,
                    signal = tokio::signal::ctrl_c(), if !interrupted => {
                        if signal.is_ok() {
                            eprintln!("{}", "interrupt received, stopping after the current file".yellow());
                            self.executor.cancel();
                        }
                        interrupted = true;
                    }
                }
            }
        })
    }

    /// Refresh from sites and disk, report unreachable sites, and persist.
    pub fn refresh(&self) -> Result<RefreshReport> {
        let report = self
            .block_on(self.executor.refresh())
            .context("refresh failed")?;
        for (site, reason) in &report.unreachable {
            eprintln!(
                "{} update site '{site}' unreachable ({reason}); using last known data",
                "warning:".yellow()
            );
        }
        self.save()?;
        Ok(report)
    }

    pub fn save(&self) -> Result<()> {
        self.block_on(self.executor.save())
            .context("failed to save manifest")
    }

    /// Wait for queued jobs and stop the executor.
    pub fn close(self) -> Result<()> {
        let Self { runtime, executor } = self;
        runtime
            .block_on(executor.shutdown())
            .context("executor did not shut down cleanly")?;
        Ok(())
    }
}
