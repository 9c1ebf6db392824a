use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use updater_core::{manifest, Collection, FileName, SiteName};
use updater_sync::{
    checksummer, pipeline, InstallReport, Progress, RefreshReport, Remote, SyncError,
    UploadReport,
};

use crate::error::WorkerError;

const QUEUE_DEPTH: usize = 64;

/// What a running job can reach besides the collection.
pub struct JobContext {
    pub remote: Arc<dyn Remote>,
    /// Fires when [`Executor::cancel`] is called any time after this job
    /// was submitted, whether it is still queued or already running.
    pub cancel: CancellationToken,
}

type Work = Box<dyn FnOnce(&mut Collection, &JobContext) + Send>;

struct Job {
    label: &'static str,
    work: Work,
    cancel: CancellationToken,
}

/// Owns a [`Collection`] and serializes every operation on it.
pub struct Executor {
    jobs: mpsc::Sender<Job>,
    busy: Arc<AtomicBool>,
    /// Parent of every job token handed out since the last cancel.
    generation: Mutex<CancellationToken>,
    processor: JoinHandle<Collection>,
}

impl Executor {
    /// Start the processor task. Must be called inside a tokio runtime.
    pub fn spawn(files: Collection, remote: Arc<dyn Remote>) -> Self {
        let (jobs, rx) = mpsc::channel::<Job>(QUEUE_DEPTH);
        let busy = Arc::new(AtomicBool::new(false));
        let processor = tokio::spawn(processor_task(files, remote, rx, busy.clone()));
        Self {
            jobs,
            busy,
            generation: Mutex::new(CancellationToken::new()),
            processor,
        }
    }

    /// Whether a job is running right now.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Cancel the running job and every job queued behind it. Batches stop
    /// between two files. Jobs submitted afterwards are not affected.
    pub fn cancel(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        generation.cancel();
        *generation = CancellationToken::new();
    }

    fn job_token(&self) -> CancellationToken {
        self.generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    /// Queue `work` and wait for its result.
    pub async fn submit<T, F>(&self, label: &'static str, work: F) -> Result<T, WorkerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Collection, &JobContext) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = Job {
            label,
            work: Box::new(move |files, ctx| {
                let _ = tx.send(work(files, ctx));
            }),
            cancel: self.job_token(),
        };
        self.jobs
            .send(job)
            .await
            .map_err(|_| WorkerError::ChannelClosed("job queue"))?;
        rx.await
            .map_err(|_| WorkerError::ChannelClosed("job response"))
    }

    /// Run a fallible job, flattening its error.
    async fn submit_sync<T, F>(&self, label: &'static str, work: F) -> Result<T, WorkerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Collection, &JobContext) -> Result<T, SyncError> + Send + 'static,
    {
        Ok(self.submit(label, work).await??)
    }

    /// Copy of the collection as it stands between jobs.
    pub async fn snapshot(&self) -> Result<Collection, WorkerError> {
        self.submit("snapshot", |files, _| files.clone()).await
    }

    /// Mutate the collection directly, e.g. to set actions.
    pub async fn update<T, F>(&self, work: F) -> Result<T, WorkerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Collection) -> T + Send + 'static,
    {
        self.submit("update", |files, _| work(files)).await
    }

    pub async fn refresh(&self) -> Result<RefreshReport, WorkerError> {
        self.submit_sync("refresh", |files, ctx| {
            checksummer::update_all(files, ctx.remote.as_ref())
        })
        .await
    }

    pub async fn save(&self) -> Result<(), WorkerError> {
        self.submit_sync("save", |files, _| {
            manifest::save_at(files).map_err(SyncError::ManifestWrite)
        })
        .await
    }

    pub async fn apply(
        &self,
        mut progress: Box<dyn Progress>,
    ) -> Result<InstallReport, WorkerError> {
        self.submit_sync("apply", move |files, ctx| {
            pipeline::apply_changes(files, ctx.remote.as_ref(), progress.as_mut(), &ctx.cancel)
        })
        .await
    }

    pub async fn upload(
        &self,
        site: SiteName,
        mut progress: Box<dyn Progress>,
    ) -> Result<UploadReport, WorkerError> {
        self.submit_sync("upload", move |files, ctx| {
            pipeline::upload_changes(
                files,
                ctx.remote.as_ref(),
                &site,
                progress.as_mut(),
                &ctx.cancel,
            )
        })
        .await
    }

    pub async fn update_single(
        &self,
        name: FileName,
        mut progress: Box<dyn Progress>,
    ) -> Result<InstallReport, WorkerError> {
        self.submit_sync("update-single", move |files, ctx| {
            pipeline::update_single(
                files,
                &name,
                ctx.remote.as_ref(),
                progress.as_mut(),
                &ctx.cancel,
            )
        })
        .await
    }

    pub async fn initialize_site(&self, site: SiteName) -> Result<bool, WorkerError> {
        self.submit_sync("initialize-site", move |files, ctx| {
            pipeline::initialize_site(files, ctx.remote.as_ref(), &site)
        })
        .await
    }

    /// Finish queued jobs, stop the processor and hand the collection back.
    pub async fn shutdown(self) -> Result<Collection, WorkerError> {
        drop(self.jobs);
        Ok(self.processor.await?)
    }
}

async fn processor_task(
    mut files: Collection,
    remote: Arc<dyn Remote>,
    mut rx: mpsc::Receiver<Job>,
    busy: Arc<AtomicBool>,
) -> Collection {
    while let Some(job) = rx.recv().await {
        busy.store(true, Ordering::SeqCst);
        let started = Instant::now();
        let label = job.label;
        let ctx = JobContext {
            remote: remote.clone(),
            cancel: job.cancel,
        };
        let root = files.root().to_path_buf();

        let result = tokio::task::spawn_blocking(move || {
            (job.work)(&mut files, &ctx);
            files
        })
        .await;

        files = match result {
            Ok(files) => files,
            Err(err) => {
                tracing::error!(job = label, "job failed: {err}; reloading manifest");
                manifest::load_at(&root).unwrap_or_else(|e| {
                    tracing::error!("manifest reload failed: {e}");
                    Collection::new(root)
                })
            }
        };
        busy.store(false, Ordering::SeqCst);
        tracing::debug!(job = label, elapsed_ms = started.elapsed().as_millis() as u64, "job done");
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use chrono::Utc;
    use tempfile::TempDir;
    use updater_core::{Action, RemoteEntry, SiteIndex, Status, UpdateSite};
    use updater_sync::checksum::hash_bytes;
    use updater_sync::transport::{DirRemote, DirSite, Transport};
    use updater_sync::NullProgress;

    fn executor(root: &std::path::Path) -> Executor {
        Executor::spawn(Collection::new(root), Arc::new(DirRemote))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn jobs_never_overlap() {
        let root = TempDir::new().unwrap();
        let executor = Arc::new(executor(root.path()));
        let running = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let executor = executor.clone();
            let running = running.clone();
            let overlap = overlap.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .update(move |_| {
                        if running.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlap.store(true, Ordering::SeqCst);
                        }
                        std::thread::sleep(Duration::from_millis(10));
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(!overlap.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn busy_while_job_runs_and_cancel_reaches_it() {
        let root = TempDir::new().unwrap();
        let executor = Arc::new(executor(root.path()));
        assert!(!executor.is_busy());

        let job = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .submit("wait-for-cancel", |_, ctx| {
                        while !ctx.cancel.is_cancelled() {
                            std::thread::sleep(Duration::from_millis(2));
                        }
                        "canceled"
                    })
                    .await
            })
        };

        assert!(wait_until(|| executor.is_busy()).await);
        executor.cancel();
        assert_eq!(job.await.unwrap().unwrap(), "canceled");
        assert!(wait_until(|| !executor.is_busy()).await);
    }

    #[tokio::test]
    async fn cancel_reaches_queued_jobs_but_not_later_ones() {
        let root = TempDir::new().unwrap();
        let executor = Arc::new(executor(root.path()));
        let release = Arc::new(AtomicBool::new(false));

        let blocker = {
            let executor = executor.clone();
            let release = release.clone();
            tokio::spawn(async move {
                executor
                    .submit("hold", move |_, _| {
                        while !release.load(Ordering::SeqCst) {
                            std::thread::sleep(Duration::from_millis(2));
                        }
                    })
                    .await
            })
        };
        assert!(wait_until(|| executor.is_busy()).await);

        let queued = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .submit("queued", |_, ctx| ctx.cancel.is_cancelled())
                    .await
            })
        };
        // Let the queued submit take its token before canceling.
        tokio::time::sleep(Duration::from_millis(20)).await;
        executor.cancel();
        release.store(true, Ordering::SeqCst);

        blocker.await.unwrap().unwrap();
        assert!(queued.await.unwrap().unwrap(), "queued job missed the cancel");
        let later = executor
            .submit("later", |_, ctx| ctx.cancel.is_cancelled())
            .await
            .unwrap();
        assert!(!later, "cancel leaked into a later job");
    }

    #[tokio::test]
    async fn refresh_apply_and_snapshot_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("app");
        let site_dir = tmp.path().join("site");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&site_dir).unwrap();

        let source = tmp.path().join("a.jar");
        std::fs::write(&source, b"payload").unwrap();
        let entry = RemoteEntry {
            checksum: hash_bytes(b"payload"),
            timestamp: Utc::now(),
            filesize: 7,
            executable: false,
            dependencies: Default::default(),
            description: None,
        };
        let mut site = DirSite::new(SiteName::from("main"), site_dir.clone());
        site.upload(&FileName::from("a.jar"), &source, &entry).unwrap();
        let mut index = SiteIndex {
            timestamp: Utc::now(),
            ..Default::default()
        };
        index.files.insert(FileName::from("a.jar"), entry);
        site.publish_index(&index).unwrap();

        let mut files = Collection::new(&root);
        files.add_site(UpdateSite::new("main", site_dir.display().to_string()));
        let executor = Executor::spawn(files, Arc::new(DirRemote));

        let report = executor.refresh().await.unwrap();
        assert_eq!(report.refreshed, vec![SiteName::from("main")]);
        let marked = executor
            .update(|files| files.set_action(&FileName::from("a.jar"), Action::Install))
            .await
            .unwrap();
        assert!(marked);

        let installed = executor.apply(Box::new(NullProgress)).await.unwrap();
        assert_eq!(installed.installed, vec![FileName::from("a.jar")]);

        let snapshot = executor.snapshot().await.unwrap();
        assert_eq!(
            snapshot.get(&FileName::from("a.jar")).unwrap().status(),
            Status::Installed
        );
        let files = executor.shutdown().await.unwrap();
        assert!(!files.has_changes());
        assert!(root.join("a.jar").exists());
    }

    #[tokio::test]
    async fn sync_errors_surface_through_the_future() {
        let root = TempDir::new().unwrap();
        let executor = executor(root.path());
        let err = executor
            .initialize_site(SiteName::from("nowhere"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Sync(SyncError::Manifest(_))), "got {err}");
    }
}
