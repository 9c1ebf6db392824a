use thiserror::Error;

/// Error surface for the collection executor.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("worker task join failure: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Sync(#[from] updater_sync::SyncError),
}
