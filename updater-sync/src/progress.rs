//! Progress reporting for long-running batches.

/// Sink for batch progress. `tick` receives bytes (or files) done out of a
/// total; `done` is never below the previous tick's.
pub trait Progress: Send {
    fn start(&mut self, title: &str);
    fn tick(&mut self, done: u64, total: u64, label: &str);
    fn done(&mut self);
    fn canceled(&mut self);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl Progress for NullProgress {
    fn start(&mut self, _title: &str) {}
    fn tick(&mut self, _done: u64, _total: u64, _label: &str) {}
    fn done(&mut self) {}
    fn canceled(&mut self) {}
}

/// Logs each event at `info`, at most once per ten percent.
#[derive(Debug, Default)]
pub struct LogProgress {
    title: String,
    last_decile: Option<u64>,
}

impl Progress for LogProgress {
    fn start(&mut self, title: &str) {
        self.title = title.to_string();
        self.last_decile = None;
        tracing::info!("{title}");
    }

    fn tick(&mut self, done: u64, total: u64, label: &str) {
        let decile = if total == 0 { 10 } else { done.saturating_mul(10) / total };
        if self.last_decile.map_or(true, |last| decile > last) {
            self.last_decile = Some(decile);
            tracing::info!("{}: {}% {label}", self.title, decile * 10);
        }
    }

    fn done(&mut self) {
        tracing::info!("{}: done", self.title);
    }

    fn canceled(&mut self) {
        tracing::warn!("{}: canceled", self.title);
    }
}
