//! Pending-work summary, as shown before applying a batch.

use std::fmt;

use crate::collection::Collection;
use crate::types::Action;

/// Counts and byte totals of the pending action set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub install: usize,
    pub uninstall: usize,
    pub upload: usize,
    pub remove: usize,
    /// Dependencies an upload would drag in.
    pub implicated: usize,
    pub bytes_to_download: u64,
    pub bytes_to_upload: u64,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.install + self.uninstall + self.upload + self.remove == 0
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.install > 0 {
            let implicated = if self.implicated > 0 {
                format!("+{}", self.implicated)
            } else {
                String::new()
            };
            parts.push(format!(
                "install/update: {}{} ({})",
                self.install,
                implicated,
                human_size(self.bytes_to_download)
            ));
        }
        if self.uninstall > 0 {
            parts.push(format!("uninstall: {}", self.uninstall));
        }
        if self.upload > 0 {
            parts.push(format!(
                "upload: {} ({})",
                self.upload,
                human_size(self.bytes_to_upload)
            ));
        }
        if self.remove > 0 {
            parts.push(format!("remove: {}", self.remove));
        }
        if parts.is_empty() {
            return f.write_str("no pending changes");
        }
        f.write_str(&parts.join(" "))
    }
}

impl Collection {
    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for record in self.changes() {
            match record.action() {
                Action::Install | Action::Update => {
                    summary.install += 1;
                    summary.bytes_to_download += record.download_size();
                }
                Action::Uninstall => summary.uninstall += 1,
                Action::Upload => {
                    summary.upload += 1;
                    summary.bytes_to_upload += record.filesize;
                }
                Action::Remove => summary.remove += 1,
                Action::None => {}
            }
        }
        for name in self.dependencies(false).implicated() {
            summary.implicated += 1;
            if let Some(record) = self.get(name) {
                summary.bytes_to_download += record.download_size();
            }
        }
        for name in self.dependencies(true).implicated() {
            summary.implicated += 1;
            if let Some(record) = self.get(name) {
                summary.bytes_to_upload += record.filesize;
            }
        }
        summary
    }
}

/// Format a byte count with one decimal and binary units (`1.5kB`).
pub fn human_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let mut unit = 1;
    while unit < UNITS.len() && size >= 1u64 << (10 * unit) {
        unit += 1;
    }
    unit -= 1;
    if unit == 0 {
        return format!("{size}{}", UNITS[0]);
    }
    let tenths = ((u128::from(size) * 100 >> (10 * unit)) + 5) / 10;
    format!("{}.{}{}", tenths / 10, tenths % 10, UNITS[unit])
}
