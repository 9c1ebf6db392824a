use std::io::Write;

use colored::Colorize;

use updater_core::human_size;
use updater_sync::Progress;

/// Single-line progress on stderr.
#[derive(Debug, Default)]
pub struct TermProgress {
    title: String,
    last_percent: Option<u64>,
}

impl TermProgress {
    pub fn boxed() -> Box<dyn Progress> {
        Box::new(Self::default())
    }
}

impl Progress for TermProgress {
    fn start(&mut self, title: &str) {
        self.title = title.to_string();
        self.last_percent = None;
        eprintln!("{}", title.bold());
    }

    fn tick(&mut self, done: u64, total: u64, label: &str) {
        let percent = if total == 0 { 100 } else { done.saturating_mul(100) / total };
        if self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        let mut err = std::io::stderr().lock();
        let _ = write!(
            err,
            "\r\x1b[2K  {percent:>3}%  {} / {}  {label}",
            human_size(done),
            human_size(total)
        );
        let _ = err.flush();
    }

    fn done(&mut self) {
        if self.last_percent.is_some() {
            eprintln!();
        }
        eprintln!("{} {}", "✓".green(), self.title);
    }

    fn canceled(&mut self) {
        if self.last_percent.is_some() {
            eprintln!();
        }
        eprintln!("{} {} canceled", "✗".red(), self.title);
    }
}
