//! Copy progress reporting.
//!
//! The orchestrator hands each poll observation with a known total to a
//! [`ProgressReporter`]; how it is shown is up to the reporter. Built-in
//! reporters write to **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// One progress observation of a bulk copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyProgress {
    pub processed: u64,
    pub total: u64,
}

impl CopyProgress {
    pub fn percent(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            (self.processed.min(self.total) * 100) / self.total
        }
    }
}

/// Receives progress observations. Called synchronously from the poll loop.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: CopyProgress);
}

impl<F> ProgressReporter for F
where
    F: Fn(CopyProgress) + Send + Sync,
{
    fn report(&self, progress: CopyProgress) {
        self(progress)
    }
}

/// Human-friendly progress on stderr: "reindex docs_v2  1,234 / 5,000 records (24%)".
pub struct StderrProgress {
    pub target: String,
}

impl ProgressReporter for StderrProgress {
    fn report(&self, progress: CopyProgress) {
        let line = format!(
            "reindex {}  {} / {} records ({}%)\n",
            self.target,
            format_number(progress.processed),
            format_number(progress.total),
            progress.percent()
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress {
    pub target: String,
}

impl ProgressReporter for JsonProgress {
    fn report(&self, progress: CopyProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "target": self.target,
            "processed": progress.processed,
            "total": progress.total,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _progress: CopyProgress) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self, target: &str) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress {
                target: target.to_string(),
            }),
            ProgressMode::Json => Box::new(JsonProgress {
                target: target.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(CopyProgress { processed: 50, total: 200 }.percent(), 25);
        assert_eq!(CopyProgress { processed: 300, total: 200 }.percent(), 100);
        assert_eq!(CopyProgress { processed: 3, total: 0 }.percent(), 0);
    }

    #[test]
    fn closures_are_reporters() {
        let seen = Mutex::new(Vec::new());
        let reporter = |p: CopyProgress| seen.lock().unwrap().push(p.processed);
        reporter.report(CopyProgress { processed: 7, total: 10 });
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }
}
