//! Ingestion progress reporting.
//!
//! Reports observable progress during `rag ingest` so users can see which
//! documents are being read and how much embedding work is left. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestProgressEvent {
    /// Walking the docs directory (total unknown).
    Discovering { profile: String },
    /// n documents read and chunked out of total.
    Reading { n: u64, total: u64 },
    /// n chunks embedded out of total.
    Embedding { n: u64, total: u64 },
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the ingest pipeline and index builder.
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Discovering { profile } => {
                format!("ingest {}  discovering...\n", profile)
            }
            IngestProgressEvent::Reading { n, total } => format!(
                "ingest  reading  {} / {} documents\n",
                format_number(*n),
                format_number(*total)
            ),
            IngestProgressEvent::Embedding { n, total } => format!(
                "ingest  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Discovering { profile } => serde_json::json!({
                "event": "progress",
                "profile": profile,
                "phase": "discovering"
            }),
            IngestProgressEvent::Reading { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "reading",
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
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

    /// The `--progress` value if given, otherwise decide from the TTY.
    pub fn resolve(flag: Option<ProgressMode>) -> Self {
        flag.unwrap_or_else(Self::default_for_tty)
    }

    /// Build a reporter for this mode. Caller passes it to ingest.
    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn progress_flag_parsing() {
        use clap::ValueEnum;
        assert_eq!(ProgressMode::from_str("json", false), Ok(ProgressMode::Json));
        assert_eq!(ProgressMode::from_str("off", false), Ok(ProgressMode::Off));
        assert_eq!(ProgressMode::from_str("human", false), Ok(ProgressMode::Human));
        assert!(ProgressMode::from_str("loud", false).is_err());
        assert_eq!(
            ProgressMode::resolve(Some(ProgressMode::Json)),
            ProgressMode::Json
        );
    }
}
