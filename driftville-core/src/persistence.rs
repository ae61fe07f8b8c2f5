//! Newline-delimited JSON logs: the durable simulation history.
//!
//! Four append-only files are produced:
//!
//! | Log      | One line per                 | Record            |
//! |----------|------------------------------|-------------------|
//! | ticks    | agent per tick               | [`TickLogEntry`]  |
//! | memories | memory created               | [`MemoryEntry`]   |
//! | events   | stored conversation          | [`DialogueEvent`] |
//! | stream   | tick summary                 | [`StreamLogEntry`]|
//!
//! Write failures never abort the tick loop: callers use
//! [`JsonlSink::append_or_warn`], which logs and moves on.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LogsConfig;
use crate::dialogue::DialogueEvent;
use crate::error::Result;
use crate::memory::MemoryEntry;
use crate::stage::{ActionResult, DriftDecision, Observation, OrpdaResult, Plan, Reflection};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One agent-tick. Absent stages are written as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickLogEntry {
    /// Wall-clock creation time.
    pub ts_created: DateTime<Utc>,
    /// Zero-based tick counter.
    pub tick_index: u32,
    /// Simulated tick start, `YYYY-MM-DD HH:MM`.
    pub sim_time: String,
    /// Agent the tick belongs to.
    pub agent_name: String,
    /// Whether drift-decide was enabled for the run.
    pub use_drift: bool,
    /// Observe stage.
    #[serde(default)]
    pub observation: Option<Observation>,
    /// Reflect stage.
    #[serde(default)]
    pub reflection: Option<Reflection>,
    /// Plan stage.
    #[serde(default)]
    pub plan: Option<Plan>,
    /// Drift-decide stage.
    #[serde(default)]
    pub drift_decision: Option<DriftDecision>,
    /// Act stage.
    #[serde(default)]
    pub action_result: Option<ActionResult>,
}

impl TickLogEntry {
    /// Build a log line from a normalised result.
    #[must_use]
    pub fn new(tick_index: u32, sim_time: String, agent_name: String, use_drift: bool, result: OrpdaResult) -> Self {
        Self {
            ts_created: Utc::now(),
            tick_index,
            sim_time,
            agent_name,
            use_drift,
            observation: result.observation,
            reflection: result.reflection,
            plan: result.plan,
            drift_decision: result.drift_decision,
            action_result: result.action_result,
        }
    }

    /// The five stages as a merged result.
    #[must_use]
    pub fn stages(&self) -> OrpdaResult {
        OrpdaResult {
            observation: self.observation.clone(),
            reflection: self.reflection.clone(),
            plan: self.plan.clone(),
            drift_decision: self.drift_decision.clone(),
            action_result: self.action_result.clone(),
        }
    }
}

/// One memory-stream summary line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLogEntry {
    /// Wall-clock creation time.
    pub ts_created: DateTime<Utc>,
    /// Simulated tick start.
    pub sim_time: String,
    /// Agent name.
    pub agent: String,
    /// Summary sentence.
    pub summary: String,
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Append-only JSONL file.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    /// Point a sink at `path`. The file is created on first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize `record` and append it as one line.
    ///
    /// # Errors
    /// Returns an I/O or serialization error.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Append, logging instead of failing. Returns whether the write succeeded.
    pub fn append_or_warn<T: Serialize>(&self, record: &T) -> bool {
        match self.append(record) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Log append failed, continuing");
                false
            }
        }
    }

    /// Read every parseable record back.
    ///
    /// # Errors
    /// See [`read_jsonl`].
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        read_jsonl(&self.path)
    }
}

/// Load a JSONL file, skipping blank and malformed lines with a warning.
/// A missing file reads as empty.
///
/// # Errors
/// Returns an I/O error if the file exists but cannot be read.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut rows = Vec::new();
    let mut skipped = 0_usize;
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(row) => rows.push(row),
            Err(e) => {
                skipped += 1;
                warn!(path = %path.display(), line = n + 1, error = %e, "Skipping malformed log line");
            }
        }
    }
    debug!(path = %path.display(), rows = rows.len(), skipped, "Loaded JSONL log");
    Ok(rows)
}

/// Dialogue events whose participants include every name in `participants`.
///
/// # Errors
/// Propagates read errors from [`read_jsonl`].
pub fn events_between(path: &Path, participants: &[&str]) -> Result<Vec<DialogueEvent>> {
    let events: Vec<DialogueEvent> = read_jsonl(path)?;
    Ok(events.into_iter().filter(|e| e.involves_all(participants)).collect())
}

// ---------------------------------------------------------------------------
// Log set
// ---------------------------------------------------------------------------

/// The four sinks of a run.
#[derive(Debug, Clone)]
pub struct LogSinks {
    /// Tick log.
    pub ticks: JsonlSink,
    /// Memory log.
    pub memories: JsonlSink,
    /// Dialogue event log.
    pub events: JsonlSink,
    /// Memory-stream summary log.
    pub stream: JsonlSink,
}

impl LogSinks {
    /// Sinks under `config.directory`.
    #[must_use]
    pub fn from_config(config: &LogsConfig) -> Self {
        let dir = Path::new(&config.directory);
        let sinks = Self {
            ticks: JsonlSink::new(dir.join(&config.tick_log)),
            memories: JsonlSink::new(dir.join(&config.memory_log)),
            events: JsonlSink::new(dir.join(&config.event_log)),
            stream: JsonlSink::new(dir.join(&config.stream_log)),
        };
        info!(dir = %dir.display(), "Log sinks configured");
        sinks
    }

    /// Sinks with default file names under `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::from_config(&LogsConfig {
            directory: dir.to_string_lossy().into_owned(),
            ..LogsConfig::default()
        })
    }
}
