//! Core data model shared by the synchronizer, the executor and the CLI.
//!
//! - TreeEntry: one entry found while walking a local or remote tree
//! - Step: one unit of work the synchronizer hands to the executor
//! - RunReport: outcome of one requested operation

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::error::EngineError;

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Listing line not recognised; resolved by probing the server
    Unknown,
}

/// A single entry produced while walking. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Bare name, no path
    pub name: String,
    pub kind: EntryKind,
    pub local_path: PathBuf,
    pub remote_path: String,
    /// Size in bytes when known (0 for directories)
    pub size: u64,
}

/// One operation emitted by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Step {
    CreateRemoteDir { remote_path: String },
    CreateLocalDir { local_path: PathBuf },
    Upload { local_path: PathBuf, remote_path: String },
    Download { remote_path: String, local_path: PathBuf },
    DeleteFile { remote_path: String },
    RemoveDir { remote_path: String },
}

impl Step {
    /// True for steps that move file bytes (the ones the budget counts).
    pub fn is_transfer(&self) -> bool {
        matches!(self, Step::Upload { .. } | Step::Download { .. })
    }

    /// Path the step acts on, for error reporting.
    pub fn target(&self) -> String {
        match self {
            Step::CreateRemoteDir { remote_path }
            | Step::Upload { remote_path, .. }
            | Step::DeleteFile { remote_path }
            | Step::RemoveDir { remote_path } => remote_path.clone(),
            Step::CreateLocalDir { local_path } | Step::Download { local_path, .. } => {
                local_path.display().to_string()
            }
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::CreateRemoteDir { remote_path } => write!(f, "[DIR] -> {}", remote_path),
            Step::CreateLocalDir { local_path } => {
                write!(f, "[DIR] -> {}", local_path.display())
            }
            Step::Upload {
                local_path,
                remote_path,
            } => write!(f, "[FILE] {} -> {}", local_path.display(), remote_path),
            Step::Download {
                remote_path,
                local_path,
            } => write!(f, "[FILE] {} -> {}", remote_path, local_path.display()),
            Step::DeleteFile { remote_path } => write!(f, "[DELETE] {}", remote_path),
            Step::RemoveDir { remote_path } => write!(f, "[DELETE DIR] {}", remote_path),
        }
    }
}

/// The state of an individual step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StepState {
    /// Successfully executed
    Done,
    /// Error occurred; recorded and, on fail-soft paths, walked past
    Failed,
}

/// Why an entry was passed over without being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// Matched the exclusion policy
    Excluded,
    /// The operation budget was used up
    BudgetExhausted,
    /// Directory deeper than the configured maximum
    DepthLimit,
    /// Local directory already visited through another path
    Cycle,
    /// Listed name is not a single path component
    UnsafeName,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Excluded => write!(f, "excluded"),
            SkipReason::BudgetExhausted => write!(f, "transfer budget exhausted"),
            SkipReason::DepthLimit => write!(f, "maximum depth exceeded"),
            SkipReason::Cycle => write!(f, "directory already visited"),
            SkipReason::UnsafeName => write!(f, "name is not a plain file name"),
        }
    }
}

/// Record of one executed step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step: Step,
    pub state: StepState,
    /// Bytes moved by this step (0 for non-transfers)
    pub bytes: u64,
    /// Human-readable error message when `state` is Failed
    pub error_message: Option<String>,
}

/// Record of one skipped entry.
#[derive(Debug, Clone, Serialize)]
pub struct SkipRecord {
    pub path: String,
    pub reason: SkipReason,
}

/// Outcome of one requested operation.
///
/// Serializes to the JSON run report the CLI writes with `--report`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Verb of the requested operation, e.g. "upload-all"
    pub operation: String,

    /// Every step executed, in execution order
    pub steps: Vec<StepRecord>,

    /// Entries passed over without execution
    pub skipped: Vec<SkipRecord>,

    /// Sum of bytes moved by all successful transfers
    pub bytes_transferred: u64,

    /// Raw LIST output, for the `list` operation
    pub listing: Option<String>,

    /// Set when the operation as a whole failed
    #[serde(serialize_with = "error_text")]
    pub error: Option<EngineError>,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new(operation: &str) -> Self {
        RunReport {
            id: Uuid::new_v4(),
            operation: operation.to_string(),
            steps: Vec::new(),
            skipped: Vec::new(),
            bytes_transferred: 0,
            listing: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_done(&mut self, step: Step, bytes: u64) {
        self.bytes_transferred += bytes;
        self.steps.push(StepRecord {
            step,
            state: StepState::Done,
            bytes,
            error_message: None,
        });
    }

    pub fn record_failed(&mut self, step: Step, err: &EngineError) {
        self.steps.push(StepRecord {
            step,
            state: StepState::Failed,
            bytes: 0,
            error_message: Some(err.to_string()),
        });
    }

    pub fn record_skip(&mut self, path: String, reason: SkipReason) {
        self.skipped.push(SkipRecord { path, reason });
    }

    pub fn finish(&mut self, error: Option<EngineError>) {
        self.error = error;
        self.finished_at = Some(Utc::now());
    }

    /// True when the top-level operation is considered successful.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn done_count(&self) -> usize {
        self.steps.iter().filter(|s| s.state == StepState::Done).count()
    }

    pub fn failed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.state == StepState::Failed).count()
    }

    /// Number of executed transfer steps, successful or not.
    pub fn transfer_count(&self) -> usize {
        self.steps.iter().filter(|s| s.step.is_transfer()).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn error_text<S: Serializer>(error: &Option<EngineError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none(),
    }
}
