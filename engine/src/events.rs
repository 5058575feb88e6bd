//! Structured event reporting.
//!
//! The engine never prints. Every notable thing that happens during a run is
//! turned into an `Event` and handed to the `EventSink` held by the
//! `SessionContext`, so the CLI, a test, or any other front end decides how
//! it is shown.

use std::fmt;
use std::sync::Mutex;

use log::Level;

use crate::model::{SkipReason, Step};

/// Something worth reporting during a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connecting { host: String, port: u16 },
    Connected { host: String, greeting: String },
    LoggedIn { username: String },
    /// Command line as sent, with the PASS argument masked
    CommandSent { line: String },
    ReplyReceived { code: u16, text: String },
    StepStarted { step: Step },
    StepCompleted { step: Step, bytes: u64 },
    StepFailed { step: Step, error: String },
    Skipped { path: String, reason: SkipReason },
    /// Negative MKD reply that the walk carries on past
    DirectoryCreateTolerated { path: String, code: u16, text: String },
    ListingFailed { path: String, error: String },
    Listing { path: String, text: String },
    Verified { path: String, checksum: String },
    VerificationMismatch { path: String, local: String, remote: String },
    Disconnected { host: String },
    RunFinished {
        operation: String,
        done: usize,
        failed: usize,
        skipped: usize,
        bytes: u64,
        success: bool,
    },
}

impl Event {
    pub fn level(&self) -> Level {
        match self {
            Event::CommandSent { .. } | Event::ReplyReceived { .. } => Level::Trace,
            Event::Skipped {
                reason: SkipReason::Excluded,
                ..
            } => Level::Debug,
            Event::StepStarted { .. } | Event::Connecting { .. } | Event::Listing { .. } => {
                Level::Debug
            }
            Event::StepFailed { .. }
            | Event::ListingFailed { .. }
            | Event::VerificationMismatch { .. } => Level::Error,
            Event::Skipped { .. } | Event::DirectoryCreateTolerated { .. } => Level::Warn,
            Event::RunFinished { success: false, .. } => Level::Error,
            _ => Level::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Connecting { host, port } => write!(f, "Connecting to {}:{}", host, port),
            Event::Connected { host, greeting } => {
                write!(f, "Connected to {}: {}", host, greeting)
            }
            Event::LoggedIn { username } => write!(f, "Logged in as {}", username),
            Event::CommandSent { line } => write!(f, ">>> {}", line),
            Event::ReplyReceived { code, text } => write!(f, "<<< {} {}", code, text),
            Event::StepStarted { step } => write!(f, "{}", step),
            Event::StepCompleted { step, bytes } => {
                if step.is_transfer() {
                    write!(f, "{} ({} bytes)", step, bytes)
                } else {
                    write!(f, "{}", step)
                }
            }
            Event::StepFailed { step, error } => write!(f, "{} failed: {}", step, error),
            Event::Skipped { path, reason } => write!(f, "Skipped {}: {}", path, reason),
            Event::DirectoryCreateTolerated { path, code, text } => write!(
                f,
                "Could not create remote directory {}: {} {} (continuing)",
                path, code, text
            ),
            Event::ListingFailed { path, error } => {
                write!(f, "Listing {} failed: {} (continuing)", path, error)
            }
            Event::Listing { path, text } => write!(f, "Remote contents of {}:\n{}", path, text),
            Event::Verified { path, checksum } => {
                write!(f, "Verified {} ({})", path, checksum)
            }
            Event::VerificationMismatch {
                path,
                local,
                remote,
            } => write!(
                f,
                "Checksum mismatch for {}: local {} remote {}",
                path, local, remote
            ),
            Event::Disconnected { host } => write!(f, "Disconnected from {}", host),
            Event::RunFinished {
                operation,
                done,
                failed,
                skipped,
                bytes,
                success,
            } => write!(
                f,
                "{} {}: {} done, {} failed, {} skipped, {} bytes",
                operation,
                if *success { "succeeded" } else { "failed" },
                done,
                failed,
                skipped,
                bytes
            ),
        }
    }
}

/// Receiver of engine events.
///
/// Called synchronously from the thread driving the session.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &Event) {
        log::log!(target: "ftpsync", event.level(), "{}", event);
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}
