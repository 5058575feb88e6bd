//! # ftpsync engine - FTP client library
//!
//! A blocking FTP client engine that mirrors directory trees between a local
//! folder and a server. Designed as the core under a thin command-line front
//! end; it never prints, it reports through an injected `EventSink`.
//!
//! ## Overview
//!
//! - Line codec and reply parsing for the control channel
//! - Control session with login, idempotent MKD and a strict request/reply
//!   state machine
//! - Passive-mode data channel, one connection per transfer
//! - Directory synchronizer with an exclusion policy, a transfer budget, a
//!   depth limit and a local symlink cycle guard
//! - Fail-fast uploads, fail-soft downloads and deletes
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use engine::{job, Config, LogSink, Operation, SessionContext};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (config, _path) = Config::discover(std::path::Path::new("."))?;
//! let ctx = SessionContext::new(&config, Arc::new(LogSink));
//!
//! let report = job::run(&ctx, &Operation::UploadAll)?;
//! println!(
//!     "{} steps done, {} failed, {} bytes",
//!     report.done_count(),
//!     report.failed_count(),
//!     report.bytes_transferred
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **codec**, **reply**: control-channel framing and reply grammar
//! - **session**: control session state machine
//! - **data**: passive data channel
//! - **transfer**: STOR/RETR/LIST over a session; the real `Remote`
//! - **listing**: LIST line parser
//! - **sync**: exclusion, budget and the three walks
//! - **job**: `Operation` dispatch
//! - **config**, **events**: configuration and event reporting
//! - **fs_ops**, **checksums**, **model**, **error**: supporting pieces

pub mod checksums;
pub mod codec;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod fs_ops;
pub mod job;
pub mod listing;
pub mod model;
pub mod reply;
pub mod session;
pub mod sync;
pub mod transfer;

#[cfg(test)]
mod testing;

// Re-export main types and functions
pub use checksums::{ChecksumAlgorithm, ChecksumValue};
pub use config::{Config, SessionContext, SessionSettings};
pub use error::{EngineError, FailureClass, PasvParseError, ProtocolError};
pub use events::{Event, EventSink, LogSink, MemorySink};
pub use job::{run, run_operation, Operation};
pub use model::{EntryKind, RunReport, SkipReason, Step, StepState};
pub use reply::{PassiveEndpoint, Reply};
pub use session::{ControlSession, SessionState};
pub use sync::{ExclusionPolicy, OperationBudget, Remote, Synchronizer};
