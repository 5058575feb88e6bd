//! Operation dispatch.
//!
//! This module provides the run lifecycle:
//! - `Operation`: the verbs the CLI accepts, each with typed arguments
//! - Validating operation arguments before anything touches the network
//! - Running one operation against a `Remote` and producing a `RunReport`

use std::fmt;
use std::path::{Component, Path};

use crate::checksums::{self, ChecksumAlgorithm, ChecksumWriter};
use crate::config::SessionContext;
use crate::error::EngineError;
use crate::events::Event;
use crate::model::{RunReport, Step};
use crate::session::ControlSession;
use crate::sync::{join_remote, run_step, Remote, Synchronizer};

/// One requested operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Connect and log in only
    Test,
    /// Raw listing of the remote root
    List,
    Download { name: String },
    DownloadAll,
    /// Single STOR, optionally read back and compared
    Upload {
        name: String,
        verify: Option<ChecksumAlgorithm>,
    },
    UploadAll,
    Delete { name: String },
    DeleteAll,
    Mkdir { name: String },
    /// Recursive delete of a named directory, the directory included
    Rmdir { name: String },
}

impl Operation {
    pub fn verb(&self) -> &'static str {
        match self {
            Operation::Test => "test",
            Operation::List => "list",
            Operation::Download { .. } => "download",
            Operation::DownloadAll => "download-all",
            Operation::Upload { .. } => "upload",
            Operation::UploadAll => "upload-all",
            Operation::Delete { .. } => "delete",
            Operation::DeleteAll => "delete-all",
            Operation::Mkdir { .. } => "mkdir",
            Operation::Rmdir { .. } => "rmdir",
        }
    }

    /// The name argument, for verbs that take one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Operation::Download { name }
            | Operation::Upload { name, .. }
            | Operation::Delete { name }
            | Operation::Mkdir { name }
            | Operation::Rmdir { name } => Some(name),
            _ => None,
        }
    }

    /// Reject names that would escape the configured roots.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self.name() {
            Some(name) => validate_name(self.verb(), name),
            None => Ok(()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} {}", self.verb(), name),
            None => write!(f, "{}", self.verb()),
        }
    }
}

fn validate_name(verb: &str, name: &str) -> Result<(), EngineError> {
    let invalid = |reason: &str| {
        Err(EngineError::InvalidOperation(format!(
            "{}: invalid name '{}': {}",
            verb, name, reason
        )))
    };

    if name.trim().is_empty() {
        return invalid("name is empty");
    }
    if name.starts_with('/') || name.starts_with('\\') || Path::new(name).is_absolute() {
        return invalid("absolute paths are not allowed");
    }
    let escapes = name.split(['/', '\\']).any(|segment| segment == "..")
        || Path::new(name)
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
    if escapes {
        return invalid("'..' segments are not allowed");
    }
    Ok(())
}

/// Validate `op`, open a session and run it.
///
/// # Errors
/// Returns the validation, connection or login failure. Once the session is
/// open, the outcome is carried by the returned `RunReport`.
pub fn run(ctx: &SessionContext, op: &Operation) -> Result<RunReport, EngineError> {
    op.validate()?;
    let mut session = ControlSession::open(ctx)?;
    let report = run_operation(ctx, &mut session, op);
    session.quit();
    Ok(report)
}

/// Run one operation against an open remote.
///
/// Never fails as a whole: the outcome, including an error that ended the
/// operation, is recorded on the report.
pub fn run_operation<R: Remote + ?Sized>(
    ctx: &SessionContext,
    remote: &mut R,
    op: &Operation,
) -> RunReport {
    let mut report = RunReport::new(op.verb());
    let result = op
        .validate()
        .and_then(|_| dispatch(ctx, remote, op, &mut report));
    report.finish(result.err());

    ctx.emit(Event::RunFinished {
        operation: op.to_string(),
        done: report.done_count(),
        failed: report.failed_count(),
        skipped: report.skipped.len(),
        bytes: report.bytes_transferred,
        success: report.succeeded(),
    });
    report
}

fn dispatch<R: Remote + ?Sized>(
    ctx: &SessionContext,
    remote: &mut R,
    op: &Operation,
    report: &mut RunReport,
) -> Result<(), EngineError> {
    let remote_root = ctx.settings.remote_root.as_str();
    let local_root = ctx.settings.local_root.as_path();

    match op {
        Operation::Test => Ok(()),
        Operation::List => {
            let text = remote.raw_listing(remote_root)?;
            ctx.emit(Event::Listing {
                path: remote_root.to_string(),
                text: text.clone(),
            });
            report.listing = Some(text);
            Ok(())
        }
        Operation::Download { name } => {
            let step = Step::Download {
                remote_path: join_remote(remote_root, name),
                local_path: local_root.join(name),
            };
            run_step(ctx, remote, report, step).map(|_| ())
        }
        Operation::DownloadAll => {
            Synchronizer::new(ctx, remote, report).download_tree(remote_root, local_root)
        }
        Operation::Upload { name, verify } => {
            let local_path = local_root.join(name);
            let remote_path = join_remote(remote_root, name);
            let step = Step::Upload {
                local_path: local_path.clone(),
                remote_path: remote_path.clone(),
            };
            run_step(ctx, remote, report, step)?;
            match verify {
                Some(algorithm) => verify_upload(ctx, remote, &local_path, &remote_path, *algorithm),
                None => Ok(()),
            }
        }
        Operation::UploadAll => {
            Synchronizer::new(ctx, remote, report).upload_tree(local_root, remote_root)
        }
        Operation::Delete { name } => {
            let step = Step::DeleteFile {
                remote_path: join_remote(remote_root, name),
            };
            run_step(ctx, remote, report, step).map(|_| ())
        }
        Operation::DeleteAll => Synchronizer::new(ctx, remote, report).delete_tree(remote_root, false),
        Operation::Mkdir { name } => {
            let step = Step::CreateRemoteDir {
                remote_path: join_remote(remote_root, name),
            };
            run_step(ctx, remote, report, step).map(|_| ())
        }
        Operation::Rmdir { name } => {
            let target = join_remote(remote_root, name);
            Synchronizer::new(ctx, remote, report).delete_tree(&target, true)
        }
    }
}

/// Read an uploaded file back and compare checksums.
fn verify_upload<R: Remote + ?Sized>(
    ctx: &SessionContext,
    remote: &mut R,
    local_path: &Path,
    remote_path: &str,
    algorithm: ChecksumAlgorithm,
) -> Result<(), EngineError> {
    let local = checksums::compute_file_checksum(local_path, algorithm)?;
    let mut writer = ChecksumWriter::new(algorithm);
    remote.fetch(remote_path, &mut writer)?;
    let uploaded = writer.finish();

    if local != uploaded {
        ctx.emit(Event::VerificationMismatch {
            path: remote_path.to_string(),
            local: local.to_string_with_algo(),
            remote: uploaded.to_string_with_algo(),
        });
        return Err(EngineError::Transfer {
            operation: "VERIFY",
            path: remote_path.to_string(),
            code: None,
            reason: format!("checksum mismatch: local {} remote {}", local, uploaded),
        });
    }

    ctx.emit(Event::Verified {
        path: remote_path.to_string(),
        checksum: local.to_string_with_algo(),
    });
    Ok(())
}
