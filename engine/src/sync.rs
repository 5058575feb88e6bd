//! Directory synchronizer.
//!
//! Walks a tree depth-first and turns every entry that passes the
//! `ExclusionPolicy` into a `Step`, which is handed straight to a `Remote`
//! for execution. Three walks exist:
//! - upload: local tree into the remote tree, fail-fast
//! - download: remote tree into the local tree, fail-soft
//! - delete: remote tree, files before subdirectories, fail-soft
//!
//! Fail-soft walks still stop on fatal errors (control connection lost).

use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::SessionContext;
use crate::error::EngineError;
use crate::events::Event;
use crate::fs_ops;
use crate::listing::ListEntry;
use crate::model::{EntryKind, RunReport, SkipReason, Step, TreeEntry};

/// Predicate over bare entry names.
///
/// An excluded directory is never entered, so its whole subtree is skipped.
#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    names: BTreeSet<String>,
    exclude_hidden: bool,
}

impl ExclusionPolicy {
    pub fn new(names: BTreeSet<String>, exclude_hidden: bool) -> Self {
        ExclusionPolicy {
            names,
            exclude_hidden,
        }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        if name.is_empty() || name == "." || name == ".." {
            return true;
        }
        if self.exclude_hidden && name.starts_with('.') {
            return true;
        }
        self.names.contains(name)
    }
}

/// Counter with a fixed ceiling on file transfers for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationBudget {
    ceiling: usize,
    used: usize,
}

impl OperationBudget {
    pub fn new(ceiling: usize) -> Self {
        OperationBudget { ceiling, used: 0 }
    }

    /// Take one unit; false once the ceiling is reached.
    pub fn try_consume(&mut self) -> bool {
        if self.used >= self.ceiling {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.ceiling - self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.ceiling
    }
}

/// The server side of a walk.
///
/// `ControlSession` is the real implementation; tests substitute an
/// in-memory fake.
pub trait Remote {
    /// Parsed listing of `path`.
    fn list(&mut self, path: &str) -> Result<Vec<ListEntry>, EngineError>;

    /// Raw listing text of `path`, for display.
    fn raw_listing(&mut self, path: &str) -> Result<String, EngineError>;

    /// Decide whether an entry of unknown kind is a directory.
    fn is_directory(&mut self, path: &str) -> Result<bool, EngineError>;

    /// Execute one step, returning the number of bytes moved.
    fn execute(&mut self, step: &Step) -> Result<u64, EngineError>;

    /// Stream a remote file into `writer`.
    fn fetch(&mut self, path: &str, writer: &mut dyn Write) -> Result<u64, EngineError>;
}

/// True when a listed name is one path component that stays inside its
/// parent directory on both sides of a transfer.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !Path::new(name).is_absolute()
}

/// Join a remote directory and a bare name with exactly one '/'.
pub fn join_remote(base: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        name.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Executes the walks of one run against a `Remote`.
///
/// The budget lives as long as the synchronizer, so every walk started
/// from the same instance draws from the same ceiling.
pub struct Synchronizer<'a, R: Remote + ?Sized> {
    ctx: &'a SessionContext,
    remote: &'a mut R,
    report: &'a mut RunReport,
    budget: OperationBudget,
    visited: HashSet<PathBuf>,
}

impl<'a, R: Remote + ?Sized> Synchronizer<'a, R> {
    pub fn new(ctx: &'a SessionContext, remote: &'a mut R, report: &'a mut RunReport) -> Self {
        Synchronizer {
            ctx,
            remote,
            report,
            budget: OperationBudget::new(ctx.settings.max_transfers),
            visited: HashSet::new(),
        }
    }

    pub fn budget(&self) -> &OperationBudget {
        &self.budget
    }

    /// Upload `local_root` into `remote_root`. The first failed transfer
    /// ends the walk and is returned.
    pub fn upload_tree(&mut self, local_root: &Path, remote_root: &str) -> Result<(), EngineError> {
        if remote_root != "/" {
            self.create_remote_dir(remote_root)?;
        }
        let key = fs_ops::canonical_key(local_root)?;
        self.visited.insert(key);
        self.upload_dir(local_root, remote_root, 0)
    }

    fn upload_dir(&mut self, local_dir: &Path, remote_dir: &str, depth: usize) -> Result<(), EngineError> {
        for local in fs_ops::read_local_dir(local_dir)? {
            let entry = TreeEntry {
                remote_path: join_remote(remote_dir, &local.name),
                kind: if local.is_dir {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                name: local.name,
                local_path: local.path,
                size: local.size,
            };
            if self.ctx.exclusion.is_excluded(&entry.name) {
                self.skip(entry.local_path.display().to_string(), SkipReason::Excluded);
                continue;
            }

            if entry.kind == EntryKind::Directory {
                let shown = entry.local_path.display().to_string();
                if depth + 1 > self.ctx.settings.max_depth {
                    self.skip(shown, SkipReason::DepthLimit);
                    continue;
                }
                if !self.first_visit(&entry.local_path)? {
                    self.skip(shown, SkipReason::Cycle);
                    continue;
                }
                self.create_remote_dir(&entry.remote_path)?;
                self.upload_dir(&entry.local_path, &entry.remote_path, depth + 1)?;
            } else {
                if !self.budget.try_consume() {
                    self.skip(entry.local_path.display().to_string(), SkipReason::BudgetExhausted);
                    continue;
                }
                self.run_step(Step::Upload {
                    local_path: entry.local_path,
                    remote_path: entry.remote_path,
                })?;
            }
        }
        Ok(())
    }

    /// Download `remote_root` into `local_root`. Failed entries are recorded
    /// and skipped; only a failure to list the root or a fatal error ends
    /// the walk.
    pub fn download_tree(&mut self, remote_root: &str, local_root: &Path) -> Result<(), EngineError> {
        let entries = self.remote.list(remote_root)?;
        self.run_step(Step::CreateLocalDir {
            local_path: local_root.to_path_buf(),
        })?;
        self.download_entries(entries, remote_root, local_root, 0)
    }

    fn download_dir(&mut self, remote_dir: &str, local_dir: &Path, depth: usize) -> Result<(), EngineError> {
        match self.list_soft(remote_dir)? {
            Some(entries) => self.download_entries(entries, remote_dir, local_dir, depth),
            None => Ok(()),
        }
    }

    fn download_entries(
        &mut self,
        entries: Vec<ListEntry>,
        remote_dir: &str,
        local_dir: &Path,
        depth: usize,
    ) -> Result<(), EngineError> {
        for listed in entries {
            let remote_path = join_remote(remote_dir, &listed.name);
            if !is_plain_name(&listed.name) {
                self.skip(remote_path, SkipReason::UnsafeName);
                continue;
            }
            if self.ctx.exclusion.is_excluded(&listed.name) {
                self.skip(remote_path, SkipReason::Excluded);
                continue;
            }
            let entry = TreeEntry {
                kind: self.resolve_kind(&listed, &remote_path)?,
                local_path: local_dir.join(&listed.name),
                name: listed.name,
                remote_path,
                size: listed.size,
            };

            if entry.kind == EntryKind::Directory {
                if depth + 1 > self.ctx.settings.max_depth {
                    self.skip(entry.remote_path, SkipReason::DepthLimit);
                    continue;
                }
                let created = self.run_step(Step::CreateLocalDir {
                    local_path: entry.local_path.clone(),
                });
                if soften(created)?.is_none() {
                    continue;
                }
                self.download_dir(&entry.remote_path, &entry.local_path, depth + 1)?;
            } else {
                if !self.budget.try_consume() {
                    self.skip(entry.remote_path, SkipReason::BudgetExhausted);
                    continue;
                }
                let downloaded = self.run_step(Step::Download {
                    remote_path: entry.remote_path,
                    local_path: entry.local_path,
                });
                soften(downloaded)?;
            }
        }
        Ok(())
    }

    /// Delete everything under `root`. The root itself is removed only when
    /// `remove_root` is set; a synchronization root never is.
    pub fn delete_tree(&mut self, root: &str, remove_root: bool) -> Result<(), EngineError> {
        let entries = self.remote.list(root)?;
        self.delete_entries(entries, root, 0)?;
        if remove_root {
            let removed = self.run_step(Step::RemoveDir {
                remote_path: root.to_string(),
            });
            soften(removed)?;
        }
        Ok(())
    }

    fn delete_entries(&mut self, entries: Vec<ListEntry>, dir: &str, depth: usize) -> Result<(), EngineError> {
        let mut subdirs = Vec::new();
        for listed in entries {
            let path = join_remote(dir, &listed.name);
            if !is_plain_name(&listed.name) {
                self.skip(path, SkipReason::UnsafeName);
                continue;
            }
            if self.ctx.exclusion.is_excluded(&listed.name) {
                self.skip(path, SkipReason::Excluded);
                continue;
            }
            match self.resolve_kind(&listed, &path)? {
                EntryKind::Directory => subdirs.push(path),
                _ => {
                    let deleted = self.run_step(Step::DeleteFile { remote_path: path });
                    soften(deleted)?;
                }
            }
        }

        for subdir in subdirs {
            if depth + 1 > self.ctx.settings.max_depth {
                self.skip(subdir, SkipReason::DepthLimit);
                continue;
            }
            if let Some(children) = self.list_soft(&subdir)? {
                self.delete_entries(children, &subdir, depth + 1)?;
            }
            let removed = self.run_step(Step::RemoveDir { remote_path: subdir });
            soften(removed)?;
        }
        Ok(())
    }

    /// Listing of a directory below the root; non-fatal failures are
    /// reported and the directory is skipped.
    fn list_soft(&mut self, path: &str) -> Result<Option<Vec<ListEntry>>, EngineError> {
        match self.remote.list(path) {
            Ok(entries) => Ok(Some(entries)),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                self.ctx.emit(Event::ListingFailed {
                    path: path.to_string(),
                    error: err.to_string(),
                });
                Ok(None)
            }
        }
    }

    fn resolve_kind(&mut self, listed: &ListEntry, path: &str) -> Result<EntryKind, EngineError> {
        if listed.kind != EntryKind::Unknown {
            return Ok(listed.kind);
        }
        match self.remote.is_directory(path) {
            Ok(true) => Ok(EntryKind::Directory),
            Ok(false) => Ok(EntryKind::File),
            Err(err) if err.is_fatal() => Err(err),
            Err(_) => Ok(EntryKind::File),
        }
    }

    /// MKD failures inside a walk are tolerated; a later STOR into the
    /// missing directory reports the problem.
    fn create_remote_dir(&mut self, path: &str) -> Result<(), EngineError> {
        let created = self.run_step(Step::CreateRemoteDir {
            remote_path: path.to_string(),
        });
        match created {
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                self.ctx.emit(Event::DirectoryCreateTolerated {
                    path: path.to_string(),
                    code: err.reply_code().unwrap_or(0),
                    text: err.to_string(),
                });
                Ok(())
            }
            Ok(_) => Ok(()),
        }
    }

    fn first_visit(&mut self, dir: &Path) -> Result<bool, EngineError> {
        let key = fs_ops::canonical_key(dir)?;
        Ok(self.visited.insert(key))
    }

    fn run_step(&mut self, step: Step) -> Result<u64, EngineError> {
        run_step(self.ctx, &mut *self.remote, self.report, step)
    }

    fn skip(&mut self, path: String, reason: SkipReason) {
        self.ctx.emit(Event::Skipped {
            path: path.clone(),
            reason,
        });
        self.report.record_skip(path, reason);
    }
}

/// Execute one step, reporting it and recording the outcome.
pub fn run_step<R: Remote + ?Sized>(
    ctx: &SessionContext,
    remote: &mut R,
    report: &mut RunReport,
    step: Step,
) -> Result<u64, EngineError> {
    ctx.emit(Event::StepStarted { step: step.clone() });
    match remote.execute(&step) {
        Ok(bytes) => {
            ctx.emit(Event::StepCompleted {
                step: step.clone(),
                bytes,
            });
            report.record_done(step, bytes);
            Ok(bytes)
        }
        Err(err) => {
            ctx.emit(Event::StepFailed {
                step: step.clone(),
                error: err.to_string(),
            });
            report.record_failed(step, &err);
            Err(err)
        }
    }
}

/// Fail-soft policy: swallow recorded step failures unless the session is
/// gone.
fn soften<T>(result: Result<T, EngineError>) -> Result<Option<T>, EngineError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_fatal() => Err(err),
        Err(_) => Ok(None),
    }
}
