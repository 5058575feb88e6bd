//! Transfer executor: the data-carrying commands of a control session.
//!
//! Each transfer runs the same exchange: PASV and connect, the command
//! (expecting a 1xx reply), one bulk copy over the data channel, then the
//! completion reply on the control channel. The completion reply is always
//! read, even when the local side failed, so the control channel stays in
//! step with the server.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::data::{self, DataStream};
use crate::error::EngineError;
use crate::fs_ops;
use crate::listing::{self, ListEntry};
use crate::model::Step;
use crate::session::{ControlSession, Verb};
use crate::sync::Remote;

impl ControlSession {
    /// STOR a local file; returns the number of bytes sent.
    pub fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, EngineError> {
        // open first so a missing local file never reaches the server
        let file = File::open(local).map_err(|source| EngineError::Io {
            path: local.to_path_buf(),
            source,
        })?;
        let stream = self.start_transfer(Verb::Stor, "STOR", Some(remote))?;
        let sent = stream
            .send_from(&mut BufReader::new(file))
            .map_err(|e| EngineError::transfer_io("STOR", remote, &e));
        self.finish_transfer("STOR", remote, sent)
    }

    /// RETR a remote file into `local`, creating missing parent directories.
    ///
    /// A partially written file is removed when the transfer fails.
    pub fn download(&mut self, remote: &str, local: &Path) -> Result<u64, EngineError> {
        let stream = self.start_transfer(Verb::Retr, "RETR", Some(remote))?;
        let received = match fs_ops::create_local_file(local) {
            Ok(file) => stream
                .receive_into(&mut BufWriter::new(file))
                .map_err(|e| EngineError::transfer_io("RETR", remote, &e)),
            Err(err) => {
                drop(stream);
                let _ = self.finish_transfer("RETR", remote, Ok(0));
                return Err(err);
            }
        };
        let result = self.finish_transfer("RETR", remote, received);
        if result.is_err() {
            let _ = fs::remove_file(local);
        }
        result
    }

    /// RETR a remote file into any writer.
    pub fn retrieve_to(&mut self, remote: &str, writer: &mut dyn Write) -> Result<u64, EngineError> {
        let stream = self.start_transfer(Verb::Retr, "RETR", Some(remote))?;
        let received = stream
            .receive_into(writer)
            .map_err(|e| EngineError::transfer_io("RETR", remote, &e));
        self.finish_transfer("RETR", remote, received)
    }

    /// Raw LIST output for `path`, or for the current directory.
    pub fn listing(&mut self, path: Option<&str>) -> Result<String, EngineError> {
        let shown = path.unwrap_or(".");
        let stream = self.start_transfer(Verb::List, "LIST", path)?;
        let mut raw = Vec::new();
        let received = stream
            .receive_into(&mut raw)
            .map_err(|e| EngineError::transfer_io("LIST", shown, &e));
        self.finish_transfer("LIST", shown, received)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    fn start_transfer(
        &mut self,
        verb: Verb,
        operation: &'static str,
        arg: Option<&str>,
    ) -> Result<DataStream, EngineError> {
        let stream = data::open_passive(self)?;
        let reply = self.send_command(verb, arg)?;
        if !reply.is_preliminary() {
            return Err(EngineError::rejected(
                operation,
                arg.unwrap_or("."),
                reply.code,
                &reply.text(),
            ));
        }
        Ok(stream)
    }

    /// Consume the completion reply, then report the first failure seen.
    fn finish_transfer(
        &mut self,
        operation: &'static str,
        path: &str,
        outcome: Result<u64, EngineError>,
    ) -> Result<u64, EngineError> {
        let reply = self.read_completion()?;
        let bytes = outcome?;
        if !reply.is_completion() {
            return Err(EngineError::rejected(operation, path, reply.code, &reply.text()));
        }
        Ok(bytes)
    }
}

impl Remote for ControlSession {
    fn list(&mut self, path: &str) -> Result<Vec<ListEntry>, EngineError> {
        let raw = self.listing(Some(path))?;
        Ok(listing::parse_listing(&raw))
    }

    fn raw_listing(&mut self, path: &str) -> Result<String, EngineError> {
        self.listing(Some(path))
    }

    fn is_directory(&mut self, path: &str) -> Result<bool, EngineError> {
        self.probe_directory(path)
    }

    fn execute(&mut self, step: &Step) -> Result<u64, EngineError> {
        match step {
            Step::CreateRemoteDir { remote_path } => {
                self.ensure_remote_path(remote_path)?;
                Ok(0)
            }
            Step::CreateLocalDir { local_path } => {
                fs::create_dir_all(local_path).map_err(|source| EngineError::Io {
                    path: local_path.clone(),
                    source,
                })?;
                Ok(0)
            }
            Step::Upload {
                local_path,
                remote_path,
            } => self.upload(local_path, remote_path),
            Step::Download {
                remote_path,
                local_path,
            } => self.download(remote_path, local_path),
            Step::DeleteFile { remote_path } => {
                self.delete_file(remote_path)?;
                Ok(0)
            }
            Step::RemoveDir { remote_path } => {
                self.remove_dir(remote_path)?;
                Ok(0)
            }
        }
    }

    fn fetch(&mut self, path: &str, writer: &mut dyn Write) -> Result<u64, EngineError> {
        self.retrieve_to(path, writer)
    }
}
