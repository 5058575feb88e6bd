//! Control session: owns the control connection and sequences commands.
//!
//! The control channel is strictly request/reply. Each command is written
//! and exactly one reply is read before the next command may go out.

use std::fmt;
use std::io::{self, BufReader};
use std::net::{IpAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use crate::codec;
use crate::config::{SessionContext, SessionSettings};
use crate::error::{EngineError, ProtocolError};
use crate::events::{Event, EventSink};
use crate::reply::{Reply, ReplyClass};

/// Lifecycle of a control session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No control connection yet
    Disconnected,
    /// Greeting received, not logged in
    Connected,
    /// Logged in; commands may be issued
    Authenticated,
    /// A command/reply exchange is in flight
    Busy,
    /// QUIT sent or the connection failed
    Closed,
}

/// Command verbs this client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    User,
    Pass,
    Type,
    Pwd,
    Cwd,
    Pasv,
    List,
    Stor,
    Retr,
    Dele,
    Mkd,
    Rmd,
    Quit,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::User => "USER",
            Verb::Pass => "PASS",
            Verb::Type => "TYPE",
            Verb::Pwd => "PWD",
            Verb::Cwd => "CWD",
            Verb::Pasv => "PASV",
            Verb::List => "LIST",
            Verb::Stor => "STOR",
            Verb::Retr => "RETR",
            Verb::Dele => "DELE",
            Verb::Mkd => "MKD",
            Verb::Rmd => "RMD",
            Verb::Quit => "QUIT",
        }
    }

    fn allowed_before_login(&self) -> bool {
        matches!(self, Verb::User | Verb::Pass | Verb::Quit)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open control connection.
pub struct ControlSession {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    state: SessionState,
    settings: SessionSettings,
    sink: Arc<dyn EventSink>,
    peer_ip: IpAddr,
    /// Working directory right after login, from PWD
    home: Option<String>,
    /// Set after a 1xx reply until the matching completion reply is read
    awaiting_completion: bool,
}

impl ControlSession {
    /// Open the control connection and read the server greeting.
    pub fn connect(ctx: &SessionContext) -> Result<Self, EngineError> {
        let settings = ctx.settings.clone();
        ctx.emit(Event::Connecting {
            host: settings.host.clone(),
            port: settings.port,
        });

        let stream = connect_with_timeout(&settings)?;
        let connect_err = |source: io::Error| EngineError::Connect {
            host: settings.host.clone(),
            port: settings.port,
            source,
        };
        stream
            .set_read_timeout(Some(settings.timeout))
            .map_err(connect_err)?;
        stream
            .set_write_timeout(Some(settings.timeout))
            .map_err(connect_err)?;
        let peer_ip = stream.peer_addr().map_err(connect_err)?.ip();
        let writer = stream.try_clone().map_err(connect_err)?;

        let mut session = ControlSession {
            reader: BufReader::new(stream),
            writer,
            state: SessionState::Disconnected,
            settings,
            sink: Arc::clone(&ctx.sink),
            peer_ip,
            home: None,
            awaiting_completion: false,
        };

        let greeting = match session.read_greeting() {
            Ok(greeting) if greeting.is_completion() => greeting,
            Ok(greeting) => {
                let detail = greeting.to_string();
                return Err(session.greeting_failed(io::ErrorKind::ConnectionRefused, detail));
            }
            Err(EngineError::Protocol(err)) => {
                let kind = match &err {
                    ProtocolError::TimedOut => io::ErrorKind::TimedOut,
                    ProtocolError::ConnectionClosed => io::ErrorKind::ConnectionAborted,
                    _ => io::ErrorKind::InvalidData,
                };
                return Err(session.greeting_failed(kind, format!("bad greeting: {}", err)));
            }
            Err(err) => return Err(err),
        };

        session.state = SessionState::Connected;
        session.sink.emit(&Event::Connected {
            host: session.settings.host.clone(),
            greeting: greeting.text(),
        });
        Ok(session)
    }

    /// Connect, log in, switch to binary type and remember the home directory.
    pub fn open(ctx: &SessionContext) -> Result<Self, EngineError> {
        let mut session = Self::connect(ctx)?;
        session.login()?;

        let reply = session.send_command(Verb::Type, Some("I"))?;
        if !reply.is_completion() {
            return Err(ProtocolError::UnexpectedReply {
                command: "TYPE I".to_string(),
                code: reply.code,
                text: reply.text(),
            }
            .into());
        }

        let reply = session.send_command(Verb::Pwd, None)?;
        if reply.is_completion() {
            session.home = reply.quoted_path();
        }
        Ok(session)
    }

    fn read_greeting(&mut self) -> Result<Reply, EngineError> {
        let mut greeting = self.receive()?;
        // 120: service ready in nnn minutes, the real greeting follows
        while greeting.is_preliminary() {
            greeting = self.receive()?;
        }
        Ok(greeting)
    }

    /// Anything but a 2xx greeting means no FTP service at this address.
    fn greeting_failed(&mut self, kind: io::ErrorKind, detail: String) -> EngineError {
        self.state = SessionState::Closed;
        EngineError::Connect {
            host: self.settings.host.clone(),
            port: self.settings.port,
            source: io::Error::new(kind, detail),
        }
    }

    /// USER then PASS. Any negative reply fails the session.
    pub fn login(&mut self) -> Result<(), EngineError> {
        if self.state != SessionState::Connected {
            return Err(EngineError::InvalidOperation(format!(
                "login requires a fresh connection (state {:?})",
                self.state
            )));
        }

        let username = self.settings.username.clone();
        let reply = self.send_command(Verb::User, Some(&username))?;
        let reply = match reply.class() {
            ReplyClass::PositiveCompletion => reply,
            ReplyClass::PositiveIntermediate => {
                let password = self.settings.password.clone();
                self.send_command(Verb::Pass, Some(&password))?
            }
            _ => return Err(self.auth_failed(reply)),
        };
        if !reply.is_completion() {
            return Err(self.auth_failed(reply));
        }

        self.state = SessionState::Authenticated;
        self.sink.emit(&Event::LoggedIn { username });
        Ok(())
    }

    fn auth_failed(&mut self, reply: Reply) -> EngineError {
        self.state = SessionState::Closed;
        EngineError::Authentication {
            username: self.settings.username.clone(),
            code: reply.code,
            text: reply.text(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn home(&self) -> Option<&str> {
        self.home.as_deref()
    }

    pub(crate) fn peer_ip(&self) -> IpAddr {
        self.peer_ip
    }

    /// Send one command and return its reply; the caller inspects the code.
    pub fn send_command(&mut self, verb: Verb, arg: Option<&str>) -> Result<Reply, EngineError> {
        let ready = match self.state {
            SessionState::Authenticated => true,
            SessionState::Connected => verb.allowed_before_login(),
            _ => false,
        };
        if !ready {
            return Err(EngineError::InvalidOperation(format!(
                "cannot send {} in state {:?}",
                verb, self.state
            )));
        }
        if self.awaiting_completion {
            return Err(EngineError::InvalidOperation(format!(
                "cannot send {} before the pending transfer completes",
                verb
            )));
        }

        let line = match arg {
            Some(arg) => format!("{} {}", verb, arg),
            None => verb.to_string(),
        };
        let shown = match verb {
            Verb::Pass => "PASS ****".to_string(),
            _ => line.clone(),
        };

        let previous = self.state;
        self.state = SessionState::Busy;
        if let Err(e) = codec::write_line(&mut self.writer, &line) {
            self.state = SessionState::Closed;
            return Err(e.into());
        }
        self.sink.emit(&Event::CommandSent { line: shown });

        let reply = self.receive()?;
        self.state = previous;
        if reply.is_preliminary() {
            self.awaiting_completion = true;
        }
        Ok(reply)
    }

    /// Read the reply that closes a transfer announced with a 1xx reply.
    pub fn read_completion(&mut self) -> Result<Reply, EngineError> {
        if !self.awaiting_completion {
            return Err(EngineError::InvalidOperation(
                "no transfer awaiting completion".to_string(),
            ));
        }
        let previous = self.state;
        self.state = SessionState::Busy;
        let reply = self.receive()?;
        self.state = previous;
        self.awaiting_completion = reply.is_preliminary();
        Ok(reply)
    }

    fn receive(&mut self) -> Result<Reply, EngineError> {
        match codec::read_reply(&mut self.reader) {
            Ok(reply) => {
                self.sink.emit(&Event::ReplyReceived {
                    code: reply.code,
                    text: reply.text(),
                });
                Ok(reply)
            }
            Err(e) => {
                self.state = SessionState::Closed;
                Err(e.into())
            }
        }
    }

    /// Issue a single MKD and return the raw reply.
    pub fn make_dir(&mut self, path: &str) -> Result<Reply, EngineError> {
        self.send_command(Verb::Mkd, Some(path))
    }

    /// Create `path` one segment at a time, left to right.
    ///
    /// For `a/b/c` this issues MKD for `a`, `a/b` and `a/b/c`. A reply saying
    /// the directory already exists counts as success. Other negative replies
    /// on intermediate segments are reported and skipped; a negative reply on
    /// the last segment is returned as an error.
    pub fn ensure_remote_path(&mut self, path: &str) -> Result<(), EngineError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut acc = if path.starts_with('/') {
            String::from("/")
        } else {
            String::new()
        };

        for (index, segment) in segments.iter().enumerate() {
            if !acc.is_empty() && !acc.ends_with('/') {
                acc.push('/');
            }
            acc.push_str(segment);

            let reply = self.make_dir(&acc)?;
            if !reply.is_negative() || reply.indicates_already_exists() {
                continue;
            }
            if index + 1 == segments.len() {
                return Err(EngineError::rejected("MKD", &acc, reply.code, &reply.text()));
            }
            self.sink.emit(&Event::DirectoryCreateTolerated {
                path: acc.clone(),
                code: reply.code,
                text: reply.text(),
            });
        }
        Ok(())
    }

    pub fn delete_file(&mut self, path: &str) -> Result<(), EngineError> {
        let reply = self.send_command(Verb::Dele, Some(path))?;
        if !reply.is_completion() {
            return Err(EngineError::rejected("DELE", path, reply.code, &reply.text()));
        }
        Ok(())
    }

    pub fn remove_dir(&mut self, path: &str) -> Result<(), EngineError> {
        let reply = self.send_command(Verb::Rmd, Some(path))?;
        if !reply.is_completion() {
            return Err(EngineError::rejected("RMD", path, reply.code, &reply.text()));
        }
        Ok(())
    }

    /// Decide whether `path` is a directory by trying to enter it.
    ///
    /// On success the session changes back to the home directory.
    pub fn probe_directory(&mut self, path: &str) -> Result<bool, EngineError> {
        let reply = self.send_command(Verb::Cwd, Some(path))?;
        if !reply.is_completion() {
            return Ok(false);
        }
        let home = self.home.clone().unwrap_or_else(|| "/".to_string());
        let back = self.send_command(Verb::Cwd, Some(&home))?;
        if !back.is_completion() {
            return Err(EngineError::rejected("CWD", &home, back.code, &back.text()));
        }
        Ok(true)
    }

    /// Send QUIT best-effort and close the connection.
    pub fn quit(&mut self) {
        if matches!(self.state, SessionState::Closed | SessionState::Disconnected) {
            return;
        }
        self.awaiting_completion = false;
        let _ = self.send_command(Verb::Quit, None);
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
        self.state = SessionState::Closed;
        self.sink.emit(&Event::Disconnected {
            host: self.settings.host.clone(),
        });
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.quit();
    }
}

fn connect_with_timeout(settings: &SessionSettings) -> Result<TcpStream, EngineError> {
    let connect_err = |source: io::Error| EngineError::Connect {
        host: settings.host.clone(),
        port: settings.port,
        source,
    };

    let addrs = (settings.host.as_str(), settings.port)
        .to_socket_addrs()
        .map_err(connect_err)?;

    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, settings.timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(connect_err(last_err))
}
