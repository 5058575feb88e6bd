//! Scripted loopback FTP server for unit tests.
//!
//! Serves an in-memory tree over real sockets: one thread per control
//! connection, PASV data connections on ephemeral ports. Behaviour can be
//! bent per test through `ServerState`.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::{Config, SessionContext};
use crate::events::EventSink;

/// Server tree, knobs and the log of received commands.
#[derive(Debug, Clone)]
pub struct ServerState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub reject_login: bool,
    /// MKD of these paths is refused with a permission error
    pub deny_mkdir: BTreeSet<String>,
    /// Sent verbatim instead of the real 227 reply
    pub pasv_reply: Option<String>,
    pub fail_stor: BTreeSet<String>,
    pub fail_retr: BTreeSet<String>,
    pub fail_dele: BTreeSet<String>,
    /// Every command line received, in order
    pub commands: Vec<String>,
}

impl Default for ServerState {
    fn default() -> Self {
        ServerState {
            files: BTreeMap::new(),
            dirs: ["/".to_string()].into_iter().collect(),
            reject_login: false,
            deny_mkdir: BTreeSet::new(),
            pasv_reply: None,
            fail_stor: BTreeSet::new(),
            fail_retr: BTreeSet::new(),
            fail_dele: BTreeSet::new(),
            commands: Vec::new(),
        }
    }
}

impl ServerState {
    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        let direct = |path: &String| {
            path.strip_prefix(&prefix)
                .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
        };

        let mut lines = Vec::new();
        for path in self.dirs.iter().filter(|p| direct(p)) {
            lines.push(format!(
                "drwxr-xr-x    2 ftp      ftp          4096 Jan 01 12:00 {}",
                &path[prefix.len()..]
            ));
        }
        for (path, body) in self.files.iter().filter(|(p, _)| direct(p)) {
            lines.push(format!(
                "-rw-r--r--    1 ftp      ftp      {:>8} Jan 01 12:00 {}",
                body.len(),
                &path[prefix.len()..]
            ));
        }
        lines
    }

    fn has_children(&self, dir: &str) -> bool {
        let prefix = format!("{}/", dir);
        self.dirs.iter().any(|d| d.starts_with(&prefix))
            || self.files.keys().any(|f| f.starts_with(&prefix))
    }
}

pub struct MockServer {
    port: u16,
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn start(state: ServerState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let port = listener.local_addr().expect("mock server addr").port();
        let state = Arc::new(Mutex::new(state));

        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    let _ = Connection::new(stream, shared).serve();
                });
            }
        });

        MockServer { port, state }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Snapshot of the server state.
    pub fn state(&self) -> ServerState {
        self.state.lock().expect("mock state lock").clone()
    }
}

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    state: Arc<Mutex<ServerState>>,
    cwd: String,
    data_listener: Option<TcpListener>,
}

impl Connection {
    fn new(stream: TcpStream, state: Arc<Mutex<ServerState>>) -> Self {
        let _ = stream.set_read_timeout(Some(Duration::from_secs(10)));
        let writer = stream.try_clone().expect("clone mock stream");
        Connection {
            reader: BufReader::new(stream),
            writer,
            state,
            cwd: "/".to_string(),
            data_listener: None,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().expect("mock state lock")
    }

    fn reply(&mut self, text: &str) -> std::io::Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()
    }

    fn resolve(&self, arg: &str) -> String {
        let joined = if arg.starts_with('/') {
            arg.to_string()
        } else if self.cwd == "/" {
            format!("/{}", arg)
        } else {
            format!("{}/{}", self.cwd, arg)
        };
        match joined.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        }
    }

    fn parent(path: &str) -> String {
        match path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(i) => path[..i].to_string(),
        }
    }

    fn serve(mut self) -> std::io::Result<()> {
        self.reply("220-Welcome to the mock FTP server\r\n220 Ready")?;
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            self.state().commands.push(line.clone());

            let (verb, arg) = match line.split_once(' ') {
                Some((verb, arg)) => (verb.to_string(), arg.to_string()),
                None => (line.clone(), String::new()),
            };
            match verb.as_str() {
                "USER" => self.reply("331 Password required")?,
                "PASS" => {
                    if self.state().reject_login {
                        self.reply("530 Login incorrect.")?;
                    } else {
                        self.reply("230 Login successful.")?;
                    }
                }
                "TYPE" => self.reply("200 Switching to Binary mode.")?,
                "PWD" => {
                    let text = format!("257 \"{}\" is the current directory", self.cwd);
                    self.reply(&text)?;
                }
                "CWD" => {
                    let path = self.resolve(&arg);
                    if self.state().dirs.contains(&path) {
                        self.cwd = path;
                        self.reply("250 Directory successfully changed.")?;
                    } else {
                        self.reply("550 Failed to change directory.")?;
                    }
                }
                "PASV" => self.pasv()?,
                "LIST" => {
                    let path = if arg.is_empty() {
                        self.cwd.clone()
                    } else {
                        self.resolve(&arg)
                    };
                    let listing = {
                        let state = self.state();
                        state.dirs.contains(&path).then(|| state.children(&path))
                    };
                    match listing {
                        Some(lines) => {
                            let mut body = lines.join("\r\n");
                            if !body.is_empty() {
                                body.push_str("\r\n");
                            }
                            self.send_data(body.as_bytes())?;
                        }
                        None => self.reply("550 No such directory.")?,
                    }
                }
                "RETR" => {
                    let path = self.resolve(&arg);
                    let body = {
                        let state = self.state();
                        if state.fail_retr.contains(&path) {
                            None
                        } else {
                            state.files.get(&path).cloned()
                        }
                    };
                    match body {
                        Some(body) => self.send_data(&body)?,
                        None => self.reply("550 Failed to open file.")?,
                    }
                }
                "STOR" => {
                    let path = self.resolve(&arg);
                    let refused = {
                        let state = self.state();
                        state.fail_stor.contains(&path)
                            || !state.dirs.contains(&Self::parent(&path))
                    };
                    if refused {
                        self.data_listener = None;
                        self.reply("553 Could not create file.")?;
                    } else {
                        self.receive_data(path)?;
                    }
                }
                "DELE" => {
                    let path = self.resolve(&arg);
                    let removed = {
                        let mut state = self.state();
                        !state.fail_dele.contains(&path) && state.files.remove(&path).is_some()
                    };
                    if removed {
                        self.reply("250 Delete operation successful.")?;
                    } else {
                        self.reply("550 Delete operation failed.")?;
                    }
                }
                "MKD" => {
                    let path = self.resolve(&arg);
                    let text = {
                        let mut state = self.state();
                        if state.dirs.contains(&path) || state.files.contains_key(&path) {
                            "550 Create directory operation failed: File exists".to_string()
                        } else if state.deny_mkdir.contains(&path) {
                            "550 Permission denied.".to_string()
                        } else if !state.dirs.contains(&Self::parent(&path)) {
                            "550 No such file or directory.".to_string()
                        } else {
                            state.dirs.insert(path.clone());
                            format!("257 \"{}\" created", path)
                        }
                    };
                    self.reply(&text)?;
                }
                "RMD" => {
                    let path = self.resolve(&arg);
                    let text = {
                        let mut state = self.state();
                        if !state.dirs.contains(&path) {
                            "550 Remove directory operation failed."
                        } else if state.has_children(&path) {
                            "550 Directory not empty."
                        } else {
                            state.dirs.remove(&path);
                            "250 Remove directory operation successful."
                        }
                    };
                    self.reply(text)?;
                }
                "QUIT" => {
                    self.reply("221 Goodbye.")?;
                    return Ok(());
                }
                _ => self.reply("502 Command not implemented.")?,
            }
        }
    }

    fn pasv(&mut self) -> std::io::Result<()> {
        let custom = self.state().pasv_reply.clone();
        if let Some(text) = custom {
            self.data_listener = None;
            return self.reply(&text);
        }
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        self.data_listener = Some(listener);
        let text = format!(
            "227 Entering Passive Mode (127,0,0,1,{},{}).",
            port / 256,
            port % 256
        );
        self.reply(&text)
    }

    fn accept_data(&mut self) -> std::io::Result<Option<TcpStream>> {
        let Some(listener) = self.data_listener.take() else {
            self.reply("425 Use PASV first.")?;
            return Ok(None);
        };
        self.reply("150 Opening BINARY mode data connection.")?;
        let (stream, _) = listener.accept()?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        Ok(Some(stream))
    }

    fn send_data(&mut self, body: &[u8]) -> std::io::Result<()> {
        let Some(mut stream) = self.accept_data()? else {
            return Ok(());
        };
        let sent = stream.write_all(body).and_then(|_| stream.flush());
        drop(stream);
        match sent {
            Ok(()) => self.reply("226 Transfer complete."),
            Err(_) => self.reply("426 Connection closed; transfer aborted."),
        }
    }

    fn receive_data(&mut self, path: String) -> std::io::Result<()> {
        let Some(mut stream) = self.accept_data()? else {
            return Ok(());
        };
        let mut body = Vec::new();
        match stream.read_to_end(&mut body) {
            Ok(_) => {
                self.state().files.insert(path, body);
                self.reply("226 Transfer complete.")
            }
            Err(_) => self.reply("426 Connection closed; transfer aborted."),
        }
    }
}

/// Listener that answers one connection with `banner` and then waits for
/// the client to hang up; stands in for a service that does not speak FTP.
pub fn banner_peer(banner: &'static [u8]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind banner peer");
    let port = listener.local_addr().expect("banner peer addr").port();
    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        if banner.is_empty() {
            return;
        }
        let _ = stream.set_read_timeout(Some(Duration::from_secs(10)));
        let _ = stream.write_all(banner);
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest);
    });
    port
}

/// Context pointing at a mock server on `port`, remote root `/site`.
pub fn test_context(port: u16, sink: Arc<dyn EventSink>) -> SessionContext {
    let json = format!(
        r#"{{"host":"127.0.0.1","port":{},"username":"tester","password":"secret",
            "remotePath":"/site","timeout":5}}"#,
        port
    );
    let config = Config::from_json_str(&json).expect("valid test config");
    SessionContext::new(&config, sink)
}
