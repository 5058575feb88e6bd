//! Passive-mode data channel.
//!
//! Every transfer or listing gets its own data connection: PASV announces an
//! endpoint, the client connects to it, exactly one bulk read or bulk write
//! happens, and the connection is closed.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use crate::error::EngineError;
use crate::reply::PassiveEndpoint;
use crate::session::{ControlSession, Verb};

/// A connected data channel, good for one transfer.
///
/// Both transfer methods consume the stream, so a second use does not
/// compile; dropping it closes the connection.
#[derive(Debug)]
pub struct DataStream {
    stream: TcpStream,
    endpoint: SocketAddr,
}

impl DataStream {
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Read until the server closes the connection, writing into `writer`.
    pub fn receive_into<W: Write + ?Sized>(mut self, writer: &mut W) -> io::Result<u64> {
        let bytes = io::copy(&mut self.stream, writer)?;
        writer.flush()?;
        Ok(bytes)
    }

    /// Write everything from `reader`, then close our side.
    pub fn send_from<R: Read + ?Sized>(mut self, reader: &mut R) -> io::Result<u64> {
        let bytes = io::copy(reader, &mut self.stream)?;
        self.stream.flush()?;
        match self.stream.shutdown(Shutdown::Write) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e),
            _ => {}
        }
        Ok(bytes)
    }
}

/// Send PASV, decode the endpoint and connect to it.
pub fn open_passive(session: &mut ControlSession) -> Result<DataStream, EngineError> {
    let reply = session.send_command(Verb::Pasv, None)?;
    if !reply.is_completion() {
        return Err(EngineError::rejected("PASV", "", reply.code, &reply.text()));
    }

    let text = reply.text();
    let mut endpoint = PassiveEndpoint::parse(&text).map_err(|source| EngineError::PasvParse {
        reply: text.clone(),
        source,
    })?;
    // some servers behind NAT announce 0.0.0.0; reuse the control peer then
    if endpoint.ip.is_unspecified() {
        if let std::net::IpAddr::V4(ip) = session.peer_ip() {
            endpoint.ip = ip;
        }
    }

    let addr = endpoint.socket_addr();
    let timeout = session.settings().timeout;
    let connect_err = |source: io::Error| EngineError::DataConnect {
        endpoint: endpoint.to_string(),
        source,
    };
    let stream = TcpStream::connect_timeout(&addr, timeout).map_err(connect_err)?;
    stream.set_read_timeout(Some(timeout)).map_err(connect_err)?;
    stream.set_write_timeout(Some(timeout)).map_err(connect_err)?;

    Ok(DataStream {
        stream,
        endpoint: addr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::testing::{test_context, MockServer, ServerState};
    use std::sync::Arc;

    #[test]
    fn test_passive_round_trip_through_list() {
        let mut state = ServerState::default();
        state.files.insert("/hello.txt".to_string(), b"hello".to_vec());
        let server = MockServer::start(state);
        let ctx = test_context(server.port(), Arc::new(MemorySink::new()));
        let mut session = ControlSession::open(&ctx).expect("login");

        let data = open_passive(&mut session).expect("pasv");
        assert!(data.endpoint().ip().is_loopback());
        let reply = session.send_command(Verb::List, Some("/")).expect("LIST");
        assert!(reply.is_preliminary());

        let mut listing = Vec::new();
        data.receive_into(&mut listing).expect("read listing");
        let done = session.read_completion().expect("226");
        assert_eq!(done.code, 226);
        assert!(String::from_utf8_lossy(&listing).contains("hello.txt"));
    }

    #[test]
    fn test_malformed_pasv_reply_makes_no_connection() {
        let state = ServerState {
            pasv_reply: Some("227 Entering Passive Mode (127,0,0,1,300,2).".to_string()),
            ..ServerState::default()
        };
        let server = MockServer::start(state);
        let ctx = test_context(server.port(), Arc::new(MemorySink::new()));
        let mut session = ControlSession::open(&ctx).expect("login");

        let err = open_passive(&mut session).expect_err("out of range");
        assert!(matches!(err, EngineError::PasvParse { .. }));
        // the control channel is still in sync
        assert!(session.probe_directory("/").expect("CWD"));
    }

    #[test]
    fn test_pending_transfer_blocks_new_commands() {
        let mut state = ServerState::default();
        state.files.insert("/a".to_string(), b"abc".to_vec());
        let server = MockServer::start(state);
        let ctx = test_context(server.port(), Arc::new(MemorySink::new()));
        let mut session = ControlSession::open(&ctx).expect("login");

        let data = open_passive(&mut session).expect("pasv");
        session.send_command(Verb::Retr, Some("/a")).expect("RETR");
        let err = session.send_command(Verb::Pasv, None).expect_err("busy");
        assert!(matches!(err, EngineError::InvalidOperation(_)));

        let mut body = Vec::new();
        data.receive_into(&mut body).expect("read");
        session.read_completion().expect("226");
        assert_eq!(body, b"abc");
        open_passive(&mut session).expect("free again");
    }
}
