//! Line protocol codec for the control channel.
//!
//! Commands go out as single CRLF-terminated lines. Replies come back as one
//! line (`NNN text`) or as a multi-line block opened by `NNN-` and closed by
//! the first line starting with `NNN `.

use std::io::{BufRead, Write};

use crate::error::ProtocolError;
use crate::reply::Reply;

/// Longest control line accepted from the server, terminator included.
pub const MAX_LINE_LEN: usize = 8192;

/// Upper bound on lines in one multi-line reply.
pub const MAX_REPLY_LINES: usize = 1024;

/// Write `text` followed by CRLF and flush.
///
/// `write_all` retries short writes, so the peer never sees a partial
/// command unless the connection fails mid-line.
pub fn write_line<W: Write>(writer: &mut W, text: &str) -> Result<(), ProtocolError> {
    let mut line = Vec::with_capacity(text.len() + 2);
    line.extend_from_slice(text.as_bytes());
    line.extend_from_slice(b"\r\n");
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}

/// Read one line and return it without its terminator.
///
/// A bare `\n` is accepted as terminator as well. End of stream before the
/// terminator fails with `ConnectionClosed`; a read timeout configured on
/// the underlying socket surfaces as `TimedOut`.
pub fn read_line<R: BufRead>(reader: &mut R) -> Result<String, ProtocolError> {
    let mut buf = Vec::new();
    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if available.is_empty() {
            return Err(ProtocolError::ConnectionClosed);
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                buf.extend_from_slice(&available[..pos]);
                reader.consume(pos + 1);
                break;
            }
            None => {
                let len = available.len();
                buf.extend_from_slice(available);
                reader.consume(len);
            }
        }

        if buf.len() > MAX_LINE_LEN {
            return Err(ProtocolError::LineTooLong);
        }
    }

    if buf.len() > MAX_LINE_LEN {
        return Err(ProtocolError::LineTooLong);
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Parse the leading three digits of a reply line.
///
/// Returns the code and whether the line opens a multi-line reply.
pub fn parse_reply_head(line: &str) -> Result<(u16, bool), ProtocolError> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::MalformedLine(line.to_string()));
    }
    let code = bytes[..3]
        .iter()
        .fold(0u16, |acc, &b| acc * 10 + u16::from(b - b'0'));
    if !(100..600).contains(&code) {
        return Err(ProtocolError::MalformedLine(line.to_string()));
    }
    match bytes.get(3) {
        None | Some(b' ') => Ok((code, false)),
        Some(b'-') => Ok((code, true)),
        Some(_) => Err(ProtocolError::MalformedLine(line.to_string())),
    }
}

/// Read one complete reply.
///
/// Lines between the opening `NNN-` and the closing `NNN ` are kept verbatim,
/// including ones that carry another code or none at all.
pub fn read_reply<R: BufRead>(reader: &mut R) -> Result<Reply, ProtocolError> {
    let first = read_line(reader)?;
    let (code, multi) = parse_reply_head(&first)?;
    let mut lines = vec![first];

    if multi {
        let terminator = format!("{} ", code);
        loop {
            let line = read_line(reader)?;
            let done = line.starts_with(&terminator) || line == code.to_string();
            lines.push(line);
            if done {
                break;
            }
            if lines.len() > MAX_REPLY_LINES {
                return Err(ProtocolError::TooManyLines(MAX_REPLY_LINES));
            }
        }
    }

    Ok(Reply { code, lines })
}
