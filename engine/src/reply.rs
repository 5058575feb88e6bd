//! Control-channel replies and the grammar parsers that read them.
//!
//! Kept apart from the codec and the session so that each parser can be
//! tested on plain strings.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::PasvParseError;

/// One complete server reply, possibly spanning several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit code in [100, 599]
    pub code: u16,
    /// Every received line, terminators stripped, first line included
    pub lines: Vec<String>,
}

/// RFC 959 reply classes, by first digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    PositivePreliminary,
    PositiveCompletion,
    PositiveIntermediate,
    TransientNegative,
    PermanentNegative,
}

impl Reply {
    pub fn new(code: u16, text: &str) -> Self {
        Reply {
            code,
            lines: vec![format!("{} {}", code, text)],
        }
    }

    pub fn is_multi_line(&self) -> bool {
        self.lines.len() > 1
    }

    pub fn class(&self) -> ReplyClass {
        match self.code / 100 {
            1 => ReplyClass::PositivePreliminary,
            2 => ReplyClass::PositiveCompletion,
            3 => ReplyClass::PositiveIntermediate,
            4 => ReplyClass::TransientNegative,
            _ => ReplyClass::PermanentNegative,
        }
    }

    pub fn is_preliminary(&self) -> bool {
        self.class() == ReplyClass::PositivePreliminary
    }

    pub fn is_completion(&self) -> bool {
        self.class() == ReplyClass::PositiveCompletion
    }

    pub fn is_negative(&self) -> bool {
        matches!(
            self.class(),
            ReplyClass::TransientNegative | ReplyClass::PermanentNegative
        )
    }

    /// Only completion and intermediate replies let the calling step proceed.
    pub fn allows_proceed(&self) -> bool {
        matches!(
            self.class(),
            ReplyClass::PositiveCompletion | ReplyClass::PositiveIntermediate
        )
    }

    /// Reply text with the code prefixes removed, lines joined by newlines.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| strip_code(line, self.code))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// True when a negative MKD reply says the directory is already there.
    ///
    /// Servers word this differently ("File exists", "Directory already
    /// exists", "Can't create directory: File exists"); 521 is the RFC 959
    /// code for it.
    pub fn indicates_already_exists(&self) -> bool {
        if !self.is_negative() {
            return false;
        }
        if self.code == 521 {
            return true;
        }
        self.text().to_ascii_lowercase().contains("exists")
    }

    /// Directory name from a `257 "<path>" ...` reply, with `""` unescaped.
    pub fn quoted_path(&self) -> Option<String> {
        let text = self.text();
        let start = text.find('"')?;
        let rest = &text[start + 1..];
        let mut path = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    path.push('"');
                } else {
                    return Some(path);
                }
            } else {
                path.push(c);
            }
        }
        None
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

fn strip_code(line: &str, code: u16) -> &str {
    let prefix = code.to_string();
    match line.strip_prefix(prefix.as_str()) {
        Some(rest) => rest
            .strip_prefix(' ')
            .or_else(|| rest.strip_prefix('-'))
            .unwrap_or(rest),
        None => line,
    }
}

/// Endpoint announced by a `227 Entering Passive Mode` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassiveEndpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl PassiveEndpoint {
    /// Scan reply text for `h1,h2,h3,h4,p1,p2`, tolerating surrounding words.
    ///
    /// The tuple may be parenthesized or bare; every field must fit in a byte.
    pub fn parse(text: &str) -> Result<Self, PasvParseError> {
        static TUPLE: OnceLock<Regex> = OnceLock::new();
        let re = TUPLE.get_or_init(|| {
            Regex::new(r"(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)")
                .expect("static regex")
        });

        let caps = match re.captures(text) {
            Some(caps) => caps,
            None => {
                // report the longest comma-separated run of numbers seen
                let found = text
                    .split(|c: char| !(c.is_ascii_digit() || c == ',' || c == ' '))
                    .map(|run| run.split(',').filter(|f| !f.trim().is_empty()).count())
                    .max()
                    .unwrap_or(0);
                return Err(PasvParseError::MissingFields(found));
            }
        };

        let mut fields = [0u8; 6];
        for (index, field) in fields.iter_mut().enumerate() {
            let raw = &caps[index + 1];
            *field = raw
                .parse::<u8>()
                .map_err(|_| PasvParseError::FieldOutOfRange {
                    index,
                    value: raw.to_string(),
                })?;
        }

        let port = u16::from(fields[4]) * 256 + u16::from(fields[5]);
        if port == 0 {
            return Err(PasvParseError::ZeroPort);
        }
        Ok(PassiveEndpoint {
            ip: Ipv4Addr::new(fields[0], fields[1], fields[2], fields[3]),
            port,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for PassiveEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pasv_standard_reply() {
        let ep = PassiveEndpoint::parse("227 Entering Passive Mode (192,168,1,20,19,137).")
            .expect("valid reply");
        assert_eq!(ep.ip, Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(ep.port, 19 * 256 + 137);
        assert_eq!(ep.to_string(), "192.168.1.20:5001");
    }

    #[test]
    fn test_pasv_without_parentheses() {
        let ep = PassiveEndpoint::parse("Entering Passive Mode 10,0,0,1,4,1").expect("valid");
        assert_eq!(ep.ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ep.port, 1025);
    }

    #[test]
    fn test_pasv_port_formula_extremes() {
        let ep = PassiveEndpoint::parse("(127,0,0,1,255,255)").expect("valid");
        assert_eq!(ep.port, 65535);
        let ep = PassiveEndpoint::parse("(127,0,0,1,0,1)").expect("valid");
        assert_eq!(ep.port, 1);
    }

    #[test]
    fn test_pasv_too_few_fields() {
        let err = PassiveEndpoint::parse("227 Entering Passive Mode (192,168,1,20,19).")
            .expect_err("five fields");
        assert!(matches!(err, PasvParseError::MissingFields(_)));
    }

    #[test]
    fn test_pasv_octet_out_of_range() {
        let err = PassiveEndpoint::parse("227 Entering Passive Mode (192,168,1,256,19,137).")
            .expect_err("256 is not an octet");
        assert_eq!(
            err,
            PasvParseError::FieldOutOfRange {
                index: 3,
                value: "256".to_string()
            }
        );
    }

    #[test]
    fn test_pasv_zero_port() {
        assert_eq!(
            PassiveEndpoint::parse("(127,0,0,1,0,0)"),
            Err(PasvParseError::ZeroPort)
        );
    }

    #[test]
    fn test_reply_classes() {
        assert_eq!(Reply::new(150, "ok").class(), ReplyClass::PositivePreliminary);
        assert!(Reply::new(226, "done").allows_proceed());
        assert!(Reply::new(331, "password").allows_proceed());
        assert!(!Reply::new(150, "opening").allows_proceed());
        assert!(Reply::new(450, "busy").is_negative());
        assert!(Reply::new(550, "no").is_negative());
    }

    #[test]
    fn test_already_exists_detection() {
        assert!(Reply::new(550, "Create directory operation failed: File exists").indicates_already_exists());
        assert!(Reply::new(550, "Directory already exists").indicates_already_exists());
        assert!(Reply::new(521, "\"/a\" directory present").indicates_already_exists());
        assert!(!Reply::new(550, "Permission denied").indicates_already_exists());
        assert!(!Reply::new(257, "\"/a\" exists now").indicates_already_exists());
    }

    #[test]
    fn test_multi_line_text_strips_codes() {
        let reply = Reply {
            code: 220,
            lines: vec![
                "220-Welcome".to_string(),
                "  second line".to_string(),
                "220 Ready".to_string(),
            ],
        };
        assert!(reply.is_multi_line());
        assert_eq!(reply.text(), "Welcome\n  second line\nReady");
    }

    #[test]
    fn test_quoted_path() {
        let reply = Reply::new(257, "\"/home/user\" is the current directory");
        assert_eq!(reply.quoted_path().as_deref(), Some("/home/user"));
        let reply = Reply::new(257, "\"/a \"\"b\"\"\" created");
        assert_eq!(reply.quoted_path().as_deref(), Some("/a \"b\""));
        assert_eq!(Reply::new(257, "no quotes").quoted_path(), None);
    }
}
