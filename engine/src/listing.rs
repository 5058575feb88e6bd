//! LIST output parser.
//!
//! Only the recursive walks need structure out of a listing: a name, a kind
//! and a size. Two formats are recognised:
//! 1. Unix `ls -l` style: `drwxr-xr-x 2 owner group 4096 Jan  1 12:00 name`
//! 2. DOS/IIS style: `01-01-24  10:00AM       <DIR>          name`
//!
//! Anything else becomes an `Unknown` entry named after the whole line, and
//! the walk decides its kind by probing the server.

use std::sync::OnceLock;

use regex::Regex;

use crate::model::EntryKind;

/// One parsed listing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

fn unix_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^([dlcbps-])[rwxsStTl-]{9}[+@.]?\s+   # type and permissions
            \d+\s+                                # link count
            \S+\s+(?:\S+\s+)?                     # owner, optional group
            (\d+)\s+                              # size
            \w{3}\s+\d{1,2}\s+(?:\d{1,2}:\d{2}|\d{4})\s+  # date
            (.+)$                                 # name
            ",
        )
        .expect("static regex")
    })
}

fn dos_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^\d{2}-\d{2}-\d{2,4}\s+
            \d{1,2}:\d{2}\s*[AaPp][Mm]\s+
            (<DIR>|\d+)\s+
            (.+)$
            ",
        )
        .expect("static regex")
    })
}

/// Parse a whole LIST body, dropping blank lines, `total` lines, `.` and `..`.
pub fn parse_listing(raw: &str) -> Vec<ListEntry> {
    raw.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !is_total_line(line))
        .map(parse_line)
        .filter(|entry| entry.name != "." && entry.name != "..")
        .collect()
}

fn is_total_line(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    parts.next() == Some("total")
        && parts.next().is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
        && parts.next().is_none()
}

/// Parse one listing line.
pub fn parse_line(line: &str) -> ListEntry {
    if let Some(caps) = unix_line().captures(line) {
        let size = caps[2].parse().unwrap_or(0);
        let name = caps[3].trim_end();
        return match &caps[1] {
            "d" => ListEntry {
                name: name.to_string(),
                kind: EntryKind::Directory,
                size: 0,
            },
            "-" => ListEntry {
                name: name.to_string(),
                kind: EntryKind::File,
                size,
            },
            // symlinks may point at either kind; strip the target and probe
            "l" => ListEntry {
                name: name
                    .split_once(" -> ")
                    .map_or(name, |(link, _)| link)
                    .to_string(),
                kind: EntryKind::Unknown,
                size,
            },
            _ => ListEntry {
                name: name.to_string(),
                kind: EntryKind::Unknown,
                size,
            },
        };
    }

    if let Some(caps) = dos_line().captures(line) {
        let name = caps[2].trim_end().to_string();
        return if &caps[1] == "<DIR>" {
            ListEntry {
                name,
                kind: EntryKind::Directory,
                size: 0,
            }
        } else {
            ListEntry {
                name,
                kind: EntryKind::File,
                size: caps[1].parse().unwrap_or(0),
            }
        };
    }

    ListEntry {
        name: line.trim().to_string(),
        kind: EntryKind::Unknown,
        size: 0,
    }
}
