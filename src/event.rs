//! Line-oriented flow events fed to the translator by the host
//!
//! One event per line: `<src ip:port> <dst ip:port> [tcp|udp|<protocol number>]`.
//! The protocol defaults to tcp. Blank lines and `#` comments are skipped.

use crate::nat::Socket;
use crate::{Error, Result};

/// First packet of a flow as reported by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEvent {
    pub src: Socket,
    pub dst: Socket,
    pub ip_protocol: u8,
}

/// Parse one line. `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> Result<Option<FlowEvent>> {
    let line = match line.split_once('#') {
        Some((content, _)) => content,
        None => line,
    }
    .trim();
    if line.is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    if !(2..=3).contains(&fields.len()) {
        return Err(Error::Parse(format!(
            "expected '<src> <dst> [protocol]', got '{}'",
            line
        )));
    }

    let src: Socket = fields[0].parse()?;
    let dst: Socket = fields[1].parse()?;
    let ip_protocol = match fields.get(2) {
        None => 6,
        Some(proto) => parse_protocol(proto)?,
    };

    Ok(Some(FlowEvent {
        src,
        dst,
        ip_protocol,
    }))
}

fn parse_protocol(s: &str) -> Result<u8> {
    match s.to_lowercase().as_str() {
        "tcp" => Ok(6),
        "udp" => Ok(17),
        "icmp" => Ok(1),
        other => other
            .parse()
            .map_err(|_| Error::Parse(format!("unknown protocol '{}'", s))),
    }
}
