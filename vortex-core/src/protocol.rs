//! Parses a single request line into a typed [`Operation`].

/// One parsed request, independent of where the line came from (client
/// socket, peer mirror, or journal replay).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Add {
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Remove {
        key: Vec<u8>,
    },
    Read {
        key: Vec<u8>,
    },
    ReadRemove {
        key: Vec<u8>,
    },
    Watch {
        key: Vec<u8>,
        tag: Vec<u8>,
        republish_key: Option<Vec<u8>>,
        one_shot: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
    pub kind: &'static str,
    pub line: Vec<u8>,
}

impl ScanError {
    fn new(kind: &'static str, line: &[u8]) -> Self {
        Self {
            kind,
            line: line.to_vec(),
        }
    }
}

/// Scans one line (without its trailing newline) into an [`Operation`].
///
/// `line` must already have the trailing `\n` (and any `\r`) stripped by the
/// caller, matching how the worker splits the raw connection bytes.
pub fn scan(line: &[u8]) -> Result<Operation, ScanError> {
    if line.is_empty() {
        return Err(ScanError::new("empty", line));
    }

    let opcode = line[0];
    let rest = &line[1..];

    match opcode {
        b'+' => scan_add(rest, line),
        b'-' => scan_simple_key(rest, line).map(|key| Operation::Remove { key }),
        b'$' => scan_simple_key(rest, line).map(|key| Operation::Read { key }),
        b'!' => scan_simple_key(rest, line).map(|key| Operation::ReadRemove { key }),
        b'*' => scan_watch(rest, line, false),
        b'@' => scan_watch(rest, line, true),
        _ => Err(ScanError::new("unknown_opcode", line)),
    }
}

/// Strips a leading replay-mode prefix (`<timestamp>[.<ms>] `) and re-scans
/// the remainder as a normal request line. Lines with no leading timestamp
/// field fall back to being scanned whole, matching the original replay
/// path's tolerance for bare request lines in a segment.
pub fn scan_replay(line: &[u8]) -> Result<Operation, ScanError> {
    match line.iter().position(|&b| b == b' ') {
        Some(idx) if is_timestamp_prefix(&line[..idx]) => scan(&line[idx + 1..]),
        _ => scan(line),
    }
}

fn is_timestamp_prefix(field: &[u8]) -> bool {
    !field.is_empty()
        && field
            .iter()
            .all(|&b| b.is_ascii_digit() || b == b'-' || b == b':' || b == b'.' || b == b'T')
}

fn scan_add(rest: &[u8], whole: &[u8]) -> Result<Operation, ScanError> {
    let rest = trim_start(rest);
    let space = rest
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| ScanError::new("missing_value", whole))?;
    let key = &rest[..space];
    if key.is_empty() {
        return Err(ScanError::new("empty_key", whole));
    }
    let value = trim_start(&rest[space + 1..]);
    Ok(Operation::Add {
        key: key.to_vec(),
        value: value.to_vec(),
    })
}

fn scan_simple_key(rest: &[u8], whole: &[u8]) -> Result<Vec<u8>, ScanError> {
    let key = trim_start(rest);
    if key.is_empty() {
        return Err(ScanError::new("empty_key", whole));
    }
    Ok(key.to_vec())
}

fn scan_watch(rest: &[u8], whole: &[u8], one_shot: bool) -> Result<Operation, ScanError> {
    let mut tokens = rest.split(|&b| b == b' ').filter(|t| !t.is_empty());

    let key = tokens
        .next()
        .ok_or_else(|| ScanError::new("missing_key", whole))?
        .to_vec();

    let tag_tok = tokens
        .next()
        .ok_or_else(|| ScanError::new("missing_tag", whole))?;
    if tag_tok.first() != Some(&b'#') {
        return Err(ScanError::new("missing_tag", whole));
    }
    let tag = tag_tok[1..].to_vec();

    let republish_key = match tokens.next() {
        None => None,
        Some(tok) => {
            if tok.first() != Some(&b'+') {
                return Err(ScanError::new("bad_republish", whole));
            }
            let pub_key = &tok[1..];
            if pub_key.is_empty() {
                return Err(ScanError::new("bad_republish", whole));
            }
            Some(pub_key.to_vec())
        }
    };

    if tokens.next().is_some() {
        return Err(ScanError::new("trailing_tokens", whole));
    }

    Ok(Operation::Watch {
        key,
        tag,
        republish_key,
        one_shot,
    })
}

fn trim_start(mut b: &[u8]) -> &[u8] {
    while let [b' ', rest @ ..] = b {
        b = rest;
    }
    b
}

/// Builds a `<label>:<value>\n` reply frame — the shape shared by `OK:`,
/// `(n):`, `NF:`, key-prefixed reads, and tag-prefixed notifications.
pub fn colon_frame(label: &[u8], value: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(label.len() + value.len() + 2);
    frame.extend_from_slice(label);
    frame.push(b':');
    frame.extend_from_slice(value);
    frame.push(b'\n');
    frame
}

/// Builds an `error: <kind>: <expr>\n` reply frame.
pub fn error_frame(kind: &str, line: &[u8]) -> Vec<u8> {
    format!("error: {kind}: {}\n", String::from_utf8_lossy(line)).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_add() {
        assert_eq!(
            scan(b"+alpha one").unwrap(),
            Operation::Add {
                key: b"alpha".to_vec(),
                value: b"one".to_vec(),
            }
        );
    }

    #[test]
    fn add_allows_empty_value() {
        assert_eq!(
            scan(b"+alpha ").unwrap(),
            Operation::Add {
                key: b"alpha".to_vec(),
                value: b"".to_vec(),
            }
        );
    }

    #[test]
    fn scans_remove_read_readremove() {
        assert_eq!(
            scan(b"-alpha").unwrap(),
            Operation::Remove {
                key: b"alpha".to_vec()
            }
        );
        assert_eq!(
            scan(b"$alpha").unwrap(),
            Operation::Read {
                key: b"alpha".to_vec()
            }
        );
        assert_eq!(
            scan(b"!alpha").unwrap(),
            Operation::ReadRemove {
                key: b"alpha".to_vec()
            }
        );
    }

    #[test]
    fn scans_watch_with_and_without_republish() {
        assert_eq!(
            scan(b"*a #1").unwrap(),
            Operation::Watch {
                key: b"a".to_vec(),
                tag: b"1".to_vec(),
                republish_key: None,
                one_shot: false,
            }
        );
        assert_eq!(
            scan(b"*a #1 +b").unwrap(),
            Operation::Watch {
                key: b"a".to_vec(),
                tag: b"1".to_vec(),
                republish_key: Some(b"b".to_vec()),
                one_shot: false,
            }
        );
        assert_eq!(
            scan(b"@a #1").unwrap(),
            Operation::Watch {
                key: b"a".to_vec(),
                tag: b"1".to_vec(),
                republish_key: None,
                one_shot: true,
            }
        );
    }

    #[test]
    fn rejects_unknown_opcode() {
        let err = scan(b"?nope").unwrap_err();
        assert_eq!(err.kind, "unknown_opcode");
    }

    #[test]
    fn rejects_watch_missing_tag() {
        assert!(scan(b"*a").is_err());
    }

    #[test]
    fn replay_strips_timestamp_prefix() {
        assert_eq!(
            scan_replay(b"2024-01-02T03:04:05.123 +alpha one").unwrap(),
            Operation::Add {
                key: b"alpha".to_vec(),
                value: b"one".to_vec(),
            }
        );
    }

    #[test]
    fn replay_falls_back_to_whole_line_without_timestamp() {
        assert_eq!(
            scan_replay(b"+alpha one").unwrap(),
            Operation::Add {
                key: b"alpha".to_vec(),
                value: b"one".to_vec(),
            }
        );
    }
}
