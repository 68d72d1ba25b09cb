// Response Classifier Module
// Marker matching over the raw receive buffer, signal gain extraction and failure snapshots

use core::fmt;

use crate::modem::{
    RESP_BUSY, RESP_CLOSED, RESP_ERROR, RESP_SERVER_CLOSE_PREFIX, RESP_SERVER_CLOSE_SUFFIX,
};

pub const GAIN_FIELD_LEN: usize = 4;
pub const SNAPSHOT_MAX_LEN: usize = 100;

const FIELD_SEPARATOR: u8 = b',';

/// Cached signal strength of the configured access point, always 4 characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPointGain([u8; GAIN_FIELD_LEN]);

impl AccessPointGain {
    pub const fn unknown() -> Self {
        Self([b' '; GAIN_FIELD_LEN])
    }

    pub fn as_bytes(&self) -> &[u8; GAIN_FIELD_LEN] {
        &self.0
    }
}

impl Default for AccessPointGain {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for AccessPointGain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Substring containment. An empty buffer or an empty marker never matches.
pub fn contains(buffer: &[u8], marker: &str) -> bool {
    find(buffer, marker.as_bytes()).is_some()
}

/// True only if every marker occurs somewhere in the buffer, in any order
pub fn contains_all(buffer: &[u8], markers: &[&str]) -> bool {
    !markers.is_empty() && markers.iter().all(|marker| contains(buffer, marker))
}

pub fn contains_any(buffer: &[u8], markers: &[&str]) -> bool {
    markers.iter().any(|marker| contains(buffer, marker))
}

/// Recognises the modem's report of the server closing the connection.
///
/// The sequence can arrive split across two idle gaps, so either half at the
/// start of the buffer counts.
pub fn is_server_close(buffer: &[u8]) -> bool {
    buffer.starts_with(RESP_SERVER_CLOSE_PREFIX.as_bytes())
        || buffer.starts_with(RESP_SERVER_CLOSE_SUFFIX.as_bytes())
}

/// Short label for a failing response, for logs
pub fn describe_failure(buffer: &[u8]) -> &'static str {
    if buffer.is_empty() {
        "no answer"
    } else if contains(buffer, RESP_BUSY) {
        "modem busy"
    } else if contains(buffer, RESP_ERROR) {
        "modem reported ERROR"
    } else if contains(buffer, RESP_CLOSED) {
        "connection closed"
    } else {
        "unexpected answer"
    }
}

/// Pull the gain of `ap_name` out of a network list response.
///
/// `+CWLAP:("MySSID",-63,...)` yields `" -63"`: from the access point name
/// skip to the first separator, then walk back 4 characters from the next
/// one, padding with spaces when the field is shorter. Returns `None` (and
/// the caller keeps its cached value) when the name or the closing separator
/// is missing.
pub fn extract_gain(buffer: &[u8], ap_name: &str) -> Option<AccessPointGain> {
    let start = find(buffer, ap_name.as_bytes())?;

    let mut separators = buffer[start..]
        .iter()
        .enumerate()
        .filter(|(_, byte)| **byte == FIELD_SEPARATOR)
        .map(|(offset, _)| start + offset);
    let _after_name = separators.next()?;
    let field_end = separators.next()?;

    let mut field = [b' '; GAIN_FIELD_LEN];
    let mut cursor = field_end;
    for slot in field.iter_mut().rev() {
        cursor -= 1;
        let byte = buffer[cursor];
        if byte == FIELD_SEPARATOR {
            break;
        }
        *slot = byte;
    }

    Some(AccessPointGain(field))
}

/// JSON-safe copy of the first bytes of a failing response for the debug report
pub fn sanitize_snapshot(buffer: &[u8]) -> String {
    buffer
        .iter()
        .take(SNAPSHOT_MAX_LEN)
        .map(|&byte| match byte {
            b'\r' => 'r',
            b'\n' => 'n',
            b'"' => '\'',
            b'\\' => '/',
            // control characters, space and '!' shift into the letter range
            0..=b'!' => char::from(byte + 65),
            0x7F..=u8::MAX => '?',
            _ => char::from(byte),
        })
        .collect()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.is_empty() || needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
