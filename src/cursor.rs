//! Opaque resumption tokens for SCAN and the collection scans.
//!
//! A cursor carries the kind of enumeration it belongs to and the last key
//! (or member) returned. It never carries a namespace: the session decides
//! which namespace a cursor is resumed in.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// The cursor that starts an enumeration and that ends one.
pub const START: &str = "0";

const MARKER: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Scan,
    Hash,
    Set,
    ZSet,
}

impl CursorKind {
    fn tag(self) -> u8 {
        match self {
            CursorKind::Scan => b'k',
            CursorKind::Hash => b'h',
            CursorKind::Set => b's',
            CursorKind::ZSet => b'z',
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'k' => Some(CursorKind::Scan),
            b'h' => Some(CursorKind::Hash),
            b's' => Some(CursorKind::Set),
            b'z' => Some(CursorKind::ZSet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid cursor")]
pub struct InvalidCursor;

/// Encode a resume point. The result is never [`START`].
pub fn encode(kind: CursorKind, last_key: &[u8]) -> String {
    let mut raw = Vec::with_capacity(1 + last_key.len());
    raw.push(kind.tag());
    raw.extend_from_slice(last_key);
    let mut cursor = String::with_capacity(1 + raw.len() * 4 / 3 + 4);
    cursor.push(MARKER);
    URL_SAFE_NO_PAD.encode_string(&raw, &mut cursor);
    cursor
}

/// Encode the reply cursor for a page: [`START`] when the page was the last.
pub fn encode_next(kind: CursorKind, next: Option<&[u8]>) -> String {
    match next {
        Some(key) => encode(kind, key),
        None => START.to_string(),
    }
}

/// Decode `cursor` for an enumeration of kind `expected`.
///
/// Returns the key to resume after; empty for [`START`].
pub fn decode(cursor: &str, expected: CursorKind) -> Result<Vec<u8>, InvalidCursor> {
    if cursor == START {
        return Ok(Vec::new());
    }
    let body = cursor.strip_prefix(MARKER).ok_or(InvalidCursor)?;
    let raw = URL_SAFE_NO_PAD.decode(body).map_err(|_| InvalidCursor)?;
    let (&tag, key) = raw.split_first().ok_or(InvalidCursor)?;
    match CursorKind::from_tag(tag) {
        Some(kind) if kind == expected => Ok(key.to_vec()),
        _ => Err(InvalidCursor),
    }
}
