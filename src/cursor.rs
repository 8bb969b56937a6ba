//! Cursor encoding.
//!
//! A cursor records, per key, the next offset a subscription should read.
//! Its serialized form is a list of `key,offset` segments joined by `|`,
//! with the offset written as lowercase hex padded to 8 digits:
//!
//! ```text
//! chat,0000002a|presence,00000000
//! ```
//!
//! Keys containing `\`, `|` or `,` are escaped with a backslash.

use crate::error::{BusError, Result};
use crate::types::Offset;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const SEGMENT_SEPARATOR: char = '|';
const FIELD_SEPARATOR: char = ',';
const ESCAPE: char = '\\';

/// Longest accepted hex offset (a full `u64`).
const MAX_OFFSET_DIGITS: usize = 16;

/// Parsed per-key read positions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    positions: BTreeMap<String, Offset>,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a serialized cursor. An empty string yields an empty cursor.
    pub fn parse(input: &str) -> Result<Self> {
        let mut positions = BTreeMap::new();
        if input.is_empty() {
            return Ok(Self { positions });
        }

        for segment in split_unescaped(input, SEGMENT_SEPARATOR)? {
            let fields = split_unescaped(segment, FIELD_SEPARATOR)?;
            let [key, offset] = fields.as_slice() else {
                return Err(BusError::MalformedCursor(format!(
                    "segment {:?} is not of the form key,offset",
                    segment
                )));
            };

            let key = unescape(key)?;
            let offset = parse_offset(&key, offset)?;
            positions.insert(key, offset);
        }

        Ok(Self { positions })
    }

    /// Position recorded for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Offset> {
        self.positions.get(key).copied()
    }

    pub fn set(&mut self, key: impl Into<String>, offset: Offset) {
        self.positions.insert(key.into(), offset);
    }

    pub fn remove(&mut self, key: &str) -> Option<Offset> {
        self.positions.remove(key)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Offset)> + '_ {
        self.positions.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, Offset)> for Cursor {
    fn from_iter<T: IntoIterator<Item = (String, Offset)>>(iter: T) -> Self {
        Self {
            positions: iter.into_iter().collect(),
        }
    }
}

impl FromStr for Cursor {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, offset)) in self.positions.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEGMENT_SEPARATOR)?;
            }
            write!(f, "{}{}{}", escape(key), FIELD_SEPARATOR, offset)?;
        }
        Ok(())
    }
}

/// Split on `separator`, skipping escaped occurrences. Escapes are kept.
fn split_unescaped(input: &str, separator: char) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut chars = input.char_indices();

    while let Some((i, c)) = chars.next() {
        if c == ESCAPE {
            if chars.next().is_none() {
                return Err(BusError::MalformedCursor(format!(
                    "dangling escape at end of {:?}",
                    input
                )));
            }
        } else if c == separator {
            parts.push(&input[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&input[start..]);

    Ok(parts)
}

fn escape(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        if matches!(c, ESCAPE | SEGMENT_SEPARATOR | FIELD_SEPARATOR) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

fn unescape(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            match chars.next() {
                Some(next) => out.push(next),
                None => {
                    return Err(BusError::MalformedCursor(format!(
                        "dangling escape in key {:?}",
                        raw
                    )))
                }
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn parse_offset(key: &str, raw: &str) -> Result<Offset> {
    let invalid = || BusError::InvalidCursorOffset {
        key: key.to_string(),
        offset: raw.to_string(),
    };

    // from_str_radix tolerates a leading sign; cursors never carry one.
    if raw.is_empty()
        || raw.len() > MAX_OFFSET_DIGITS
        || !raw.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(invalid());
    }

    u64::from_str_radix(raw, 16).map(Offset).map_err(|_| invalid())
}
