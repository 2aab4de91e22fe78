//! Front-matter envelope: `---` line, `key: value` lines, `---` line, blank line, body.

use crate::error::EnvelopeError;

pub mod metadata;

pub use metadata::ItemMetadata;

pub const DELIMITER: &str = "---";
/// Largest header we are willing to scan for a closing delimiter.
pub const MAX_HEADER_LEN: usize = 1 << 20;

/// Raw, ordered `key: value` pairs. No validation happens here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrontMatter {
    entries: Vec<(String, String)>,
}

impl FrontMatter {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The header block including the trailing blank line.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(64 * (self.entries.len() + 2));
        out.push_str(DELIMITER);
        out.push('\n');
        for (k, v) in &self.entries {
            out.push_str(k);
            out.push_str(": ");
            out.push_str(v);
            out.push('\n');
        }
        out.push_str(DELIMITER);
        out.push_str("\n\n");
        out
    }

    fn parse_block(block: &str) -> Self {
        let mut fm = FrontMatter::default();
        for line in block.lines() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let value = value.strip_prefix(' ').unwrap_or(value);
            fm.push(key, value);
        }
        fm
    }
}

/// Header followed by the blank separator line, ready for a payload.
pub fn encode(meta: &ItemMetadata) -> String {
    meta.to_front_matter().render()
}

pub fn encode_with_body(meta: &ItemMetadata, body: &str) -> String {
    let mut out = encode(meta);
    out.push_str(body);
    out
}

/// Split `text` into its front matter and body.
///
/// `None` means the text is not enveloped at all: no opening delimiter, no closing
/// delimiter, or a header larger than [`MAX_HEADER_LEN`].
pub fn decode(text: &str) -> Option<(FrontMatter, &str)> {
    let (block_end, body_start) = locate(text.as_bytes()).ok()??;
    let block = &text[opening_len(text.as_bytes())?..block_end];
    Some((FrontMatter::parse_block(block), &text[body_start..]))
}

/// Decode and validate in one step.
pub fn decode_metadata(text: &str) -> Option<Result<(ItemMetadata, &str), EnvelopeError>> {
    let (fm, body) = decode(text)?;
    Some(fm.to_metadata().map(|m| (m, body)))
}

/// Byte-level split for binary payloads. Returns the front matter and the offset
/// where the body starts.
pub fn split_bytes(bytes: &[u8]) -> Result<Option<(FrontMatter, usize)>, EnvelopeError> {
    let Some((block_end, body_start)) = locate(bytes)? else {
        return Ok(None);
    };
    let Some(open) = opening_len(bytes) else {
        return Ok(None);
    };
    let Ok(block) = std::str::from_utf8(&bytes[open..block_end]) else {
        return Ok(None);
    };
    Ok(Some((FrontMatter::parse_block(block), body_start)))
}

fn opening_len(bytes: &[u8]) -> Option<usize> {
    if bytes.starts_with(b"---\n") {
        Some(4)
    } else if bytes.starts_with(b"---\r\n") {
        Some(5)
    } else {
        None
    }
}

/// Returns (end of the key/value block, start of the body).
fn locate(bytes: &[u8]) -> Result<Option<(usize, usize)>, EnvelopeError> {
    let Some(mut pos) = opening_len(bytes) else {
        return Ok(None);
    };
    while pos < bytes.len() {
        if pos > MAX_HEADER_LEN {
            return Err(EnvelopeError::TooLarge(MAX_HEADER_LEN));
        }
        let line_end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| pos + i)
            .unwrap_or(bytes.len());
        let line = &bytes[pos..line_end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line == DELIMITER.as_bytes() {
            let mut body = (line_end + 1).min(bytes.len());
            if bytes[body..].starts_with(b"\r\n") {
                body += 2;
            } else if bytes[body..].starts_with(b"\n") {
                body += 1;
            }
            return Ok(Some((pos, body)));
        }
        pos = line_end + 1;
    }
    Ok(None)
}
