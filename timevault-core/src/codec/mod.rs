//! Payload codecs for bundle entries. Each entry carries its own tag.

use std::io::{self, Read, Write};

use crate::error::Result;

pub const DEFAULT_LEVEL: i32 = 3;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CodecId {
    Store = 0,
    Zstd = 1,
}

impl CodecId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CodecId::Store),
            1 => Some(CodecId::Zstd),
            _ => None,
        }
    }

    /// Streams the plain bytes of an entry into `dst`; returns how many were written.
    pub fn decode(self, src: &mut dyn Read, dst: &mut dyn Write) -> Result<u64> {
        let produced = match self {
            CodecId::Store => io::copy(src, dst)?,
            CodecId::Zstd => io::copy(&mut zstd::stream::Decoder::new(src)?, dst)?,
        };
        Ok(produced)
    }
}

/// zstd-compress `raw`, falling back to storing it when that saves less than
/// `min_gain` of its size.
pub fn encode(raw: Vec<u8>, level: i32, min_gain: f32) -> Result<(CodecId, Vec<u8>)> {
    let packed = zstd::bulk::compress(&raw, level.max(1))?;
    if worth_compressing(raw.len(), packed.len(), min_gain) {
        Ok((CodecId::Zstd, packed))
    } else {
        Ok((CodecId::Store, raw))
    }
}

/// True if compressing `u` bytes down to `c` saves at least `min_gain` of `u`.
pub fn worth_compressing(u: usize, c: usize, min_gain: f32) -> bool {
    (u as f64 - c as f64) >= (u as f64 * min_gain as f64)
}
