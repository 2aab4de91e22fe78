use std::io::{Read, Write};

pub const MAGIC: &[u8; 6] = b"TVBNDL";
pub const VERSION: u16 = 1;
pub const HEADER_LEN: u64 = 6 + 2 + 8 + 8 + 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleHeader {
    pub version: u16,
    /// Byte length of the manifest (CBOR)
    pub manifest_len: u64,
    /// Byte length of the data section that follows the manifest
    pub data_len: u64,
    /// blake3 over the data section as stored
    pub digest: [u8; 32],
}

impl BundleHeader {
    pub fn write_to(&self, mut w: impl Write) -> std::io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&self.version.to_le_bytes())?;
        w.write_all(&self.manifest_len.to_le_bytes())?;
        w.write_all(&self.data_len.to_le_bytes())?;
        w.write_all(&self.digest)?;
        Ok(())
    }

    pub fn read_from(mut r: impl Read) -> std::io::Result<Self> {
        let mut magic = [0u8; 6];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "not a bundle",
            ));
        }
        let mut v = [0u8; 2];
        r.read_exact(&mut v)?;
        let version = u16::from_le_bytes(v);
        if version != VERSION {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported bundle version {version}"),
            ));
        }
        let mut ml = [0u8; 8];
        r.read_exact(&mut ml)?;
        let mut dl = [0u8; 8];
        r.read_exact(&mut dl)?;
        let mut digest = [0u8; 32];
        r.read_exact(&mut digest)?;
        Ok(Self {
            version,
            manifest_len: u64::from_le_bytes(ml),
            data_len: u64::from_le_bytes(dl),
            digest,
        })
    }

    pub fn total_len(&self) -> u64 {
        HEADER_LEN
            .saturating_add(self.manifest_len)
            .saturating_add(self.data_len)
    }
}
