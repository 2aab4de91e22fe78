use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Relative, `/`-separated
    pub path: String,
    pub mode: u32,
    pub mtime: i64,
    pub u_size: u64,
    pub c_size: u64,
    pub codec: u8,
    /// Offset into the data section
    pub data_off: u64,
    /// blake3 of the uncompressed content
    pub hash: [u8; 32],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: String,
    pub mode: u32,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Meta {
    pub created: i64,
    pub tool: String,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct BundleManifest {
    pub files: Vec<FileEntry>,
    pub dirs: Vec<DirEntry>,
    pub meta: Meta,
}

impl BundleManifest {
    pub fn original_size(&self) -> u64 {
        self.files.iter().map(|f| f.u_size).sum()
    }
}
