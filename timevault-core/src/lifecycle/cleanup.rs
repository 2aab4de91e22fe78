use std::fs;
use std::io;
use std::path::Path;

/// Removes originals after a successful lock or migration.
pub trait SourceRemover: Send + Sync {
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Plain filesystem removal; directories are removed recursively.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsRemover;

impl SourceRemover for FsRemover {
    fn remove(&self, path: &Path) -> io::Result<()> {
        if fs::symlink_metadata(path)?.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }
}
