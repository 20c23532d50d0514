//! Opaque source handles.
//!
//! A catalog entry never owns its input bytes; it holds a handle that can be
//! opened as a readable stream when staging needs it. Resolution failure
//! surfaces to the staging layer and becomes a per-entry failure outcome.

use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An opaque reference to readable input bytes, owned externally.
pub trait SourceHandle: Send + Sync {
    /// Open the handle as a blocking byte stream.
    fn open(&self) -> std::io::Result<Box<dyn Read + Send>>;

    /// Best-effort description, for logging only.
    fn describe(&self) -> String;
}

/// A source handle backed by a regular file on the local filesystem.
///
/// This is what [`DirectoryScanner`](crate::scanner::DirectoryScanner)
/// produces for discovered files.
pub struct FsSource {
    path: PathBuf,
}

impl FsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceHandle for FsSource {
    fn open(&self) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A source handle over bytes already held in memory, for callers that
/// receive picked content as a buffer rather than a path.
pub struct MemorySource {
    name: String,
    bytes: Arc<Vec<u8>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes: Arc::new(bytes),
        }
    }
}

impl SourceHandle for MemorySource {
    fn open(&self) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.bytes.as_ref().clone())))
    }

    fn describe(&self) -> String {
        format!("<memory:{}>", self.name)
    }
}

/// A candidate for catalog insertion: a source handle plus the display name
/// used for deduplication.
#[derive(Clone)]
pub struct Candidate {
    pub handle: Arc<dyn SourceHandle>,
    pub display_name: String,
}

impl Candidate {
    pub fn new(handle: Arc<dyn SourceHandle>, display_name: impl Into<String>) -> Self {
        Self {
            handle,
            display_name: display_name.into(),
        }
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("display_name", &self.display_name)
            .field("handle", &self.handle.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_source_opens_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.ncm");
        std::fs::write(&path, b"encrypted bytes").unwrap();

        let source = FsSource::new(&path);
        let mut content = Vec::new();
        source.open().unwrap().read_to_end(&mut content).unwrap();

        assert_eq!(content, b"encrypted bytes");
        assert_eq!(source.describe(), path.display().to_string());
    }

    #[test]
    fn test_fs_source_missing_file_fails_to_open() {
        let source = FsSource::new("/nonexistent/song.ncm");
        assert!(source.open().is_err());
    }

    #[test]
    fn test_memory_source_round_trip() {
        let source = MemorySource::new("picked.ncm", vec![1, 2, 3]);
        let mut content = Vec::new();
        source.open().unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, vec![1, 2, 3]);
        assert!(source.describe().contains("picked.ncm"));
    }
}
