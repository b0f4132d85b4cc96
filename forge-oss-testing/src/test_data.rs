//! Create local files full of random data to upload
use crate::Result;
use rand::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A file of random data in its own temporary directory.
///
/// The directory and file are deleted when this is dropped.
#[derive(Debug)]
pub struct TestFile {
    _dir: TempDir,
    path: PathBuf,
    data: Vec<u8>,
}

impl TestFile {
    /// Create a file named `name` with `size` bytes of random data.
    ///
    /// The size is specified as a string so we can use human-friendly units like "10 KB" or
    /// "20 MiB"
    pub fn new(name: &str, size: impl AsRef<str>) -> Result<Self> {
        let size = byte_unit::Byte::from_str(size).unwrap().get_bytes() as usize;

        let mut data = vec![0u8; size];
        rand::thread_rng().fill(&mut data[..]);

        Self::with_data(name, data)
    }

    /// Create a file named `name` with the given contents
    pub fn with_data(name: &str, data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(name);

        std::fs::write(&path, &data)?;

        Ok(Self {
            _dir: dir,
            path,
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file's contents, as they were when it was created
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
