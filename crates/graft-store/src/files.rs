//! File storage collaborator.
//!
//! Binary content of file nodes lives on disk under a configured base path.
//! Incoming content is written to a spool file in the same directory tree and
//! moved into place once complete, so a partially received file is never
//! visible at its final path.

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::Result;

/// Base-path rooted storage for file node content.
#[derive(Debug, Clone)]
pub struct FileStorage {
    base: PathBuf,
}

impl FileStorage {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// Create an empty spool file inside the base directory.
    pub fn spool(&self) -> Result<NamedTempFile> {
        std::fs::create_dir_all(&self.base)?;
        Ok(NamedTempFile::new_in(&self.base)?)
    }

    /// Final location of a stored file.
    ///
    /// The base path and the relative path are joined with exactly one
    /// separator regardless of leading or trailing slashes on either side.
    pub fn final_path(&self, relative: &str) -> PathBuf {
        let relative = relative.trim_start_matches(&['/', '\\'][..]);
        self.base.join(relative)
    }

    /// Move a completed spool to its final location, creating parent
    /// directories as needed.
    pub fn persist(&self, spool: NamedTempFile, relative: &str) -> Result<PathBuf> {
        let path = self.final_path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        spool.persist(&path).map_err(|e| e.error)?;
        tracing::debug!(path = %path.display(), "stored file content");
        Ok(path)
    }

    /// Open a stored file for reading.
    pub async fn open(&self, relative: &str) -> Result<tokio::fs::File> {
        Ok(tokio::fs::File::open(self.final_path(relative)).await?)
    }

    /// Size in bytes of a stored file, if it exists.
    pub async fn size(&self, relative: &str) -> Result<Option<u64>> {
        match tokio::fs::metadata(self.final_path(relative)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_final_path_single_separator() {
        let storage = FileStorage::new("/srv/files/");
        assert_eq!(
            storage.final_path("/docs/a.txt"),
            PathBuf::from("/srv/files/docs/a.txt")
        );
        assert_eq!(
            storage.final_path("docs/a.txt"),
            PathBuf::from("/srv/files/docs/a.txt")
        );

        let storage = FileStorage::new("/srv/files");
        assert_eq!(
            storage.final_path("//docs/a.txt"),
            PathBuf::from("/srv/files/docs/a.txt")
        );
    }

    #[tokio::test]
    async fn test_spool_persist_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        let mut spool = storage.spool().unwrap();
        spool.write_all(b"hello graft").unwrap();

        let path = storage.persist(spool, "/nested/dir/hello.txt").unwrap();
        assert!(path.ends_with("nested/dir/hello.txt"));

        let mut content = String::new();
        storage
            .open("nested/dir/hello.txt")
            .await
            .unwrap()
            .read_to_string(&mut content)
            .await
            .unwrap();
        assert_eq!(content, "hello graft");
        assert_eq!(storage.size("nested/dir/hello.txt").await.unwrap(), Some(11));
        assert_eq!(storage.size("missing.txt").await.unwrap(), None);
    }
}
