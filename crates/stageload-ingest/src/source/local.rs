//! Local filesystem source

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::SourceStore;
use crate::error::{LoadError, Result};

/// Reads source files from disk, optionally relative to a root directory
#[derive(Debug, Clone, Default)]
pub struct LocalSource {
    root: Option<PathBuf>,
}

impl LocalSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(location),
            None => PathBuf::from(location),
        }
    }
}

#[async_trait]
impl SourceStore for LocalSource {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn exists(&self, location: &str) -> Result<bool> {
        let path = self.resolve(location);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LoadError::source_unavailable(location, e)),
        }
    }

    async fn read(&self, location: &str) -> Result<Vec<u8>> {
        let path = self.resolve(location);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| LoadError::source_unavailable(location, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "Read local source");
        Ok(bytes)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve(prefix);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| LoadError::source_unavailable(prefix, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LoadError::source_unavailable(prefix, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file {
                files.push(relative_location(Path::new(prefix), &entry.file_name()));
            }
        }

        files.sort();
        Ok(files)
    }
}

fn relative_location(prefix: &Path, name: &std::ffi::OsStr) -> String {
    prefix.join(name).to_string_lossy().into_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_exists_and_list() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.csv"), "id\n2\n").unwrap();
        std::fs::write(dir.path().join("a.csv"), "id\n1\n").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let source = LocalSource::with_root(dir.path());
        assert!(source.exists("a.csv").await.unwrap());
        assert!(!source.exists("missing.csv").await.unwrap());
        assert!(!source.exists("nested").await.unwrap());
        assert_eq!(source.read("a.csv").await.unwrap(), b"id\n1\n");

        let listed = source.list(".").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].ends_with("a.csv"));
        assert!(listed[1].ends_with("b.csv"));
    }

    #[tokio::test]
    async fn test_missing_file_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalSource::with_root(dir.path());

        let err = source.read("gone.csv").await.unwrap_err();
        assert!(matches!(err, LoadError::SourceUnavailable { ref location, .. } if location == "gone.csv"));
        assert!(err.is_retryable());
    }
}
