//! Source storage collaborators
//!
//! `extract` only needs to read bytes, check existence and list candidates;
//! it never writes to a source.

use async_trait::async_trait;

use crate::error::Result;

mod http;
mod local;

pub use http::HttpSource;
pub use local::LocalSource;

/// Read-only access to flat files or objects
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    async fn exists(&self, location: &str) -> Result<bool>;

    /// Read the full contents of a location.
    ///
    /// A missing or unreadable location is `LoadError::SourceUnavailable`.
    async fn read(&self, location: &str) -> Result<Vec<u8>>;

    /// List locations under a prefix, in lexical order
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Pick a source for a location: `http(s)://` URLs go over HTTP, anything
/// else is a local path
pub fn source_for(location: &str) -> Box<dyn SourceStore> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpSource::new())
    } else {
        Box::new(LocalSource::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_for_dispatches_on_scheme() {
        assert_eq!(source_for("https://example.com/a.csv").kind(), "http");
        assert_eq!(source_for("./data/a.csv").kind(), "local");
    }
}
