use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

use crate::app::ports::{RawPayload, RawSource};
use crate::error::FetchError;
use crate::infra::http_source::extract_first_entry;

/// Reads an export from disk, either the raw tab-separated file or the
/// zipped archive as published.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RawSource for FileSource {
    async fn fetch(&self) -> Result<RawPayload, FetchError> {
        let source_ref = self.path.display().to_string();
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|source| FetchError::Io {
                path: source_ref.clone(),
                source,
            })?;

        let is_zip = self
            .path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);
        let bytes = if is_zip {
            extract_first_entry(&data)?
        } else {
            data
        };
        info!(path = %source_ref, bytes = bytes.len(), "Read local export");
        Ok(RawPayload { source_ref, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::http_source::tests::zip_with;

    #[tokio::test]
    async fn reads_plain_and_zipped_files() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("export.CSV");
        std::fs::write(&plain, b"a\tb\n").unwrap();
        let zipped = dir.path().join("export.CSV.zip");
        std::fs::write(&zipped, zip_with("export.CSV", b"c\td\n")).unwrap();

        let payload = FileSource::new(&plain).fetch().await.unwrap();
        assert_eq!(payload.bytes, b"a\tb\n");

        let payload = FileSource::new(&zipped).fetch().await.unwrap();
        assert_eq!(payload.bytes, b"c\td\n");
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = FileSource::new("/nonexistent/export.CSV").fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
    }
}
