use async_trait::async_trait;
use std::io::{Cursor, Read};
use std::time::Duration;
use tracing::{debug, info};

use crate::app::ports::{RawPayload, RawSource};
use crate::constants::EXPORT_MARKER;
use crate::error::FetchError;

/// Fetches the newest GDELT event export: reads the "last update" master
/// list, downloads the archive it names and extracts it.
pub struct HttpExportSource {
    client: reqwest::Client,
    master_list_url: String,
}

impl HttpExportSource {
    pub fn new(master_list_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let master_list_url = master_list_url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| FetchError::Http {
                url: master_list_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            master_list_url,
        })
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let to_fetch_error = |source: reqwest::Error| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(to_fetch_error)?;
        let bytes = resp.bytes().await.map_err(to_fetch_error)?;
        debug!(url, bytes = bytes.len(), "Downloaded");
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl RawSource for HttpExportSource {
    async fn fetch(&self) -> Result<RawPayload, FetchError> {
        let master = self.get_bytes(&self.master_list_url).await?;
        let master = String::from_utf8_lossy(&master);
        let export_url = select_export_url(&master)
            .ok_or_else(|| FetchError::NoExportEntry(self.master_list_url.clone()))?;
        info!(url = %export_url, "Latest export selected from master list");

        let archive = self.get_bytes(&export_url).await?;
        let bytes = if export_url.to_ascii_lowercase().ends_with(".zip") {
            extract_first_entry(&archive)?
        } else {
            archive
        };
        Ok(RawPayload {
            source_ref: export_url,
            bytes,
        })
    }
}

/// Pick the export URL from a master list. Lines look like
/// `<size> <md5> <url>`; the URL is the last token.
pub fn select_export_url(master_list: &str) -> Option<String> {
    master_list
        .lines()
        .filter_map(|line| line.split_whitespace().last())
        .find(|url| url.contains(EXPORT_MARKER))
        .map(str::to_string)
}

/// Extract the first file entry of a zip archive.
pub fn extract_first_entry(data: &[u8]) -> Result<Vec<u8>, FetchError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| FetchError::Archive(format!("failed to read zip archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| FetchError::Archive(format!("failed to read zip entry {}: {}", i, e)))?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|e| FetchError::Archive(format!("failed to read zip entry {}: {}", name, e)))?;
        debug!(entry = %name, bytes = contents.len(), "Extracted archive entry");
        return Ok(contents);
    }
    Err(FetchError::Archive("zip archive has no file entries".to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn zip_with(name: &str, contents: &[u8]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn picks_export_line_from_master_list() {
        let master = "\
150383 297a16b493de7cf6ca809a7cc31d0b93 http://data.gdeltproject.org/gdeltv2/20240115120000.export.CSV.zip
318084 bb27f78ba45f69a17ea6ed7755e9f8ff http://data.gdeltproject.org/gdeltv2/20240115120000.mentions.CSV.zip
10768507 ea8dde0beb0ba98810a92db068c0ce99 http://data.gdeltproject.org/gdeltv2/20240115120000.gkg.csv.zip
";
        assert_eq!(
            select_export_url(master).as_deref(),
            Some("http://data.gdeltproject.org/gdeltv2/20240115120000.export.CSV.zip")
        );
        assert_eq!(select_export_url("1 abc http://x/mentions.zip\n"), None);
        assert_eq!(select_export_url(""), None);
    }

    #[test]
    fn extracts_first_zip_entry() {
        let archive = zip_with("20240115120000.export.CSV", b"1\t20240115\n");
        assert_eq!(extract_first_entry(&archive).unwrap(), b"1\t20240115\n");
    }

    #[test]
    fn rejects_non_zip_bytes() {
        let err = extract_first_entry(b"not a zip").unwrap_err();
        assert!(matches!(err, FetchError::Archive(_)));
    }
}
