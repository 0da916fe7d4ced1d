use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::app::ports::RegionSource;
use crate::error::RegionError;
use crate::pipeline::processing::regions::RegionSet;

/// Loads reference geography from a GeoJSON `FeatureCollection`, either a
/// local file or an http(s) URL.
pub struct GeoJsonRegionSource {
    location: String,
    id_property: String,
    name_property: String,
    timeout: Duration,
}

impl GeoJsonRegionSource {
    pub fn new(
        location: impl Into<String>,
        id_property: impl Into<String>,
        name_property: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            location: location.into(),
            id_property: id_property.into(),
            name_property: name_property.into(),
            timeout,
        }
    }

    fn unavailable(&self, reason: impl ToString) -> RegionError {
        RegionError::ReferenceDataUnavailable {
            source_ref: self.location.clone(),
            reason: reason.to_string(),
        }
    }

    fn is_remote(&self) -> bool {
        self.location.starts_with("http://") || self.location.starts_with("https://")
    }

    async fn read_document(&self) -> Result<Vec<u8>, RegionError> {
        if self.is_remote() {
            let client = reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| self.unavailable(e))?;
            let resp = client
                .get(&self.location)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| self.unavailable(e))?;
            let bytes = resp.bytes().await.map_err(|e| self.unavailable(e))?;
            Ok(bytes.to_vec())
        } else {
            tokio::fs::read(&self.location)
                .await
                .map_err(|e| self.unavailable(e))
        }
    }
}

#[async_trait]
impl RegionSource for GeoJsonRegionSource {
    async fn load_regions(&self) -> Result<RegionSet, RegionError> {
        let bytes = self.read_document().await?;
        let doc: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| self.unavailable(format!("invalid JSON: {}", e)))?;
        let regions = RegionSet::from_geojson(&doc, &self.id_property, &self.name_property)
            .map_err(|reason| self.unavailable(reason))?;
        info!(source = %self.location, regions = regions.len(), "Loaded region reference data");
        Ok(regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(path: &std::path::Path) -> GeoJsonRegionSource {
        GeoJsonRegionSource::new(
            path.display().to_string(),
            "GEOID",
            "NAME",
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn loads_feature_collection_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counties.geojson");
        let doc = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"GEOID": "27053", "NAME": "Hennepin"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-94.0, 44.0], [-93.0, 44.0], [-93.0, 45.5], [-94.0, 45.5], [-94.0, 44.0]]]
                }
            }]
        });
        std::fs::write(&path, doc.to_string()).unwrap();

        let regions = source(&path).load_regions().await.unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions.locate((-93.26, 44.98)).map(|r| r.name.as_str()), Some("Hennepin"));
    }

    #[tokio::test]
    async fn unreadable_or_invalid_sources_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.geojson");
        let err = source(&missing).load_regions().await.unwrap_err();
        assert!(matches!(err, RegionError::ReferenceDataUnavailable { .. }));

        let garbage = dir.path().join("garbage.geojson");
        std::fs::write(&garbage, "{not json").unwrap();
        assert!(source(&garbage).load_regions().await.is_err());

        let empty = dir.path().join("empty.geojson");
        std::fs::write(&empty, r#"{"type":"FeatureCollection","features":[]}"#).unwrap();
        let err = source(&empty).load_regions().await.unwrap_err();
        assert!(err.to_string().contains("no usable polygon"));
    }
}
