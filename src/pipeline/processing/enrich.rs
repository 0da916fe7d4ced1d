use tracing::{info, instrument};

use crate::domain::{EnrichedDataset, EnrichedRecord, EnrichmentStatus, RawDataset, RawRecord};
use crate::observability::metrics;
use crate::pipeline::processing::mappings;
use crate::pipeline::processing::regions::RegionSet;

/// Trait for joining raw records to reference geography
pub trait Enricher {
    /// Consume a parsed dataset and return it with region and label columns
    /// added. Never drops records.
    fn enrich(&self, dataset: RawDataset, regions: &RegionSet) -> EnrichedDataset;
}

/// Point-in-polygon enricher. Records whose coordinates are missing, out of
/// range, or outside every region are tagged `Unresolved`.
#[derive(Debug, Default)]
pub struct SpatialJoinEnricher;

impl SpatialJoinEnricher {
    pub fn new() -> Self {
        Self
    }

    fn enrich_record(record: RawRecord, regions: &RegionSet) -> EnrichedRecord {
        let labels = mappings::labels_for(&record);

        match record.coordinates().and_then(|point| regions.locate(point)) {
            Some(region) => {
                let (id, name) = (region.region_id.clone(), region.name.clone());
                EnrichedRecord::resolved(record, id, name, labels)
            }
            None => EnrichedRecord::unresolved(record, labels),
        }
    }
}

impl Enricher for SpatialJoinEnricher {
    #[instrument(skip_all, fields(records = dataset.len(), regions = regions.len()))]
    fn enrich(&self, dataset: RawDataset, regions: &RegionSet) -> EnrichedDataset {
        let start = std::time::Instant::now();
        let enriched = dataset.map_records(|record| Self::enrich_record(record, regions));

        let resolved = enriched
            .records()
            .iter()
            .filter(|r| r.status() == EnrichmentStatus::Resolved)
            .count();
        let unresolved = enriched.len() - resolved;

        metrics::enrich::records_resolved(resolved as u64);
        metrics::enrich::records_unresolved(unresolved as u64);
        metrics::enrich::duration(start.elapsed().as_secs_f64());
        info!(resolved, unresolved, "Geospatial enrichment completed");

        enriched
    }
}
