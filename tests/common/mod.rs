#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::sync::Arc;

use gdelt_etl::app::ports::{DurableSink, LoadSink, Notifier, RawSource, RegionSource};
use gdelt_etl::pipeline::processing::regions::{Polygon, Region, RegionSet};
use gdelt_etl::pipeline::storage::in_memory::{
    InMemoryLoadSink, InMemoryQuarantineStore, InMemoryRawSource, InMemoryRegionSource,
    RecordingNotifier,
};
use gdelt_etl::pipeline::{Orchestrator, OrchestratorSettings, PipelinePorts, RunContext};

/// Inside the test county.
pub const IN_LAT: &str = "44.98";
pub const IN_LON: &str = "-93.26";
/// Gulf of Guinea, outside every test region.
pub const OUT_LAT: &str = "0.5";
pub const OUT_LON: &str = "0.5";

/// One 61-column export row with the fields the pipeline reads filled in.
pub fn export_row(id: &str, date: &str, root: &str, lat: &str, lon: &str) -> String {
    let mut cols = vec![String::new(); 61];
    cols[0] = id.to_string();
    cols[1] = date.to_string();
    cols[26] = format!("{}0", root);
    cols[27] = format!("{}0", root);
    cols[28] = root.to_string();
    cols[52] = "Minneapolis, Minnesota, United States".to_string();
    cols[53] = "US".to_string();
    cols[56] = lat.to_string();
    cols[57] = lon.to_string();
    cols[59] = "20240115120000".to_string();
    cols[60] = format!("https://news.example.com/{}", id);
    cols.join("\t")
}

pub fn good_row(id: u32) -> String {
    export_row(&id.to_string(), "20240115", "14", IN_LAT, IN_LON)
}

pub fn unresolved_row(id: u32) -> String {
    export_row(&id.to_string(), "20240115", "14", OUT_LAT, OUT_LON)
}

pub fn export(rows: impl IntoIterator<Item = String>) -> String {
    let mut out: String = rows.into_iter().collect::<Vec<_>>().join("\n");
    out.push('\n');
    out
}

pub fn good_export(n: u32) -> String {
    export((1..=n).map(good_row))
}

/// Two counties sharing the edge at lon -93.0.
pub fn test_regions() -> RegionSet {
    let square = |id: &str, name: &str, x0: f64| {
        Region::new(
            id.to_string(),
            name.to_string(),
            vec![Polygon::new(
                vec![(x0, 44.0), (x0 + 1.0, 44.0), (x0 + 1.0, 45.5), (x0, 45.5)],
                vec![],
            )],
        )
        .unwrap()
    };
    RegionSet::new(vec![
        square("27123", "Ramsey", -93.0),
        square("27053", "Hennepin", -94.0),
    ])
}

/// Run context pinned to the day after the fixture data.
pub fn context() -> RunContext {
    let started: DateTime<Utc> = DateTime::parse_from_rfc3339("2024-01-16T06:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    RunContext::started_at(started)
}

pub struct Harness {
    pub source: Arc<InMemoryRawSource>,
    pub quarantine: Arc<InMemoryQuarantineStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub load_sink: Arc<InMemoryLoadSink>,
    pub orchestrator: Orchestrator,
}

pub struct HarnessBuilder {
    source: InMemoryRawSource,
    regions: InMemoryRegionSource,
    quarantine: InMemoryQuarantineStore,
    notifier: RecordingNotifier,
    load_sink: InMemoryLoadSink,
    settings: OrchestratorSettings,
}

impl HarnessBuilder {
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        Self {
            source: InMemoryRawSource::new(input),
            regions: InMemoryRegionSource::new(test_regions()),
            quarantine: InMemoryQuarantineStore::new(),
            notifier: RecordingNotifier::new(),
            load_sink: InMemoryLoadSink::new(),
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn source(mut self, source: InMemoryRawSource) -> Self {
        self.source = source;
        self
    }

    pub fn regions(mut self, regions: InMemoryRegionSource) -> Self {
        self.regions = regions;
        self
    }

    pub fn quarantine(mut self, quarantine: InMemoryQuarantineStore) -> Self {
        self.quarantine = quarantine;
        self
    }

    pub fn notifier(mut self, notifier: RecordingNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn load_sink(mut self, load_sink: InMemoryLoadSink) -> Self {
        self.load_sink = load_sink;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.settings.dry_run = true;
        self
    }

    pub fn build(self) -> Harness {
        let source = Arc::new(self.source);
        let quarantine = Arc::new(self.quarantine);
        let notifier = Arc::new(self.notifier);
        let load_sink = Arc::new(self.load_sink);
        let ports = PipelinePorts {
            source: source.clone() as Arc<dyn RawSource>,
            regions: Arc::new(self.regions) as Arc<dyn RegionSource>,
            quarantine: quarantine.clone() as Arc<dyn DurableSink>,
            notifier: notifier.clone() as Arc<dyn Notifier>,
            load_sink: load_sink.clone() as Arc<dyn LoadSink>,
        };
        Harness {
            source,
            quarantine,
            notifier,
            load_sink,
            orchestrator: Orchestrator::new(ports, self.settings),
        }
    }
}
