mod common;

use common::*;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gdelt_etl::infra::file_source::FileSource;
use gdelt_etl::infra::notifier::LogNotifier;
use gdelt_etl::infra::quarantine_store::{FileQuarantineStore, DATASET_FILE, MANIFEST_FILE, REPORT_FILE};
use gdelt_etl::infra::region_source::GeoJsonRegionSource;
use gdelt_etl::infra::sqlite_sink::{LoadMode, SqliteLoadSink};
use gdelt_etl::pipeline::processing::quality_gate::CHECK_GEO_RESOLUTION;
use gdelt_etl::pipeline::{Orchestrator, OrchestratorSettings, PipelinePorts, RunOutcome};

struct Workspace {
    _dir: tempfile::TempDir,
    input: PathBuf,
    regions: PathBuf,
    quarantine_root: PathBuf,
    database: PathBuf,
}

fn zipped(name: &str, contents: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(name, zip::write::FileOptions::default())
        .unwrap();
    writer.write_all(contents).unwrap();
    writer.finish().unwrap().into_inner()
}

fn workspace(export_text: &str) -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("20240115120000.export.CSV.zip");
    std::fs::write(&input, zipped("20240115120000.export.CSV", export_text.as_bytes())).unwrap();

    let square = |id: &str, name: &str, x0: f64| {
        json!({
            "type": "Feature",
            "properties": {"GEOID": id, "NAME": name},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[x0, 44.0], [x0 + 1.0, 44.0], [x0 + 1.0, 45.5], [x0, 45.5], [x0, 44.0]]]
            }
        })
    };
    let regions = dir.path().join("counties.geojson");
    let doc = json!({
        "type": "FeatureCollection",
        "features": [square("27123", "Ramsey", -93.0), square("27053", "Hennepin", -94.0)]
    });
    std::fs::write(&regions, doc.to_string()).unwrap();

    Workspace {
        quarantine_root: dir.path().join("quarantine"),
        database: dir.path().join("etl.db"),
        input,
        regions,
        _dir: dir,
    }
}

fn orchestrator(ws: &Workspace) -> Orchestrator {
    let ports = PipelinePorts {
        source: Arc::new(FileSource::new(&ws.input)),
        regions: Arc::new(GeoJsonRegionSource::new(
            ws.regions.display().to_string(),
            "GEOID",
            "NAME",
            Duration::from_secs(5),
        )),
        quarantine: Arc::new(FileQuarantineStore::new(&ws.quarantine_root)),
        notifier: Arc::new(LogNotifier),
        load_sink: Arc::new(SqliteLoadSink::new(&ws.database, LoadMode::Append)),
    };
    Orchestrator::new(ports, OrchestratorSettings::default())
}

fn row_count(db: &Path) -> i64 {
    let conn = Connection::open(db).unwrap();
    conn.query_row("SELECT COUNT(*) FROM base_data", [], |row| row.get(0))
        .unwrap()
}

#[tokio::test]
async fn zipped_export_is_enriched_and_loaded_into_sqlite() {
    let ws = workspace(&good_export(25));
    let mut ctx = context();

    let outcome = orchestrator(&ws).run_with_context(&mut ctx).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Loaded { rows: 25, .. }));
    assert_eq!(row_count(&ws.database), 25);
    assert!(!ws.quarantine_root.exists());

    let conn = Connection::open(&ws.database).unwrap();
    let (region, status, run_id, event_label): (String, String, String, String) = conn
        .query_row(
            "SELECT region_id, enrichment_status, run_id, event_label FROM base_data WHERE event_id = 7",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!(region, "27053");
    assert_eq!(status, "RESOLVED");
    assert_eq!(run_id, ctx.run_id.to_string());
    assert_eq!(event_label, "Engage in political dissent");
}

#[tokio::test]
async fn failing_export_is_written_to_quarantine_and_not_loaded() {
    let rows = (1..=8).map(good_row).chain((9..=10).map(unresolved_row));
    let ws = workspace(&export(rows));
    let mut ctx = context();

    let outcome = orchestrator(&ws).run_with_context(&mut ctx).await.unwrap();

    let RunOutcome::Quarantined { receipt, report } = outcome else {
        panic!("expected quarantine");
    };
    assert_eq!(report.failing_check_names(), vec![CHECK_GEO_RESOLUTION]);
    assert!(!ws.database.exists(), "load sink must not be touched");

    let dir = PathBuf::from(&receipt.location);
    assert!(dir.starts_with(&ws.quarantine_root));
    assert!(dir.ends_with(ctx.run_id.to_string()));

    let csv = std::fs::read_to_string(dir.join(DATASET_FILE)).unwrap();
    assert_eq!(csv.lines().count(), 11, "header plus every record");

    let stored_report: Value =
        serde_json::from_slice(&std::fs::read(dir.join(REPORT_FILE)).unwrap()).unwrap();
    assert_eq!(stored_report["verdict"], "FAIL");

    let manifest: Value =
        serde_json::from_slice(&std::fs::read(dir.join(MANIFEST_FILE)).unwrap()).unwrap();
    assert_eq!(manifest["records"], 10);
    assert_eq!(manifest["dataset_sha256"], receipt.sha256.as_str());
    assert_eq!(manifest["failing_checks"], json!([CHECK_GEO_RESOLUTION]));
}

#[tokio::test]
async fn rerunning_the_same_export_in_append_mode_fails_the_load() {
    let ws = workspace(&good_export(3));
    let orchestrator = orchestrator(&ws);

    orchestrator.run().await.unwrap();
    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(err.exit_code(), gdelt_etl::constants::EXIT_ABORTED);
    assert!(err.to_string().contains("base_data"));
    assert_eq!(row_count(&ws.database), 3, "second load rolled back");
}
