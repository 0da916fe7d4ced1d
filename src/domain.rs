//! Record and dataset shapes shared by every pipeline stage.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Columns the pipeline understands. Each one has a fixed semantic type; the
/// schema descriptor decides where it comes from and whether it is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    EventId,
    EventDate,
    EventCode,
    EventBaseCode,
    EventRootCode,
    ActionGeoFullName,
    ActionGeoCountryCode,
    ActionGeoLat,
    ActionGeoLong,
    DateAdded,
    SourceUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticType {
    Integer,
    Float,
    Text,
    Categorical,
    Date,
    DateTime,
}

impl Field {
    pub fn semantic_type(self) -> SemanticType {
        match self {
            Field::EventId => SemanticType::Integer,
            Field::EventDate => SemanticType::Date,
            Field::EventCode
            | Field::EventBaseCode
            | Field::EventRootCode
            | Field::ActionGeoCountryCode => SemanticType::Categorical,
            Field::ActionGeoFullName | Field::SourceUrl => SemanticType::Text,
            Field::ActionGeoLat | Field::ActionGeoLong => SemanticType::Float,
            Field::DateAdded => SemanticType::DateTime,
        }
    }

    /// Text and categorical fields, the ones a value domain can constrain.
    pub fn is_textual(self) -> bool {
        matches!(self.semantic_type(), SemanticType::Text | SemanticType::Categorical)
    }

    /// Column name as published in the GDELT codebook.
    pub fn source_name(self) -> &'static str {
        match self {
            Field::EventId => "GLOBALEVENTID",
            Field::EventDate => "SQLDATE",
            Field::EventCode => "EventCode",
            Field::EventBaseCode => "EventBaseCode",
            Field::EventRootCode => "EventRootCode",
            Field::ActionGeoFullName => "ActionGeo_FullName",
            Field::ActionGeoCountryCode => "ActionGeo_CountryCode",
            Field::ActionGeoLat => "ActionGeo_Lat",
            Field::ActionGeoLong => "ActionGeo_Long",
            Field::DateAdded => "DATEADDED",
            Field::SourceUrl => "SOURCEURL",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source_name())
    }
}

/// One decoded row of the event export. Empty source cells are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub event_id: Option<i64>,
    pub event_date: Option<NaiveDate>,
    pub event_code: Option<String>,
    pub event_base_code: Option<String>,
    pub event_root_code: Option<String>,
    pub action_geo_full_name: Option<String>,
    pub action_geo_country_code: Option<String>,
    pub action_geo_lat: Option<f64>,
    pub action_geo_long: Option<f64>,
    pub date_added: Option<NaiveDateTime>,
    pub source_url: Option<String>,
}

impl RawRecord {
    pub fn is_present(&self, field: Field) -> bool {
        match field {
            Field::EventId => self.event_id.is_some(),
            Field::EventDate => self.event_date.is_some(),
            Field::ActionGeoLat => self.action_geo_lat.is_some(),
            Field::ActionGeoLong => self.action_geo_long.is_some(),
            Field::DateAdded => self.date_added.is_some(),
            other => self.text(other).is_some(),
        }
    }

    /// Borrow a text or categorical field. Non-text fields return `None`.
    pub fn text(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::EventCode => &self.event_code,
            Field::EventBaseCode => &self.event_base_code,
            Field::EventRootCode => &self.event_root_code,
            Field::ActionGeoFullName => &self.action_geo_full_name,
            Field::ActionGeoCountryCode => &self.action_geo_country_code,
            Field::SourceUrl => &self.source_url,
            _ => return None,
        };
        value.as_deref()
    }

    /// `(longitude, latitude)` when both are present, finite and inside the
    /// WGS84 range.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let lat = self.action_geo_lat?;
        let lon = self.action_geo_long?;
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some((lon, lat))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrichmentStatus {
    Resolved,
    Unresolved,
}

impl EnrichmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnrichmentStatus::Resolved => "RESOLVED",
            EnrichmentStatus::Unresolved => "UNRESOLVED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    Resolved { region_id: String, region_name: String },
    Unresolved,
}

/// Human-readable labels for the coded columns. Unmapped or missing codes
/// read `"Unknown"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeLabels {
    pub event: String,
    pub event_base: String,
    pub event_root: String,
    pub country_iso2: String,
}

/// A raw record joined to the region containing its action coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub raw: RawRecord,
    resolution: Resolution,
    pub labels: CodeLabels,
}

impl EnrichedRecord {
    pub fn resolved(raw: RawRecord, region_id: String, region_name: String, labels: CodeLabels) -> Self {
        Self {
            raw,
            resolution: Resolution::Resolved {
                region_id,
                region_name,
            },
            labels,
        }
    }

    pub fn unresolved(raw: RawRecord, labels: CodeLabels) -> Self {
        Self {
            raw,
            resolution: Resolution::Unresolved,
            labels,
        }
    }

    pub fn status(&self) -> EnrichmentStatus {
        match self.resolution {
            Resolution::Resolved { .. } => EnrichmentStatus::Resolved,
            Resolution::Unresolved => EnrichmentStatus::Unresolved,
        }
    }

    pub fn region_id(&self) -> Option<&str> {
        match &self.resolution {
            Resolution::Resolved { region_id, .. } => Some(region_id),
            Resolution::Unresolved => None,
        }
    }

    pub fn region_name(&self) -> Option<&str> {
        match &self.resolution {
            Resolution::Resolved { region_name, .. } => Some(region_name),
            Resolution::Unresolved => None,
        }
    }

    /// WKT point for the spatial column, `None` when coordinates are unusable.
    pub fn point_wkt(&self) -> Option<String> {
        self.raw
            .coordinates()
            .map(|(lon, lat)| format!("POINT({} {})", lon, lat))
    }
}

/// The single unit of work handed from stage to stage. Not `Clone`: each
/// stage takes ownership and passes it on.
#[derive(Debug, PartialEq)]
pub struct Dataset<R> {
    records: Vec<R>,
    source_rows: usize,
    dropped_rows: usize,
    /// Non-empty cells per field that did not parse as the field's type,
    /// whether the row was then dropped or the cell nulled.
    format_failures: BTreeMap<Field, usize>,
}

pub type RawDataset = Dataset<RawRecord>;
pub type EnrichedDataset = Dataset<EnrichedRecord>;

impl<R> Dataset<R> {
    pub fn new(records: Vec<R>, source_rows: usize, dropped_rows: usize) -> Self {
        Self {
            records,
            source_rows,
            dropped_rows,
            format_failures: BTreeMap::new(),
        }
    }

    pub fn with_format_failures(mut self, format_failures: BTreeMap<Field, usize>) -> Self {
        self.format_failures = format_failures;
        self
    }

    /// Convenience for datasets built in memory with nothing dropped.
    pub fn from_records(records: Vec<R>) -> Self {
        let n = records.len();
        Self::new(records, n, 0)
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Non-empty rows seen in the source, including dropped ones.
    pub fn source_rows(&self) -> usize {
        self.source_rows
    }

    pub fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    pub fn format_failures(&self) -> &BTreeMap<Field, usize> {
        &self.format_failures
    }

    /// Malformed cells of `field`.
    pub fn format_failures_for(&self, field: Field) -> usize {
        self.format_failures.get(&field).copied().unwrap_or(0)
    }

    pub fn into_records(self) -> Vec<R> {
        self.records
    }

    /// Consume the dataset and rebuild it record by record, keeping the
    /// row accounting.
    pub fn map_records<T, F>(self, f: F) -> Dataset<T>
    where
        F: FnMut(R) -> T,
    {
        Dataset {
            records: self.records.into_iter().map(f).collect(),
            source_rows: self.source_rows,
            dropped_rows: self.dropped_rows,
            format_failures: self.format_failures,
        }
    }
}
