pub mod schema;

use chrono::{NaiveDate, NaiveDateTime};
use csv::ByteRecord;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::domain::{Field, RawDataset, RawRecord, SemanticType};
use crate::error::ParseError;
use crate::observability::metrics;

pub use schema::{FieldSpec, SchemaDescriptor};

/// Parsed dataset plus the number of rows dropped for coercion or shape
/// problems.
#[derive(Debug)]
pub struct ParseOutput {
    pub dataset: RawDataset,
    pub dropped_rows: usize,
}

pub trait Parser {
    fn parse(&self, bytes: &[u8]) -> Result<ParseOutput, ParseError>;
}

/// A wrapper that adds metrics to any parser implementation
pub struct MetricsParser<P: Parser> {
    inner: P,
}

impl<P: Parser> MetricsParser<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: Parser> Parser for MetricsParser<P> {
    fn parse(&self, bytes: &[u8]) -> Result<ParseOutput, ParseError> {
        let start_time = std::time::Instant::now();
        metrics::parser::bytes_processed(bytes.len());

        match self.inner.parse(bytes) {
            Ok(output) => {
                metrics::parser::parse_success();
                metrics::parser::records_extracted(output.dataset.len() as u64);
                metrics::parser::rows_dropped(output.dropped_rows as u64);
                metrics::parser::duration(start_time.elapsed().as_secs_f64());
                Ok(output)
            }
            Err(e) => {
                metrics::parser::parse_error();
                metrics::parser::duration(start_time.elapsed().as_secs_f64());
                Err(e)
            }
        }
    }
}

/// Parser for header-less, tab-separated GDELT event exports.
pub struct TsvExportParser {
    schema: SchemaDescriptor,
}

impl TsvExportParser {
    pub fn new(schema: SchemaDescriptor) -> Self {
        Self { schema }
    }
}

impl Parser for TsvExportParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParseOutput, ParseError> {
        parse_export(bytes, &self.schema)
    }
}

/// Decode an export into a typed dataset.
///
/// The first non-empty row decides whether the input has the declared shape
/// at all; a mismatch there is a `SchemaMismatch`. Later rows with a
/// different column count, and rows whose required fields fail coercion, are
/// dropped and counted. Every malformed cell is also tallied per field on the
/// dataset so the quality gate can judge format problems.
pub fn parse_export(bytes: &[u8], schema: &SchemaDescriptor) -> Result<ParseOutput, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(bytes);

    let mut records = Vec::new();
    let mut source_rows = 0usize;
    let mut dropped_rows = 0usize;
    let mut format_failures: BTreeMap<Field, usize> = BTreeMap::new();
    let mut shape_checked = false;

    for result in reader.byte_records() {
        let row = result?;
        if is_blank(&row) {
            continue;
        }
        source_rows += 1;
        let line = row.position().map(|p| p.line()).unwrap_or(0);

        if row.len() != schema.expected_columns {
            if !shape_checked {
                return Err(ParseError::SchemaMismatch {
                    expected: schema.expected_columns,
                    found: row.len(),
                });
            }
            debug!(line, columns = row.len(), "Dropping row with unexpected column count");
            dropped_rows += 1;
            continue;
        }
        shape_checked = true;

        match coerce_row(&row, schema, &mut format_failures) {
            Ok(record) => records.push(record),
            Err(reason) => {
                debug!(line, %reason, "Dropping row that failed coercion");
                dropped_rows += 1;
            }
        }
    }

    if dropped_rows > 0 {
        warn!(dropped_rows, source_rows, "Rows dropped during parsing");
    }
    if !format_failures.is_empty() {
        warn!(?format_failures, "Malformed cells found during parsing");
    }
    info!(records = records.len(), dropped_rows, "Parsed export");

    Ok(ParseOutput {
        dataset: RawDataset::new(records, source_rows, dropped_rows).with_format_failures(format_failures),
        dropped_rows,
    })
}

fn is_blank(row: &ByteRecord) -> bool {
    row.iter().all(|cell| cell.iter().all(u8::is_ascii_whitespace))
}

/// A coerced cell value.
enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

/// Coerce every declared field. All malformed cells are tallied before a
/// required-field failure rejects the row.
fn coerce_row(
    row: &ByteRecord,
    schema: &SchemaDescriptor,
    format_failures: &mut BTreeMap<Field, usize>,
) -> Result<RawRecord, String> {
    let mut record = RawRecord::default();
    let mut rejection = None;
    for spec in &schema.fields {
        let raw = row.get(spec.column).unwrap_or_default();
        let value = match coerce_cell(raw, spec.field, schema) {
            Ok(value) => value,
            Err(reason) => {
                *format_failures.entry(spec.field).or_default() += 1;
                if spec.required {
                    rejection.get_or_insert_with(|| format!("{}: {}", spec.field, reason));
                } else {
                    debug!(field = %spec.field, %reason, "Optional field failed coercion, treating as null");
                }
                None
            }
        };
        if let Some(value) = value {
            assign(&mut record, spec.field, value);
        }
    }
    match rejection {
        Some(reason) => Err(reason),
        None => Ok(record),
    }
}

/// Empty cells are null, not failures.
fn coerce_cell(raw: &[u8], field: Field, schema: &SchemaDescriptor) -> Result<Option<Value>, String> {
    let text = std::str::from_utf8(raw).map_err(|_| "invalid UTF-8".to_string())?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let value = match field.semantic_type() {
        SemanticType::Integer => text
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| format!("'{}' is not an integer: {}", text, e))?,
        SemanticType::Float => text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| format!("'{}' is not a number: {}", text, e))?,
        SemanticType::Text | SemanticType::Categorical => Value::Text(text.to_string()),
        SemanticType::Date => NaiveDate::parse_from_str(text, &schema.date_format)
            .map(Value::Date)
            .map_err(|e| format!("'{}' does not match {}: {}", text, schema.date_format, e))?,
        SemanticType::DateTime => NaiveDateTime::parse_from_str(text, &schema.datetime_format)
            .map(Value::DateTime)
            .map_err(|e| format!("'{}' does not match {}: {}", text, schema.datetime_format, e))?,
    };
    Ok(Some(value))
}

fn assign(record: &mut RawRecord, field: Field, value: Value) {
    match (field, value) {
        (Field::EventId, Value::Integer(v)) => record.event_id = Some(v),
        (Field::EventDate, Value::Date(v)) => record.event_date = Some(v),
        (Field::EventCode, Value::Text(v)) => record.event_code = Some(v),
        (Field::EventBaseCode, Value::Text(v)) => record.event_base_code = Some(v),
        (Field::EventRootCode, Value::Text(v)) => record.event_root_code = Some(v),
        (Field::ActionGeoFullName, Value::Text(v)) => record.action_geo_full_name = Some(v),
        (Field::ActionGeoCountryCode, Value::Text(v)) => record.action_geo_country_code = Some(v),
        (Field::ActionGeoLat, Value::Float(v)) => record.action_geo_lat = Some(v),
        (Field::ActionGeoLong, Value::Float(v)) => record.action_geo_long = Some(v),
        (Field::DateAdded, Value::DateTime(v)) => record.date_added = Some(v),
        (Field::SourceUrl, Value::Text(v)) => record.source_url = Some(v),
        // semantic_type() fixes the variant per field
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, date: &str, root: &str, lat: &str, lon: &str) -> String {
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
        cols[60] = "https://example.com/a".to_string();
        cols.join("\t")
    }

    fn parse(input: &str) -> Result<ParseOutput, ParseError> {
        parse_export(input.as_bytes(), &SchemaDescriptor::gdelt_v2_export())
    }

    #[test]
    fn parses_well_formed_rows() {
        let input = format!(
            "{}\n{}\n",
            row("1001", "20240115", "14", "44.98", "-93.26"),
            row("1002", "20240114", "19", "", "")
        );
        let output = parse(&input).unwrap();
        assert_eq!(output.dropped_rows, 0);
        assert_eq!(output.dataset.len(), 2);

        let first = &output.dataset.records()[0];
        assert_eq!(first.event_id, Some(1001));
        assert_eq!(first.event_date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(first.event_root_code.as_deref(), Some("14"));
        assert_eq!(first.action_geo_lat, Some(44.98));
        assert!(first.date_added.is_some());

        let second = &output.dataset.records()[1];
        assert_eq!(second.action_geo_lat, None);
        assert_eq!(second.coordinates(), None);
    }

    #[test]
    fn wrong_column_count_on_first_row_is_schema_mismatch() {
        let err = parse("1\t20240115\tfoo\n").unwrap_err();
        assert!(matches!(
            err,
            ParseError::SchemaMismatch {
                expected: 61,
                found: 3
            }
        ));
    }

    #[test]
    fn later_short_rows_are_dropped_and_counted() {
        let input = format!(
            "{}\n1\t2\t3\n{}\n",
            row("1", "20240115", "14", "1", "1"),
            row("2", "20240115", "14", "1", "1")
        );
        let output = parse(&input).unwrap();
        assert_eq!(output.dataset.len(), 2);
        assert_eq!(output.dropped_rows, 1);
        assert_eq!(output.dataset.source_rows(), 3);
    }

    #[test]
    fn required_coercion_failure_drops_row_but_null_is_kept() {
        let input = format!(
            "{}\n{}\n{}\n",
            row("abc", "20240115", "14", "1", "1"),
            row("", "20240115", "14", "1", "1"),
            row("3", "2024-01-15", "14", "1", "1")
        );
        let output = parse(&input).unwrap();
        assert_eq!(output.dropped_rows, 2);
        assert_eq!(output.dataset.len(), 1);
        assert_eq!(output.dataset.records()[0].event_id, None);
        assert_eq!(output.dataset.format_failures_for(Field::EventId), 1);
        assert_eq!(output.dataset.format_failures_for(Field::EventDate), 1);
    }

    #[test]
    fn malformed_cells_are_tallied_per_field() {
        let bad_added = row("8", "20240115", "14", "1", "1").replace("20240115120000", "2024-01-15 12:00");
        let input = format!(
            "{}\n{}\n{}\n",
            bad_added,
            row("9", "15/01/2024", "14", "north", "1"),
            row("10", "20240115", "14", "1", "1"),
        );
        let output = parse(&input).unwrap();

        assert_eq!(output.dropped_rows, 1);
        assert_eq!(output.dataset.len(), 2);
        assert_eq!(output.dataset.records()[0].date_added, None);
        let failures = output.dataset.format_failures();
        assert_eq!(failures.get(&Field::DateAdded), Some(&1));
        assert_eq!(failures.get(&Field::EventDate), Some(&1));
        // the dropped row's other malformed cell still counts
        assert_eq!(failures.get(&Field::ActionGeoLat), Some(&1));
        assert_eq!(failures.get(&Field::EventId), None);
    }

    #[test]
    fn optional_coercion_failure_becomes_null() {
        let input = row("7", "20240115", "14", "north", "-93.2");
        let output = parse(&input).unwrap();
        assert_eq!(output.dropped_rows, 0);
        assert_eq!(output.dataset.records()[0].action_geo_lat, None);
        assert_eq!(output.dataset.records()[0].action_geo_long, Some(-93.2));
    }

    #[test]
    fn empty_input_is_an_empty_dataset() {
        let output = parse("").unwrap();
        assert!(output.dataset.is_empty());
        assert_eq!(output.dropped_rows, 0);
    }
}
