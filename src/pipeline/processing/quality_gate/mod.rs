use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::{EnrichedDataset, EnrichmentStatus, Field};
use crate::pipeline::processing::mappings;

pub const CHECK_REQUIRED_FIELDS: &str = "required_fields";
pub const CHECK_DATE_RANGE: &str = "date_range";
pub const CHECK_VALUE_DOMAIN: &str = "value_domain";
pub const CHECK_DUPLICATE_KEYS: &str = "duplicate_keys";
pub const CHECK_GEO_RESOLUTION: &str = "geo_resolution";
pub const CHECK_RECORD_COUNT: &str = "record_count";

/// How many offending values a detail message lists.
const SAMPLE_LIMIT: usize = 5;

/// Quality Gate verdict for a dataset
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Outcome of one named check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityCheckResult {
    pub check_name: String,
    pub passed: bool,
    pub failing_record_count: usize,
    /// Human-readable description of what was found
    pub detail: String,
}

impl QualityCheckResult {
    fn new(check_name: &str, failing_record_count: usize, detail: String) -> Self {
        Self {
            check_name: check_name.to_string(),
            passed: failing_record_count == 0,
            failing_record_count,
            detail,
        }
    }
}

/// Ordered check results plus the overall verdict. Contains no timestamps:
/// assessing the same dataset twice yields an equal report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityReport {
    pub verdict: Verdict,
    pub checks: Vec<QualityCheckResult>,
    pub total_records: usize,
    pub dropped_rows: usize,
    /// The quality rule set version used
    pub rule_version: String,
}

impl QualityReport {
    pub fn from_results(
        checks: Vec<QualityCheckResult>,
        total_records: usize,
        dropped_rows: usize,
        rule_version: String,
    ) -> Self {
        let verdict = if checks.iter().all(|c| c.passed) {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        Self {
            verdict,
            checks,
            total_records,
            dropped_rows,
            rule_version,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn failing_checks(&self) -> impl Iterator<Item = &QualityCheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn failing_check_names(&self) -> Vec<&str> {
        self.failing_checks().map(|c| c.check_name.as_str()).collect()
    }

    pub fn check(&self, name: &str) -> Option<&QualityCheckResult> {
        self.checks.iter().find(|c| c.check_name == name)
    }

    /// One-line summary for logs and alerts.
    pub fn summary(&self) -> String {
        match self.verdict {
            Verdict::Pass => format!(
                "PASS: {} records, all {} checks passed",
                self.total_records,
                self.checks.len()
            ),
            Verdict::Fail => {
                let failing: Vec<String> = self
                    .failing_checks()
                    .map(|c| format!("{} ({} records)", c.check_name, c.failing_record_count))
                    .collect();
                format!(
                    "FAIL: {} records, failing checks: {}",
                    self.total_records,
                    failing.join(", ")
                )
            }
        }
    }
}

/// A single named rule evaluated over the whole dataset.
pub trait QualityCheck: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, dataset: &EnrichedDataset) -> QualityCheckResult;
}

/// Trait for implementing Quality Gate assessment logic
pub trait QualityGate {
    /// Assess a dataset. Pure: no persistence, alerting, or aborting.
    fn assess(&self, dataset: &EnrichedDataset) -> QualityReport;
}

/// Configuration for Quality Gate assessment rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Rule version identifier
    pub rule_version: String,
    /// Fields that must be non-null; the identifier and event date are
    /// always included
    pub required_fields: Vec<Field>,
    /// Earliest accepted event date
    pub min_event_date: NaiveDate,
    /// Largest accepted share of unresolved records (0.0 to 1.0)
    pub max_unresolved_fraction: f64,
    /// Smallest dataset accepted for loading
    pub min_records: usize,
    /// Permitted values per categorical field
    pub value_domains: BTreeMap<Field, Vec<String>>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        let mut value_domains = BTreeMap::new();
        value_domains.insert(Field::EventRootCode, mappings::event_root_codes());
        Self {
            rule_version: "v1.0.0".to_string(),
            required_fields: vec![Field::EventId, Field::EventDate],
            min_event_date: NaiveDate::from_ymd_opt(1979, 1, 1).unwrap_or(NaiveDate::MIN),
            max_unresolved_fraction: 0.10,
            min_records: 1,
            value_domains,
        }
    }
}

/// Every mandatory field is non-null.
pub struct RequiredFieldsCheck {
    fields: Vec<Field>,
}

impl RequiredFieldsCheck {
    pub fn new(fields: &[Field]) -> Self {
        let mut set: BTreeSet<Field> = fields.iter().copied().collect();
        set.insert(Field::EventId);
        set.insert(Field::EventDate);
        Self {
            fields: set.into_iter().collect(),
        }
    }
}

impl QualityCheck for RequiredFieldsCheck {
    fn name(&self) -> &'static str {
        CHECK_REQUIRED_FIELDS
    }

    fn evaluate(&self, dataset: &EnrichedDataset) -> QualityCheckResult {
        let mut per_field: BTreeMap<Field, usize> = BTreeMap::new();
        let mut failing = 0;
        for record in dataset.records() {
            let mut missing_any = false;
            for &field in &self.fields {
                if !record.raw.is_present(field) {
                    *per_field.entry(field).or_default() += 1;
                    missing_any = true;
                }
            }
            if missing_any {
                failing += 1;
            }
        }
        let detail = if failing == 0 {
            format!("all {} required fields present", self.fields.len())
        } else {
            let parts: Vec<String> = per_field
                .iter()
                .map(|(field, n)| format!("{} null in {} records", field, n))
                .collect();
            parts.join("; ")
        };
        QualityCheckResult::new(self.name(), failing, detail)
    }
}

/// Date cells parse under the declared formats, event dates fall between the
/// configured minimum and the run date, and `DATEADDED` is not more than a
/// day ahead of the run date. Malformed cells are counted from the parser's
/// tally, including those of rows it dropped.
pub struct DateRangeCheck {
    min_date: NaiveDate,
    as_of: NaiveDate,
}

impl DateRangeCheck {
    pub fn new(min_date: NaiveDate, as_of: NaiveDate) -> Self {
        Self { min_date, as_of }
    }
}

impl QualityCheck for DateRangeCheck {
    fn name(&self) -> &'static str {
        CHECK_DATE_RANGE
    }

    fn evaluate(&self, dataset: &EnrichedDataset) -> QualityCheckResult {
        let added_limit = self.as_of + Duration::days(1);
        let mut future = 0;
        let mut too_old = 0;
        let mut failing = 0;
        for record in dataset.records() {
            let mut bad = false;
            if let Some(date) = record.raw.event_date {
                if date > self.as_of {
                    future += 1;
                    bad = true;
                } else if date < self.min_date {
                    too_old += 1;
                    bad = true;
                }
            }
            if let Some(added) = record.raw.date_added {
                if added.date() > added_limit {
                    if !bad {
                        future += 1;
                    }
                    bad = true;
                }
            }
            if bad {
                failing += 1;
            }
        }
        let malformed =
            dataset.format_failures_for(Field::EventDate) + dataset.format_failures_for(Field::DateAdded);
        failing += malformed;
        let detail = format!(
            "{} records dated after {}, {} before {}, {} malformed date cells",
            future, self.as_of, too_old, self.min_date, malformed
        );
        QualityCheckResult::new(self.name(), failing, detail)
    }
}

/// Categorical fields only take permitted values. Nulls are left to the
/// required-fields check.
pub struct ValueDomainCheck {
    domains: BTreeMap<Field, BTreeSet<String>>,
}

impl ValueDomainCheck {
    pub fn new(domains: &BTreeMap<Field, Vec<String>>) -> Self {
        Self {
            domains: domains
                .iter()
                .map(|(field, values)| (*field, values.iter().cloned().collect()))
                .collect(),
        }
    }
}

impl QualityCheck for ValueDomainCheck {
    fn name(&self) -> &'static str {
        CHECK_VALUE_DOMAIN
    }

    fn evaluate(&self, dataset: &EnrichedDataset) -> QualityCheckResult {
        let mut offenders: BTreeMap<Field, BTreeSet<String>> = BTreeMap::new();
        let mut failing = 0;
        for record in dataset.records() {
            let mut bad = false;
            for (field, allowed) in &self.domains {
                if let Some(value) = record.raw.text(*field) {
                    if !allowed.contains(value) {
                        offenders.entry(*field).or_default().insert(value.to_string());
                        bad = true;
                    }
                }
            }
            if bad {
                failing += 1;
            }
        }
        let detail = if offenders.is_empty() {
            format!("{} categorical fields within domain", self.domains.len())
        } else {
            let parts: Vec<String> = offenders
                .iter()
                .map(|(field, values)| {
                    let sample: Vec<&str> = values.iter().take(SAMPLE_LIMIT).map(String::as_str).collect();
                    format!("{} has unexpected values [{}]", field, sample.join(", "))
                })
                .collect();
            parts.join("; ")
        };
        QualityCheckResult::new(self.name(), failing, detail)
    }
}

/// No two records share an event id. Every record carrying a repeated id
/// counts as failing, so a single duplicated pair reports 2.
pub struct DuplicateKeyCheck;

impl QualityCheck for DuplicateKeyCheck {
    fn name(&self) -> &'static str {
        CHECK_DUPLICATE_KEYS
    }

    fn evaluate(&self, dataset: &EnrichedDataset) -> QualityCheckResult {
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for id in dataset.records().iter().filter_map(|r| r.raw.event_id) {
            *counts.entry(id).or_default() += 1;
        }
        let mut duplicated: Vec<i64> = counts
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(id, _)| *id)
            .collect();
        duplicated.sort_unstable();
        let failing: usize = duplicated.iter().map(|id| counts[id]).sum();

        let detail = if duplicated.is_empty() {
            "event ids are unique".to_string()
        } else {
            let sample: Vec<String> = duplicated
                .iter()
                .take(SAMPLE_LIMIT)
                .map(|id| id.to_string())
                .collect();
            format!(
                "{} event ids appear more than once (e.g. {})",
                duplicated.len(),
                sample.join(", ")
            )
        };
        QualityCheckResult::new(self.name(), failing, detail)
    }
}

/// Share of unresolved records stays under the threshold.
pub struct GeoResolutionCheck {
    max_unresolved_fraction: f64,
}

impl GeoResolutionCheck {
    pub fn new(max_unresolved_fraction: f64) -> Self {
        Self {
            max_unresolved_fraction,
        }
    }
}

impl QualityCheck for GeoResolutionCheck {
    fn name(&self) -> &'static str {
        CHECK_GEO_RESOLUTION
    }

    fn evaluate(&self, dataset: &EnrichedDataset) -> QualityCheckResult {
        let total = dataset.len();
        let unresolved = dataset
            .records()
            .iter()
            .filter(|r| r.status() == EnrichmentStatus::Unresolved)
            .count();
        let fraction = if total == 0 {
            0.0
        } else {
            unresolved as f64 / total as f64
        };
        let passed = fraction <= self.max_unresolved_fraction;
        let detail = format!(
            "{} of {} records unresolved ({:.1}%), threshold {:.1}%",
            unresolved,
            total,
            fraction * 100.0,
            self.max_unresolved_fraction * 100.0
        );
        QualityCheckResult {
            check_name: self.name().to_string(),
            passed,
            failing_record_count: if passed { 0 } else { unresolved },
            detail,
        }
    }
}

/// Rejects datasets smaller than the configured minimum, including empty
/// exports.
pub struct RecordCountCheck {
    min_records: usize,
}

impl RecordCountCheck {
    pub fn new(min_records: usize) -> Self {
        Self { min_records }
    }
}

impl QualityCheck for RecordCountCheck {
    fn name(&self) -> &'static str {
        CHECK_RECORD_COUNT
    }

    fn evaluate(&self, dataset: &EnrichedDataset) -> QualityCheckResult {
        let total = dataset.len();
        let passed = total >= self.min_records;
        QualityCheckResult {
            check_name: self.name().to_string(),
            passed,
            // the whole dataset is what fails this check
            failing_record_count: if passed { 0 } else { total },
            detail: format!("{} records, minimum {}", total, self.min_records),
        }
    }
}

/// Default Quality Gate: the fixed, ordered check list. Every check runs
/// regardless of earlier failures.
pub struct DefaultQualityGate {
    checks: Vec<Box<dyn QualityCheck>>,
    rule_version: String,
}

impl DefaultQualityGate {
    /// Build the standard check list. `as_of` is the run date used for the
    /// "not in the future" rule; it is fixed per run so assessment stays
    /// reproducible.
    pub fn from_config(config: &QualityConfig, as_of: NaiveDate) -> Self {
        let checks: Vec<Box<dyn QualityCheck>> = vec![
            Box::new(RequiredFieldsCheck::new(&config.required_fields)),
            Box::new(DateRangeCheck::new(config.min_event_date, as_of)),
            Box::new(ValueDomainCheck::new(&config.value_domains)),
            Box::new(DuplicateKeyCheck),
            Box::new(GeoResolutionCheck::new(config.max_unresolved_fraction)),
            Box::new(RecordCountCheck::new(config.min_records)),
        ];
        Self {
            checks,
            rule_version: config.rule_version.clone(),
        }
    }
}

impl QualityGate for DefaultQualityGate {
    fn assess(&self, dataset: &EnrichedDataset) -> QualityReport {
        let results = self.checks.iter().map(|c| c.evaluate(dataset)).collect();
        QualityReport::from_results(
            results,
            dataset.len(),
            dataset.dropped_rows(),
            self.rule_version.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Dataset, EnrichedRecord, RawRecord};
    use chrono::NaiveDateTime;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 16).unwrap()
    }

    fn raw(id: i64) -> RawRecord {
        RawRecord {
            event_id: Some(id),
            event_date: NaiveDate::from_ymd_opt(2024, 1, 15),
            event_root_code: Some("14".to_string()),
            action_geo_lat: Some(0.5),
            action_geo_long: Some(0.5),
            date_added: NaiveDateTime::parse_from_str("20240115120000", "%Y%m%d%H%M%S").ok(),
            ..Default::default()
        }
    }

    fn resolved(raw: RawRecord) -> EnrichedRecord {
        let labels = mappings::labels_for(&raw);
        EnrichedRecord::resolved(raw, "001".into(), "County".into(), labels)
    }

    fn unresolved(raw: RawRecord) -> EnrichedRecord {
        let labels = mappings::labels_for(&raw);
        EnrichedRecord::unresolved(raw, labels)
    }

    fn good_dataset(n: i64) -> EnrichedDataset {
        Dataset::from_records((1..=n).map(|i| resolved(raw(i))).collect())
    }

    fn gate() -> DefaultQualityGate {
        DefaultQualityGate::from_config(&QualityConfig::default(), as_of())
    }

    #[test]
    fn clean_dataset_passes_every_check_in_order() {
        let report = gate().assess(&good_dataset(10));
        assert_eq!(report.verdict, Verdict::Pass);
        let names: Vec<&str> = report.checks.iter().map(|c| c.check_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                CHECK_REQUIRED_FIELDS,
                CHECK_DATE_RANGE,
                CHECK_VALUE_DOMAIN,
                CHECK_DUPLICATE_KEYS,
                CHECK_GEO_RESOLUTION,
                CHECK_RECORD_COUNT
            ]
        );
    }

    #[test]
    fn assessment_is_pure() {
        let dataset = good_dataset(5);
        let gate = gate();
        assert_eq!(gate.assess(&dataset), gate.assess(&dataset));
    }

    #[test]
    fn null_identifier_fails_required_fields() {
        let mut records: Vec<EnrichedRecord> = (1..=4).map(|i| resolved(raw(i))).collect();
        let mut bad = raw(99);
        bad.event_id = None;
        records.push(resolved(bad));
        let report = gate().assess(&Dataset::from_records(records));

        assert_eq!(report.verdict, Verdict::Fail);
        let check = report.check(CHECK_REQUIRED_FIELDS).unwrap();
        assert!(!check.passed);
        assert_eq!(check.failing_record_count, 1);
        assert!(check.detail.contains("GLOBALEVENTID"));
        assert_eq!(report.failing_check_names(), vec![CHECK_REQUIRED_FIELDS]);
    }

    #[test]
    fn future_and_ancient_dates_fail_date_range() {
        let mut future = raw(1);
        future.event_date = NaiveDate::from_ymd_opt(2024, 2, 1);
        let mut ancient = raw(2);
        ancient.event_date = NaiveDate::from_ymd_opt(1950, 1, 1);
        let dataset = Dataset::from_records(vec![resolved(future), resolved(ancient), resolved(raw(3))]);

        let check = gate().assess(&dataset).check(CHECK_DATE_RANGE).cloned().unwrap();
        assert!(!check.passed);
        assert_eq!(check.failing_record_count, 2);
    }

    #[test]
    fn date_added_past_the_grace_day_fails_date_range() {
        let mut late = raw(1);
        late.date_added = NaiveDateTime::parse_from_str("20240118000000", "%Y%m%d%H%M%S").ok();
        let mut next_day = raw(2);
        next_day.date_added = NaiveDateTime::parse_from_str("20240117235959", "%Y%m%d%H%M%S").ok();
        let dataset = Dataset::from_records(vec![resolved(late), resolved(next_day), resolved(raw(3))]);

        let check = gate().assess(&dataset).check(CHECK_DATE_RANGE).cloned().unwrap();
        assert!(!check.passed);
        assert_eq!(check.failing_record_count, 1);
    }

    #[test]
    fn record_with_two_bad_dates_counts_once() {
        let mut both = raw(1);
        both.event_date = NaiveDate::from_ymd_opt(2024, 3, 1);
        both.date_added = NaiveDateTime::parse_from_str("20240301000000", "%Y%m%d%H%M%S").ok();
        let dataset = Dataset::from_records(vec![resolved(both), resolved(raw(2))]);

        let check = gate().assess(&dataset).check(CHECK_DATE_RANGE).cloned().unwrap();
        assert_eq!(check.failing_record_count, 1);
        assert!(check.detail.starts_with("1 records dated after 2024-01-16"));
    }

    #[test]
    fn malformed_date_cells_fail_date_range() {
        let dataset = good_dataset(3).with_format_failures(BTreeMap::from([
            (Field::EventDate, 2),
            (Field::DateAdded, 1),
            (Field::ActionGeoLat, 4),
        ]));

        let report = gate().assess(&dataset);
        let check = report.check(CHECK_DATE_RANGE).unwrap();
        assert!(!check.passed);
        assert_eq!(check.failing_record_count, 3);
        assert!(check.detail.contains("3 malformed date cells"));
        assert_eq!(report.failing_check_names(), vec![CHECK_DATE_RANGE]);
    }

    #[test]
    fn unknown_root_code_fails_value_domain() {
        let mut odd = raw(1);
        odd.event_root_code = Some("99".to_string());
        let mut missing = raw(2);
        missing.event_root_code = None;
        let dataset = Dataset::from_records(vec![resolved(odd), resolved(missing)]);

        let check = gate().assess(&dataset).check(CHECK_VALUE_DOMAIN).cloned().unwrap();
        assert!(!check.passed);
        assert_eq!(check.failing_record_count, 1);
        assert!(check.detail.contains("99"));
    }

    #[test]
    fn duplicate_pair_counts_both_records() {
        let dataset = Dataset::from_records(vec![resolved(raw(7)), resolved(raw(7)), resolved(raw(8))]);
        let check = gate().assess(&dataset).check(CHECK_DUPLICATE_KEYS).cloned().unwrap();
        assert!(!check.passed);
        assert!(check.failing_record_count >= 2);
        assert_eq!(check.failing_record_count, 2);
    }

    #[test]
    fn unresolved_share_over_threshold_fails() {
        let mut records: Vec<EnrichedRecord> = (1..=7).map(|i| resolved(raw(i))).collect();
        records.extend((8..=10).map(|i| unresolved(raw(i))));
        let check = gate()
            .assess(&Dataset::from_records(records))
            .check(CHECK_GEO_RESOLUTION)
            .cloned()
            .unwrap();
        assert!(!check.passed);
        assert_eq!(check.failing_record_count, 3);

        let mut records: Vec<EnrichedRecord> = (1..=9).map(|i| resolved(raw(i))).collect();
        records.push(unresolved(raw(10)));
        let check = gate()
            .assess(&Dataset::from_records(records))
            .check(CHECK_GEO_RESOLUTION)
            .cloned()
            .unwrap();
        assert!(check.passed, "exactly at the threshold passes");
    }

    #[test]
    fn empty_dataset_fails_record_count_only() {
        let report = gate().assess(&Dataset::from_records(vec![]));
        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(report.failing_check_names(), vec![CHECK_RECORD_COUNT]);
    }

    #[test]
    fn checks_do_not_short_circuit() {
        let mut bad = raw(1);
        bad.event_id = None;
        bad.event_root_code = Some("XX".to_string());
        let records = vec![unresolved(bad), unresolved(raw(2)), unresolved(raw(2))];
        let report = gate().assess(&Dataset::from_records(records));
        assert_eq!(
            report.failing_check_names(),
            vec![
                CHECK_REQUIRED_FIELDS,
                CHECK_VALUE_DOMAIN,
                CHECK_DUPLICATE_KEYS,
                CHECK_GEO_RESOLUTION
            ]
        );
        assert!(report.summary().starts_with("FAIL"));
    }
}
