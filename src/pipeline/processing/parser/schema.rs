use serde::{Deserialize, Serialize};

use crate::constants::{GDELT_DATETIME_FORMAT, GDELT_DATE_FORMAT, GDELT_EXPORT_COLUMNS};
use crate::domain::Field;

/// Where a field comes from in the source row and whether a row without a
/// usable value for it must be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field: Field,
    pub column: usize,
    #[serde(default)]
    pub required: bool,
}

/// Declared shape of the raw export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaDescriptor {
    pub expected_columns: usize,
    pub date_format: String,
    pub datetime_format: String,
    pub fields: Vec<FieldSpec>,
}

impl Default for SchemaDescriptor {
    fn default() -> Self {
        Self::gdelt_v2_export()
    }
}

impl SchemaDescriptor {
    /// The subset of GDELT 2.0 export columns carried through the pipeline.
    pub fn gdelt_v2_export() -> Self {
        let spec = |field, column, required| FieldSpec {
            field,
            column,
            required,
        };
        Self {
            expected_columns: GDELT_EXPORT_COLUMNS,
            date_format: GDELT_DATE_FORMAT.to_string(),
            datetime_format: GDELT_DATETIME_FORMAT.to_string(),
            fields: vec![
                spec(Field::EventId, 0, true),
                spec(Field::EventDate, 1, true),
                spec(Field::EventCode, 26, false),
                spec(Field::EventBaseCode, 27, false),
                spec(Field::EventRootCode, 28, false),
                spec(Field::ActionGeoFullName, 52, false),
                spec(Field::ActionGeoCountryCode, 53, false),
                spec(Field::ActionGeoLat, 56, false),
                spec(Field::ActionGeoLong, 57, false),
                spec(Field::DateAdded, 59, false),
                spec(Field::SourceUrl, 60, false),
            ],
        }
    }

    pub fn spec_for(&self, field: Field) -> Option<&FieldSpec> {
        self.fields.iter().find(|s| s.field == field)
    }

    pub fn required_fields(&self) -> Vec<Field> {
        self.fields
            .iter()
            .filter(|s| s.required)
            .map(|s| s.field)
            .collect()
    }

    /// Check the descriptor itself: identity fields present and required,
    /// every column inside the row, no field declared twice.
    pub fn validate(&self) -> Result<(), String> {
        for identity in [Field::EventId, Field::EventDate] {
            match self.spec_for(identity) {
                Some(spec) if spec.required => {}
                Some(_) => return Err(format!("{} must be declared required", identity)),
                None => return Err(format!("{} must be declared in the schema", identity)),
            }
        }
        for spec in &self.fields {
            if spec.column >= self.expected_columns {
                return Err(format!(
                    "{} maps to column {} but rows only have {} columns",
                    spec.field, spec.column, self.expected_columns
                ));
            }
            if self.fields.iter().filter(|s| s.field == spec.field).count() > 1 {
                return Err(format!("{} is declared more than once", spec.field));
            }
        }
        if self.date_format.trim().is_empty() || self.datetime_format.trim().is_empty() {
            return Err("date formats must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gdelt_default_is_valid() {
        let schema = SchemaDescriptor::gdelt_v2_export();
        assert!(schema.validate().is_ok());
        assert_eq!(
            schema.required_fields(),
            vec![Field::EventId, Field::EventDate]
        );
    }

    #[test]
    fn optional_identifier_is_rejected() {
        let mut schema = SchemaDescriptor::gdelt_v2_export();
        schema.fields[0].required = false;
        let err = schema.validate().unwrap_err();
        assert!(err.contains("GLOBALEVENTID"));
    }

    #[test]
    fn column_outside_row_is_rejected() {
        let mut schema = SchemaDescriptor::gdelt_v2_export();
        schema.expected_columns = 58;
        assert!(schema.validate().is_err());
    }
}
