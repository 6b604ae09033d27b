//! Validation of user-entered harvest fields.
//!
//! [`SubmissionBuilder`] turns the raw form values into a canonical
//! [`SubmissionRecord`] or reports the first field that is wrong. It never
//! touches the store.

use std::fmt;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::submission::{HerbDetails, SubmissionRecord, SubmissionType};

/// Form fields in the order they are validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Herb name.
    HerbName,
    /// Harvest date.
    HarvestDate,
    /// Quantity in kilograms.
    QuantityKg,
    /// Harvest location.
    Location,
    /// Farm name.
    Farm,
}

impl Field {
    /// Required fields, in validation order.
    pub const REQUIRED: [Self; 5] = [
        Self::HerbName,
        Self::HarvestDate,
        Self::QuantityKg,
        Self::Location,
        Self::Farm,
    ];

    /// Field name as it appears in the form and on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HerbName => "herb_name",
            Self::HarvestDate => "harvest_date",
            Self::QuantityKg => "quantity_kg",
            Self::Location => "location",
            Self::Farm => "farm",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is wrong with a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Problem {
    /// Absent or blank.
    Missing,
    /// Present but not understood.
    Unparseable(String),
    /// Zero, negative or not finite.
    NotPositive,
    /// A harvest date after today.
    InFuture,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub struct ValidationError {
    /// The first offending field.
    pub field: Field,
    /// What is wrong with it.
    pub problem: Problem,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = self.field;
        match &self.problem {
            Problem::Missing => write!(f, "{field} is required"),
            Problem::Unparseable(value) => write!(f, "{field} has an invalid value: {value:?}"),
            Problem::NotPositive => write!(f, "{field} must be a positive number"),
            Problem::InFuture => write!(f, "{field} cannot be in the future"),
        }
    }
}

impl ValidationError {
    /// A required field was left blank.
    #[must_use]
    pub fn missing(field: Field) -> Self {
        Self {
            field,
            problem: Problem::Missing,
        }
    }

    fn new(field: Field, problem: Problem) -> Self {
        Self { field, problem }
    }
}

/// Raw values as entered in the add-herb form.
///
/// Blank strings count as missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSubmission {
    /// Herb name.
    pub herb_name: String,
    /// `YYYY-MM-DD`, or an RFC 3339 timestamp whose date is used.
    pub harvest_date: String,
    /// Quantity in kilograms, as typed.
    pub quantity_kg: String,
    /// Harvest location.
    pub location: String,
    /// Farm name.
    pub farm: String,
    /// Optional pesticide notes.
    pub pesticides_used: Option<String>,
    /// Delivery intent.
    pub submission_type: SubmissionType,
}

impl From<&SubmissionRecord> for RawSubmission {
    /// The form as it would be pre-filled for editing `record`.
    fn from(record: &SubmissionRecord) -> Self {
        let details = &record.details;
        Self {
            herb_name: details.herb_name.clone(),
            harvest_date: details.harvest_date.to_string(),
            quantity_kg: details.quantity_kg.to_string(),
            location: details.location.clone(),
            farm: details.farm.clone(),
            pesticides_used: details.pesticides_used.clone(),
            submission_type: record.submission_type,
        }
    }
}

/// Validates raw form input into submission records.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmissionBuilder;

impl SubmissionBuilder {
    /// Create a builder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate `raw` against the device clock.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the first offending field.
    pub fn build(&self, raw: &RawSubmission) -> Result<SubmissionRecord, ValidationError> {
        self.build_at(raw, Utc::now())
    }

    /// Validate `raw` as if the device clock read `now`.
    ///
    /// Fields are checked in the order of [`Field::REQUIRED`].
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the first offending field.
    pub fn build_at(
        &self,
        raw: &RawSubmission,
        now: DateTime<Utc>,
    ) -> Result<SubmissionRecord, ValidationError> {
        let details = Self::validate_details(raw, now)?;
        Ok(SubmissionRecord::new(details, raw.submission_type, now))
    }

    /// Validate only the harvest fields, without creating a record.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the first offending field.
    pub fn validate_details(
        raw: &RawSubmission,
        now: DateTime<Utc>,
    ) -> Result<HerbDetails, ValidationError> {
        let herb_name = required(Field::HerbName, &raw.herb_name)?;

        let today = now.with_timezone(&Local).date_naive();
        let harvest_date = parse_date(required(Field::HarvestDate, &raw.harvest_date)?)?;
        if harvest_date > today {
            return Err(ValidationError::new(Field::HarvestDate, Problem::InFuture));
        }

        let quantity_kg = parse_quantity(required(Field::QuantityKg, &raw.quantity_kg)?)?;
        let location = required(Field::Location, &raw.location)?;
        let farm = required(Field::Farm, &raw.farm)?;

        let pesticides_used = raw
            .pesticides_used
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        Ok(HerbDetails {
            herb_name: herb_name.to_string(),
            harvest_date,
            quantity_kg,
            location: location.to_string(),
            farm: farm.to_string(),
            pesticides_used,
        })
    }
}

fn required(field: Field, value: &str) -> Result<&str, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        Err(ValidationError::missing(field))
    } else {
        Ok(value)
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .map_err(|_| {
            ValidationError::new(Field::HarvestDate, Problem::Unparseable(value.to_string()))
        })
}

fn parse_quantity(value: &str) -> Result<f64, ValidationError> {
    let quantity: f64 = value.parse().map_err(|_| {
        ValidationError::new(Field::QuantityKg, Problem::Unparseable(value.to_string()))
    })?;
    if quantity.is_finite() && quantity > 0.0 {
        Ok(quantity)
    } else {
        Err(ValidationError::new(Field::QuantityKg, Problem::NotPositive))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::submission::SyncStatus;
    use chrono::TimeZone;

    pub(crate) fn tulsi_raw() -> RawSubmission {
        RawSubmission {
            herb_name: "Tulsi".to_string(),
            harvest_date: "2024-05-01".to_string(),
            quantity_kg: "12.5".to_string(),
            location: "Farm A".to_string(),
            farm: "Green Valley Farm".to_string(),
            pesticides_used: None,
            submission_type: SubmissionType::Offline,
        }
    }

    fn june_2024() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn build(raw: &RawSubmission) -> Result<SubmissionRecord, ValidationError> {
        SubmissionBuilder::new().build_at(raw, june_2024())
    }

    #[test]
    fn test_valid_input_builds_pending_record() {
        let record = build(&tulsi_raw()).unwrap();

        assert_eq!(record.status, SyncStatus::Pending);
        assert_eq!(record.attempt_count, 0);
        assert!(record.remote_id.is_none());
        assert_eq!(record.details.herb_name, "Tulsi");
        assert_eq!(
            record.details.harvest_date,
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
        assert!((record.details.quantity_kg - 12.5).abs() < f64::EPSILON);
        assert_eq!(record.submission_type, SubmissionType::Offline);
        assert_eq!(record.created_at, june_2024());
    }

    #[test]
    fn test_fields_are_trimmed() {
        let mut raw = tulsi_raw();
        raw.herb_name = "  Tulsi \n".to_string();
        raw.pesticides_used = Some("   ".to_string());

        let record = build(&raw).unwrap();
        assert_eq!(record.details.herb_name, "Tulsi");
        assert!(record.details.pesticides_used.is_none());
    }

    #[test]
    fn test_each_missing_field_is_named() {
        for field in Field::REQUIRED {
            let mut raw = tulsi_raw();
            match field {
                Field::HerbName => raw.herb_name.clear(),
                Field::HarvestDate => raw.harvest_date.clear(),
                Field::QuantityKg => raw.quantity_kg.clear(),
                Field::Location => raw.location.clear(),
                Field::Farm => raw.farm = "   ".to_string(),
            }
            assert_eq!(build(&raw).unwrap_err(), ValidationError::missing(field));
        }
    }

    #[test]
    fn test_first_missing_field_wins() {
        let mut raw = tulsi_raw();
        raw.farm.clear();
        raw.location.clear();
        raw.quantity_kg.clear();
        assert_eq!(build(&raw).unwrap_err().field, Field::QuantityKg);

        raw.herb_name.clear();
        assert_eq!(build(&raw).unwrap_err().field, Field::HerbName);
    }

    #[test]
    fn test_invalid_date_reported_before_later_missing_fields() {
        let mut raw = tulsi_raw();
        raw.harvest_date = "yesterday".to_string();
        raw.farm.clear();

        let err = build(&raw).unwrap_err();
        assert_eq!(err.field, Field::HarvestDate);
        assert!(matches!(err.problem, Problem::Unparseable(_)));
    }

    #[test]
    fn test_future_harvest_date_rejected() {
        let mut raw = tulsi_raw();
        raw.harvest_date = "2024-07-01".to_string();

        let err = build(&raw).unwrap_err();
        assert_eq!(err.field, Field::HarvestDate);
        assert_eq!(err.problem, Problem::InFuture);
    }

    #[test]
    fn test_rfc3339_harvest_date_accepted() {
        let mut raw = tulsi_raw();
        raw.harvest_date = "2024-05-01T08:30:00Z".to_string();

        let record = build(&raw).unwrap();
        assert_eq!(
            record.details.harvest_date,
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
    }

    #[test]
    fn test_quantity_must_be_positive_and_finite() {
        for value in ["0", "-3", "NaN", "inf"] {
            let mut raw = tulsi_raw();
            raw.quantity_kg = value.to_string();
            let err = build(&raw).unwrap_err();
            assert_eq!(err.field, Field::QuantityKg, "value {value}");
            assert_eq!(err.problem, Problem::NotPositive, "value {value}");
        }

        let mut raw = tulsi_raw();
        raw.quantity_kg = "twelve".to_string();
        assert!(matches!(
            build(&raw).unwrap_err().problem,
            Problem::Unparseable(_)
        ));
    }

    #[test]
    fn test_pesticides_kept_when_present() {
        let mut raw = tulsi_raw();
        raw.pesticides_used = Some("neem oil".to_string());
        let record = build(&raw).unwrap();
        assert_eq!(record.details.pesticides_used.as_deref(), Some("neem oil"));
    }

    #[test]
    fn test_validation_error_display() {
        assert_eq!(
            ValidationError::missing(Field::HerbName).to_string(),
            "herb_name is required"
        );
        assert_eq!(
            ValidationError::new(Field::QuantityKg, Problem::NotPositive).to_string(),
            "quantity_kg must be a positive number"
        );
        assert_eq!(
            ValidationError::new(Field::HarvestDate, Problem::InFuture).to_string(),
            "harvest_date cannot be in the future"
        );
    }

    #[test]
    fn test_record_prefills_form() {
        let mut raw = tulsi_raw();
        raw.pesticides_used = Some("neem oil".to_string());
        let record = build(&raw).unwrap();

        let prefilled = RawSubmission::from(&record);
        assert_eq!(prefilled.quantity_kg, "12.5");
        assert_eq!(prefilled.harvest_date, "2024-05-01");
        assert_eq!(build(&prefilled).unwrap().payload_hash, record.payload_hash);
    }
}
