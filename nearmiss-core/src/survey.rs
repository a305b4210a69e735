//! Post-session survey and periodic self-report validation.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::{ScaleBounds, SurveyBounds};
use crate::numbers::f64_to_exact_i64;

/// Rejected survey or self-report submission. Nothing is stored on error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SurveyError {
    #[error("survey payload must be a JSON object")]
    NotAnObject,
    #[error("missing required field `{field}`")]
    Missing { field: &'static str },
    #[error("field `{field}` must be an integer")]
    WrongType { field: &'static str },
    #[error("field `{field}` must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        value: i64,
    },
}

/// Answers given once, after the last trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSurvey {
    pub desired_rounds_next_time: i64,
    pub confidence_impact: i64,
    pub self_rated_accuracy: i64,
}

impl PostSurvey {
    /// Validate a raw client payload. Values are never clamped.
    ///
    /// # Errors
    ///
    /// Returns the first missing, mistyped or out-of-range field.
    pub fn from_fields(fields: &Value, bounds: &SurveyBounds) -> Result<Self, SurveyError> {
        let map = fields.as_object().ok_or(SurveyError::NotAnObject)?;
        Ok(Self {
            desired_rounds_next_time: scaled(
                map,
                "desired_rounds_next_time",
                bounds.desired_rounds_next_time,
            )?,
            confidence_impact: scaled(map, "confidence_impact", bounds.confidence_impact)?,
            self_rated_accuracy: scaled(map, "self_rated_accuracy", bounds.self_rated_accuracy)?,
        })
    }
}

/// In-game rating collected every few trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfReport {
    /// Trial count at the time of the report.
    pub after_trial: u32,
    /// How close the participant felt to winning.
    pub closeness: i64,
    /// How much control the participant felt over outcomes.
    pub control: i64,
    /// Urge to keep playing.
    pub urge: i64,
}

impl SelfReport {
    /// # Errors
    ///
    /// Returns the first missing, mistyped or out-of-range rating.
    pub fn from_fields(
        fields: &Value,
        after_trial: u32,
        bounds: ScaleBounds,
    ) -> Result<Self, SurveyError> {
        let map = fields.as_object().ok_or(SurveyError::NotAnObject)?;
        Ok(Self {
            after_trial,
            closeness: scaled(map, "closeness", bounds)?,
            control: scaled(map, "control", bounds)?,
            urge: scaled(map, "urge", bounds)?,
        })
    }
}

fn scaled(
    map: &Map<String, Value>,
    field: &'static str,
    bounds: ScaleBounds,
) -> Result<i64, SurveyError> {
    let value = match map.get(field) {
        None | Some(Value::Null) => return Err(SurveyError::Missing { field }),
        Some(value) => integer(value).ok_or(SurveyError::WrongType { field })?,
    };
    if bounds.contains(value) {
        Ok(value)
    } else {
        Err(SurveyError::OutOfRange {
            field,
            min: bounds.min,
            max: bounds.max,
            value,
        })
    }
}

fn integer(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };
    number
        .as_i64()
        .or_else(|| number.as_f64().and_then(f64_to_exact_i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_in_range_answers() {
        let survey = PostSurvey::from_fields(
            &json!({"desired_rounds_next_time": 5, "confidence_impact": 1, "self_rated_accuracy": 7.0}),
            &SurveyBounds::default(),
        )
        .unwrap();
        assert_eq!(survey.desired_rounds_next_time, 5);
        assert_eq!(survey.self_rated_accuracy, 7);
    }

    #[test]
    fn rejects_out_of_range_without_clamping() {
        let err = PostSurvey::from_fields(
            &json!({"desired_rounds_next_time": 3, "confidence_impact": 8, "self_rated_accuracy": 4}),
            &SurveyBounds::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SurveyError::OutOfRange {
                field: "confidence_impact",
                min: 1,
                max: 7,
                value: 8
            }
        );
    }

    #[test]
    fn rejects_wrong_types_and_missing_fields() {
        let bounds = SurveyBounds::default();
        assert_eq!(
            PostSurvey::from_fields(
                &json!({"desired_rounds_next_time": "3", "confidence_impact": 4, "self_rated_accuracy": 4}),
                &bounds
            ),
            Err(SurveyError::WrongType {
                field: "desired_rounds_next_time"
            })
        );
        assert_eq!(
            PostSurvey::from_fields(
                &json!({"desired_rounds_next_time": 2, "confidence_impact": 4.5, "self_rated_accuracy": 4}),
                &bounds
            ),
            Err(SurveyError::WrongType {
                field: "confidence_impact"
            })
        );
        assert_eq!(
            PostSurvey::from_fields(
                &json!({"desired_rounds_next_time": 2, "confidence_impact": 4}),
                &bounds
            ),
            Err(SurveyError::Missing {
                field: "self_rated_accuracy"
            })
        );
        assert_eq!(
            PostSurvey::from_fields(&json!([1, 2, 3]), &bounds),
            Err(SurveyError::NotAnObject)
        );
    }

    #[test]
    fn rounds_scale_is_narrower_than_likert() {
        let err = PostSurvey::from_fields(
            &json!({"desired_rounds_next_time": 6, "confidence_impact": 4, "self_rated_accuracy": 4}),
            &SurveyBounds::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SurveyError::OutOfRange {
                field: "desired_rounds_next_time",
                max: 5,
                ..
            }
        ));
    }

    #[test]
    fn self_report_reads_three_ratings() {
        let report = SelfReport::from_fields(
            &json!({"closeness": 6, "control": 2, "urge": 5}),
            5,
            ScaleBounds::likert(),
        )
        .unwrap();
        assert_eq!(report.after_trial, 5);
        assert_eq!((report.closeness, report.control, report.urge), (6, 2, 5));
        assert!(
            SelfReport::from_fields(&json!({"closeness": 0, "control": 2, "urge": 5}), 5, ScaleBounds::likert())
                .is_err()
        );
    }
}
