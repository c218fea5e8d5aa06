use serde::Serialize;
use thiserror::Error;

use super::types::{HouseholdStructure, RunRequest};

/// Failures raised inside a single calculator while projecting a year.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalcError {
    #[error("non-finite {field} in {year}")]
    NonFinite { field: &'static str, year: i32 },
    #[error("unknown person id {0:?}")]
    UnknownPerson(String),
    #[error("minimum drawdown table is empty")]
    EmptyDrawdownTable,
}

/// Reject `value` if it is NaN or infinite.
pub fn ensure_finite(value: f64, field: &'static str, year: i32) -> Result<f64, CalcError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CalcError::NonFinite { field, year })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub(crate) fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

/// Diagnostic view of a request with every monetary figure removed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    pub structure: HouseholdStructure,
    pub person_count: usize,
    pub monte_carlo: bool,
}

impl From<&RunRequest> for RequestSummary {
    fn from(request: &RunRequest) -> Self {
        Self {
            structure: request.household.structure,
            person_count: request.household.people.len(),
            monte_carlo: request.options.monte_carlo.enabled,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid request: {}", .0.errors.join("; "))]
    Validation(ValidationReport),
    #[error("computation failed: {message}")]
    Computation {
        message: String,
        summary: RequestSummary,
    },
    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    pub fn computation(err: CalcError, request: &RunRequest) -> Self {
        RunError::Computation {
            message: err.to_string(),
            summary: RequestSummary::from(request),
        }
    }
}
