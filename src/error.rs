use uuid::Uuid;

/// Reasons the engine refuses to produce an assessment.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    /// A raw record arrived without a field the engine needs.
    #[error("{record} is missing required field `{field}`")]
    MissingField { record: String, field: &'static str },
    /// Marks that are NaN or infinite cannot be averaged.
    #[error("{record} has non-numeric marks ({marks})")]
    InvalidMarks { record: String, marks: f64 },
    /// A record belonging to another student was handed to a single-student assessment.
    #[error("{record} belongs to student {found}, expected {expected}")]
    ForeignRecord {
        record: String,
        expected: Uuid,
        found: Uuid,
    },
    #[error("{record} has unrecognised attendance status {status:?}")]
    InvalidStatus { record: String, status: String },
    #[error("{name} window must be at least one day, got {days}")]
    InvalidWindow { name: &'static str, days: i64 },
}

impl RiskError {
    /// Every variant is caused by the caller's input, so a service layer
    /// should answer with a 4xx and the offending record.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RiskError::MissingField { .. }
                | RiskError::InvalidMarks { .. }
                | RiskError::ForeignRecord { .. }
                | RiskError::InvalidStatus { .. }
                | RiskError::InvalidWindow { .. }
        )
    }

    /// Label of the record that caused the failure, when there is one.
    pub fn record(&self) -> Option<&str> {
        match self {
            RiskError::MissingField { record, .. }
            | RiskError::InvalidMarks { record, .. }
            | RiskError::ForeignRecord { record, .. }
            | RiskError::InvalidStatus { record, .. } => Some(record),
            RiskError::InvalidWindow { .. } => None,
        }
    }
}
