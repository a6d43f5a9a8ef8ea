use thiserror::Error;

/// A raw metric fell outside its `[0, 100]` domain.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid metrics: {field} must be between 0 and 100, got {value}")]
pub struct InvalidMetricsError {
    /// Wire name of the offending field, e.g. `mathGrade`.
    pub field: &'static str,
    pub value: f64,
}

/// Errors surfaced by a [`crate::store::StudentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("student ID already exists: {0}")]
    DuplicateStudentId(String),

    #[error(transparent)]
    InvalidMetrics(#[from] InvalidMetricsError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
