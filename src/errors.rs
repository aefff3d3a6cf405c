use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Error type used throughout the service layer.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Payment amount must be greater than zero (got {0})")]
    InvalidAmount(Decimal),

    #[error("Payment of {amount} exceeds the current balance due ({balance})")]
    ExceedsBalance { amount: Decimal, balance: Decimal },

    #[error("Invalid status transition from '{from}': allowed next states are {allowed:?}")]
    InvalidTransition {
        from: OrderStatus,
        allowed: Vec<OrderStatus>,
    },

    #[error("Operator {0} is not associated with any shop")]
    NotAssociated(Uuid),

    #[error("Concurrent modification detected, retry the operation: {0}")]
    ConcurrencyConflict(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Classifies a database error, surfacing lock/serialization failures as
/// `ConcurrencyConflict` so callers can retry at the boundary instead of
/// treating them as hard failures.
///
/// Every `?` on a `DbErr` funnels through here via the `From` impl below, so
/// a lock failure raised mid-transaction classifies the same as one raised at
/// `begin` or `commit`.
pub fn classify_db_err(err: DbErr) -> ServiceError {
    let text = err.to_string();
    let lowered = text.to_lowercase();
    if lowered.contains("deadlock")
        || lowered.contains("could not serialize")
        || lowered.contains("database is locked")
        || lowered.contains("lock timeout")
    {
        ServiceError::ConcurrencyConflict(text)
    } else {
        ServiceError::DatabaseError(err)
    }
}

impl From<DbErr> for ServiceError {
    fn from(err: DbErr) -> Self {
        classify_db_err(err)
    }
}

impl ServiceError {
    /// Stable machine-readable code for logs and presentation consumers.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::DatabaseError(_) => "database_error",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::ValidationError(_) => "validation_error",
            ServiceError::InvalidAmount(_) => "invalid_amount",
            ServiceError::ExceedsBalance { .. } => "exceeds_balance",
            ServiceError::InvalidTransition { .. } => "invalid_transition",
            ServiceError::NotAssociated(_) => "not_associated",
            ServiceError::ConcurrencyConflict(_) => "concurrency_conflict",
            ServiceError::EventError(_) => "event_error",
            ServiceError::InternalError(_) => "internal_error",
        }
    }
}

/// Serializable error payload handed to presentation-layer consumers.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

impl From<&ServiceError> for ErrorResponse {
    fn from(err: &ServiceError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use test_case::test_case;

    #[test_case("database is locked")]
    #[test_case("deadlock detected")]
    #[test_case("could not serialize access due to concurrent update")]
    fn lock_errors_are_classified_as_conflicts(message: &str) {
        let err = DbErr::Custom(message.into());
        assert_matches!(classify_db_err(err), ServiceError::ConcurrencyConflict(_));
    }

    #[test]
    fn other_errors_stay_database_errors() {
        let err = DbErr::Custom("syntax error near SELECT".into());
        assert_matches!(classify_db_err(err), ServiceError::DatabaseError(_));
    }

    #[test]
    fn from_conversion_routes_through_the_classifier() {
        let err: ServiceError = DbErr::Custom("database is locked".to_string()).into();
        assert_matches!(err, ServiceError::ConcurrencyConflict(_));

        let err: ServiceError = DbErr::Custom("unique constraint violated".to_string()).into();
        assert_matches!(err, ServiceError::DatabaseError(_));
    }
}
