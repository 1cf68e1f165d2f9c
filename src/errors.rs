//! Typed error hierarchy for the LMS backend.
//!
//! Storage code returns `anyhow::Result` with context; domain services
//! surface `LmsError` so the HTTP layer can map each failure to a status.

use thiserror::Error;

/// Errors from domain services (access checks, hooks, gamification).
#[derive(Debug, Error)]
pub enum LmsError {
    #[error("{collection} {id} not found")]
    NotFound { collection: &'static str, id: i64 },

    #[error("You are not allowed to perform this action")]
    Forbidden,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is locked until {until}")]
    AccountLocked { until: String },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Unsupported metric for {achievement_type} progress: {metric}")]
    UnsupportedMetric {
        achievement_type: &'static str,
        metric: &'static str,
    },

    #[error("Custom achievement progress must be handled separately")]
    CustomProgress,

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LmsError {
    pub fn not_found(collection: &'static str, id: i64) -> Self {
        Self::NotFound { collection, id }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Classify a failed storage write: constraint violations become
    /// `Conflict`, everything else `Database`.
    pub fn from_storage(err: anyhow::Error) -> Self {
        if crate::db::is_constraint_violation(&err) {
            Self::Conflict(format!("{:#}", err))
        } else {
            Self::Database(err)
        }
    }
}

pub type LmsResult<T> = Result<T, LmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_collection_and_id() {
        let err = LmsError::not_found("Course", 42);
        assert_eq!(err.to_string(), "Course 42 not found");
        match &err {
            LmsError::NotFound { collection, id } => {
                assert_eq!(*collection, "Course");
                assert_eq!(*id, 42);
            }
            _ => panic!("Expected NotFound"),
        }
    }

    #[test]
    fn unsupported_metric_message() {
        let err = LmsError::UnsupportedMetric {
            achievement_type: "streak",
            metric: "score",
        };
        assert_eq!(
            err.to_string(),
            "Unsupported metric for streak progress: score"
        );
    }

    #[test]
    fn anyhow_converts_into_other() {
        let err: LmsError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, LmsError::Other(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn storage_errors_are_classified() {
        let err = LmsError::from_storage(anyhow::anyhow!("disk full"));
        assert!(matches!(err, LmsError::Database(_)));
    }

    #[test]
    fn all_variants_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&LmsError::Forbidden);
        assert_std_error(&LmsError::CustomProgress);
        assert_std_error(&LmsError::Database(anyhow::anyhow!("io")));
    }
}
