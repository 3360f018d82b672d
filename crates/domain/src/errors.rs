//! Error types with HTTP status code mappings, following the same shape the
//! rest of this codebase uses for its domain errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Raised by the config loader while parsing or validating a configuration
/// directory. Always fatal: the process does not start with a bad config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {document} as YAML: {source}")]
    Yaml {
        document: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("experiment '{experiment}' has no branch named 'control'")]
    MissingControlBranch { experiment: String },

    #[error("experiment '{experiment}' has {count} branches named 'control', expected exactly one")]
    DuplicateControlBranch { experiment: String, count: usize },

    #[error("experiment '{experiment}' branch fractions sum to {sum}, which exceeds 1.0")]
    BranchFractionsExceedUnity { experiment: String, sum: f64 },

    #[error("experiment '{experiment}' branch '{branch}' has fraction {fraction}, expected a value in (0, 1]")]
    InvalidBranchFraction {
        experiment: String,
        branch: String,
        fraction: f64,
    },

    #[error("experiment '{experiment}' has duplicate branch name '{branch}'")]
    DuplicateBranchName { experiment: String, branch: String },

    #[error("experiment '{experiment}' references unknown KPI '{kpi}'")]
    UnknownKpi { experiment: String, kpi: String },

    #[error("experiment '{experiment}' has no branches")]
    NoBranches { experiment: String },

    #[error("duplicate experiment name '{name}'")]
    DuplicateExperimentName { name: String },
}

/// Raised when the split points for a site-area, recomputed at request time,
/// exceed unity across all currently in-progress experiments stacked on it.
#[derive(Debug, thiserror::Error)]
#[error("site-area '{site_area}' has cumulative branch coverage {coverage}, which exceeds 1.0")]
pub struct AssignmentCoverageError {
    pub site_area: String,
    pub coverage: f64,
}

/// Raised while the report runner evaluates a single experiment. Confined to
/// the affected experiment/KPI; never propagates past the runner loop.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("analytics store query failed: {0}")]
    Store(String),

    #[error("metric fit failed for kpi '{kpi}': {reason}")]
    MetricFit { kpi: String, reason: String },

    #[error(transparent)]
    Coverage(#[from] AssignmentCoverageError),
}

/// Errors surfaced directly to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request")]
    BadRequest,

    #[error("{0}")]
    Coverage(#[from] AssignmentCoverageError),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest => StatusCode::BAD_REQUEST,
            ApiError::Coverage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("internal error: {}", self);
        }

        (status, self.to_string()).into_response()
    }
}
