use std::fmt::Display;

/// An error whose full detail might contain upstream response bodies (which can
/// carry tokens or account identifiers). `to_safe_string` is the only form that
/// should ever reach a log line shared outside the process or a status endpoint.
pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;
}

/// Error taxonomy from the reconciliation engine's error handling design.
///
/// `UpstreamError` and `ShapeError` abort the enclosing tick when they occur
/// fetching the initial snapshot; `ValidationError` and `CacheError` are scoped
/// to a single item and let the tick continue. See the Reconciler for how each
/// is handled.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("upstream error from {system}: {message}")]
    Upstream { system: &'static str, message: String },

    #[error("unexpected response shape from {system}: {detail}")]
    Shape { system: &'static str, detail: String },

    #[error("validation failed for {field}: {detail}")]
    Validation { field: String, detail: String },

    #[error("not authorized against {system}")]
    NotAuthorized { system: &'static str },

    #[error("local cache error: {0}")]
    Cache(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl SyncError {
    pub fn upstream(system: &'static str, message: impl Display) -> Self {
        SyncError::Upstream {
            system,
            message: message.to_string(),
        }
    }

    pub fn shape(system: &'static str, detail: impl Display) -> Self {
        SyncError::Shape {
            system,
            detail: detail.to_string(),
        }
    }

    pub fn validation(field: impl Into<String>, detail: impl Display) -> Self {
        SyncError::Validation {
            field: field.into(),
            detail: detail.to_string(),
        }
    }

    /// Per-item errors that should not abort the whole tick — everything except
    /// the top-level "couldn't even load the upstream snapshot" failures.
    pub fn is_item_scoped(&self) -> bool {
        matches!(
            self,
            SyncError::Validation { .. } | SyncError::Cache(_)
        )
    }
}

impl SafeDisplay for SyncError {
    fn to_safe_string(&self) -> String {
        match self {
            SyncError::Upstream { system, .. } => format!("upstream error from {system}"),
            SyncError::Shape { system, .. } => format!("unexpected response shape from {system}"),
            SyncError::Validation { field, detail } => {
                format!("validation failed for {field}: {detail}")
            }
            SyncError::NotAuthorized { system } => format!("not authorized against {system}"),
            SyncError::Cache(_) => "local cache error".to_string(),
            SyncError::Config(_) => "configuration error".to_string(),
            SyncError::Db(_) => "local cache error".to_string(),
            SyncError::Migrate(_) => "local cache migration error".to_string(),
            SyncError::Http(_) => "network error".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
