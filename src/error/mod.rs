use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use reqwest::Error as ReqwestError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;

/// Remote transport or query failure. The message is the backend's own text.
pub const STORE_ERROR: &str = "STORE/ERROR";
pub const STORE_HTTP: &str = "STORE/HTTP";
pub const STORE_DECODE: &str = "STORE/DECODE";
pub const STORE_NOT_FOUND: &str = "STORE/NOT_FOUND";
pub const STORE_INVALID_COLLECTION: &str = "STORE/INVALID_COLLECTION";
/// The local database could not be opened or migrated.
pub const STORE_OPEN: &str = "STORE/OPEN";

pub const VALIDATION_REQUIRED: &str = "VALIDATION/REQUIRED";
pub const VALIDATION_NUMERIC: &str = "VALIDATION/NUMERIC";
pub const VALIDATION_STATUS: &str = "VALIDATION/STATUS";
pub const VALIDATION_ROLE: &str = "VALIDATION/ROLE";

pub const DUPLICATE_STUDENT: &str = "DUPLICATE/STUDENT";
pub const DUPLICATE_PENGAJUAN: &str = "DUPLICATE/PENGAJUAN";

pub const CONFIRM_REQUIRED: &str = "CONFIRM/REQUIRED";

pub const AUTH_FAILED: &str = "AUTH/FAILED";
pub const AUTH_NO_SESSION: &str = "AUTH/NO_SESSION";

/// A structured application error that can be serialized and surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the user.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Construct a new application error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    /// True for failures caught before any remote round-trip.
    pub fn is_validation(&self) -> bool {
        self.code.starts_with("VALIDATION/")
    }

    pub fn is_duplicate(&self) -> bool {
        self.code.starts_with("DUPLICATE/")
    }

    pub fn is_store(&self) -> bool {
        self.code.starts_with("STORE/")
            || self.code.starts_with("Sqlite/")
    }

    /// Emit the error as a structured `tracing` event.
    pub fn log_with_event(&self, event: &'static str) {
        tracing::error!(
            target: "pipadmin",
            event = event,
            code = %self.code,
            message = %self.message,
            context = ?self.context,
        );
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Opening or migrating the local database. The anyhow chain becomes nested causes.
impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }
            let mut root = AppError::new(STORE_OPEN, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

/// A row the store returned that does not fit the record type.
impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let mut app_error = AppError::new(STORE_DECODE, error.to_string());
        if error.line() > 0 {
            app_error = app_error.with_context("line", error.line().to_string());
        }
        if error.column() > 0 {
            app_error = app_error.with_context("column", error.column().to_string());
        }
        app_error
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new(STORE_NOT_FOUND, "Record not found"),
            SqlxError::Database(db) => {
                let code = db
                    .code()
                    .map(|code| format!("Sqlite/{code}"))
                    .unwrap_or_else(|| STORE_ERROR.to_string());
                let mut app_error = AppError::new(code, db.message().to_string());
                if let Some(constraint) = db.constraint() {
                    app_error = app_error.with_context("constraint", constraint.to_string());
                }
                app_error
            }
            other => AppError::new(STORE_ERROR, other.to_string()),
        }
    }
}

impl From<ReqwestError> for AppError {
    fn from(error: ReqwestError) -> Self {
        let code = if error.is_timeout() {
            "STORE/TIMEOUT"
        } else if error.is_connect() {
            "STORE/CONNECT"
        } else if error.is_decode() {
            STORE_DECODE
        } else {
            STORE_ERROR
        };
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(status) = error.status() {
            app_error = app_error.with_context("status", status.as_u16().to_string());
        }
        if let Some(url) = error.url() {
            app_error = app_error.with_context("url", url.path().to_string());
        }
        app_error
    }
}
