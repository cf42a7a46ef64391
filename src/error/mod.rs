use std::collections::HashMap;
use std::fmt;
use std::io::Error as IoError;

use reqwest::Error as ReqwestError;
use serde::Serialize;
use sqlx::Error as SqlxError;

/// Error carried through the migration pipeline. Failures that reach the
/// driver are reduced to their code and message in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// The batch writer could not persist an account's record set.
    pub const WRITE_FAILURE_CODE: &'static str = "WRITE/FAILURE";
    /// A member or field id is already stored under another system.
    pub const IDENTITY_CONFLICT_CODE: &'static str = "WRITE/IDENTITY_CONFLICT";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    /// Wraps a persistence error for one account's commit.
    pub fn write_failure(account_id: &str, cause: impl Into<AppError>) -> Self {
        AppError::new(
            Self::WRITE_FAILURE_CODE,
            "Failed to persist migrated account.",
        )
        .with_context("account_id", account_id)
        .with_cause(cause)
    }

    /// `kind` is `member` or `field`.
    pub fn identity_conflict(kind: &str, id: &str, system_id: &str) -> Self {
        AppError::new(
            Self::IDENTITY_CONFLICT_CODE,
            format!("The {kind} is already migrated into another system."),
        )
        .with_context(kind, id)
        .with_context("system_id", system_id)
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

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    /// Innermost error of the cause chain, or `self` when there is none.
    pub fn root_cause(&self) -> &AppError {
        let mut current = self;
        while let Some(next) = current.cause() {
            current = next;
        }
        current
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.context.is_empty() {
            let mut pairs: Vec<_> = self.context.iter().collect();
            pairs.sort();
            for (key, value) in pairs {
                write!(f, " {key}={value}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let app = AppError::new(format!("IO/{:?}", error.kind()), error.to_string());
        match error.raw_os_error() {
            Some(os_code) => app.with_context("os_code", os_code.to_string()),
            None => app,
        }
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::Io(err) => AppError::from(err).with_context("source", "sqlx"),
            SqlxError::Database(db) => {
                let code = db
                    .code()
                    .map_or_else(|| "SQLX/DATABASE".to_string(), |c| format!("Sqlite/{c}"));
                let app = AppError::new(code, db.message());
                match db.constraint() {
                    Some(constraint) => app.with_context("constraint", constraint),
                    None => app,
                }
            }
            SqlxError::ColumnDecode { index, source } => {
                AppError::new("SQLX/COLUMN_DECODE", source.to_string())
                    .with_context("column", index.to_string())
            }
            SqlxError::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "Record not found"),
            SqlxError::PoolTimedOut => AppError::new(
                "SQLX/POOL_TIMEOUT",
                "Timed out acquiring a database connection",
            ),
            SqlxError::PoolClosed => AppError::new("SQLX/POOL_CLOSED", "Database pool is closed"),
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}

impl From<ReqwestError> for AppError {
    fn from(error: ReqwestError) -> Self {
        let code = if error.is_builder() {
            "HTTP/BUILDER"
        } else if error.is_timeout() {
            "HTTP/TIMEOUT"
        } else if error.is_connect() {
            "HTTP/CONNECT"
        } else {
            "HTTP/ERROR"
        };
        AppError::new(code, error.to_string())
    }
}
