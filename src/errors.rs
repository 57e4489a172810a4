use http::StatusCode;
use sea_orm::{error::DbErr, sqlx, RuntimeErr};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: i32, requested: i32 },

    #[error("Insufficient reservation: reserved {reserved}, requested {requested}")]
    InsufficientReservation { reserved: i32, requested: i32 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Contention on stock record {stock_record_id} after {attempts} attempt(s)")]
    Contention { stock_record_id: Uuid, attempts: u32 },

    /// A single optimistic write lost the race. Retried internally by the
    /// ledger and never returned to callers.
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

/// SQLite result codes (BUSY, LOCKED and their extended forms) and Postgres
/// SQLSTATEs (serialization failure, deadlock, lock not available) raised when
/// another transaction holds or invalidated a lock this one needed.
const LOCK_CONFLICT_CODES: &[&str] = &["5", "6", "261", "262", "517", "40001", "40P01", "55P03"];

/// True when `err` reports a lock conflict with a concurrent transaction
/// rather than a broken statement or connection.
pub fn is_lock_conflict(err: &DbErr) -> bool {
    let runtime = match err {
        DbErr::Exec(runtime) | DbErr::Query(runtime) | DbErr::Conn(runtime) => runtime,
        _ => return false,
    };
    match runtime {
        RuntimeErr::SqlxError(sqlx::Error::Database(db_err)) => db_err
            .code()
            .map_or(false, |code| LOCK_CONFLICT_CODES.iter().any(|known| *known == code)),
        _ => false,
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// True when the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Contention { .. } | Self::ConcurrentModification(_) => true,
            Self::DatabaseError(err) => is_lock_conflict(err),
            _ => false,
        }
    }

    /// Reports a database lock conflict on `stock_record_id` as a lost
    /// optimistic race so the ledger's retry loop handles it.
    pub fn into_lost_race(self, stock_record_id: Uuid) -> Self {
        match self {
            Self::DatabaseError(err) if is_lock_conflict(&err) => {
                Self::ConcurrentModification(stock_record_id)
            }
            other => other,
        }
    }

    /// Returns the HTTP status code an API collaborator should answer with.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidQuantity(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientStock { .. } | Self::InsufficientReservation { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Conflict(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::Contention { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidState(_)
            | Self::InternalError(_)
            | Self::MigrationError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for client-facing responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InvalidState(_)
            | Self::InternalError(_)
            | Self::MigrationError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            Self::Contention { .. } => {
                "Stock record is busy, please retry the operation".to_string()
            }
            _ => self.to_string(),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
