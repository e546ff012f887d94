use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn gateway_not_found() -> Self {
        Error::NotFound("Gateway not found".to_string())
    }

    pub fn device_not_found() -> Self {
        Error::NotFound("Device not found".to_string())
    }

    pub fn device_not_on_gateway() -> Self {
        Error::NotFound("Device not found on this gateway".to_string())
    }

    pub fn duplicate_serial_number() -> Self {
        Error::Conflict("Gateway with this serial number already exists".to_string())
    }

    pub fn duplicate_ipv4_address() -> Self {
        Error::Conflict("Gateway with this IPv4 address already exists".to_string())
    }

    pub fn duplicate_uid(uid: i64) -> Self {
        Error::Conflict(format!(
            "Device UID {} must be globally unique. UID already exists.",
            uid
        ))
    }

    pub fn capacity_exceeded(max: usize, current: u64) -> Self {
        Error::BadRequest(format!(
            "Maximum {} devices allowed per gateway. Current count: {}",
            max, current
        ))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Database(_) | Error::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label placed in the `error` field of the response envelope.
    pub fn label(&self) -> &'static str {
        match self {
            Error::Validation(_) => "Validation Failed",
            Error::BadRequest(_) => "Bad Request",
            Error::NotFound(_) => "Not Found",
            Error::Conflict(_) => "Conflict",
            Error::Database(_) | Error::Migration(_) => "Internal Server Error",
        }
    }
}
