use serde::Serialize;
use serde_json::{Map, Value as Json};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Crate-wide error type.
///
/// Every variant carries (or implies) a stable machine-readable identifier,
/// see [`Error::response_id`], and maps to an HTTP-style status code through
/// [`Error::kind`].
#[derive(Debug, Error)]
pub enum Error {
    /// The caller supplied a value the field or model rejected.
    #[error("{message}")]
    Validation {
        response_id: String,
        message: String,
        /// Name of the offending field, when the failure is field-scoped.
        field: Option<String>,
    },

    /// A requested record does not exist.
    #[error("{message}")]
    NotFound { response_id: String, message: String },

    /// The operation conflicts with other stored records.
    #[error("{message}")]
    Conflict {
        response_id: String,
        message: String,
        data: Json,
    },

    /// An external capability the model depends on is not installed.
    #[error("{message}")]
    FailedDependency { response_id: String, message: String },

    /// Programming or deployment defect: bad declarations, corrupt stored
    /// data, unsupported default operations.
    #[error("{message}")]
    Server { response_id: String, message: String },

    /// The exclusive config lock could not be acquired in time.
    ///
    /// The pending write is dropped; callers must treat this as fatal.
    #[error("failed to acquire config lock {path} after {attempts} attempts")]
    LockExhausted { path: String, attempts: u32 },

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML Serialization: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    #[error("TOML Deserialization: {0}")]
    TomlDeserialization(#[from] toml::de::Error),
}

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Client,
    NotFound,
    Conflict,
    FailedDependency,
    Server,
}

impl ErrorKind {
    pub fn code(self) -> u16 {
        match self {
            ErrorKind::Client => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::FailedDependency => 424,
            ErrorKind::Server => 500,
        }
    }

    /// Canonical lowercase phrase for [`ErrorKind::code`].
    pub fn status(self) -> &'static str {
        match self {
            ErrorKind::Client => "bad request",
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::FailedDependency => "failed dependency",
            ErrorKind::Server => "server error",
        }
    }
}

/// Error body handed to any outer boundary (HTTP, CLI).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub status: String,
    pub response_id: String,
    pub message: String,
    pub data: Json,
}

impl Error {
    pub fn validation(response_id: &str, field: Option<&str>, message: impl Into<String>) -> Self {
        Error::Validation {
            response_id: response_id.to_string(),
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    pub fn not_found(response_id: &str, message: impl Into<String>) -> Self {
        Error::NotFound {
            response_id: response_id.to_string(),
            message: message.into(),
        }
    }

    pub fn conflict(response_id: &str, message: impl Into<String>, data: Json) -> Self {
        Error::Conflict {
            response_id: response_id.to_string(),
            message: message.into(),
            data,
        }
    }

    pub fn failed_dependency(response_id: &str, message: impl Into<String>) -> Self {
        Error::FailedDependency {
            response_id: response_id.to_string(),
            message: message.into(),
        }
    }

    pub fn server(response_id: &str, message: impl Into<String>) -> Self {
        Error::Server {
            response_id: response_id.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Client,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::FailedDependency { .. } => ErrorKind::FailedDependency,
            Error::Server { .. }
            | Error::LockExhausted { .. }
            | Error::Io(_)
            | Error::TomlSerialization(_)
            | Error::TomlDeserialization(_) => ErrorKind::Server,
        }
    }

    pub fn code(&self) -> u16 {
        self.kind().code()
    }

    /// Stable identifier for this failure, safe to match on.
    pub fn response_id(&self) -> &str {
        match self {
            Error::Validation { response_id, .. }
            | Error::NotFound { response_id, .. }
            | Error::Conflict { response_id, .. }
            | Error::FailedDependency { response_id, .. }
            | Error::Server { response_id, .. } => response_id,
            Error::LockExhausted { .. } => "CONFIG_LOCK_EXHAUSTED",
            Error::Io(_) => "CONFIG_IO_FAILED",
            Error::TomlSerialization(_) => "CONFIG_TOML_SERIALIZATION_FAILED",
            Error::TomlDeserialization(_) => "CONFIG_TOML_DESERIALIZATION_FAILED",
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let kind = self.kind();
        let data = match self {
            Error::Conflict { data, .. } => data.clone(),
            Error::Validation {
                field: Some(field), ..
            } => {
                let mut map = Map::new();
                map.insert("field".to_string(), Json::String(field.clone()));
                Json::Object(map)
            }
            _ => Json::Object(Map::new()),
        };

        ErrorPayload {
            code: kind.code(),
            status: kind.status().to_string(),
            response_id: self.response_id().to_string(),
            message: self.to_string(),
            data,
        }
    }
}
