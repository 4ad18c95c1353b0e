//! Error taxonomy
//!
//! A single error type is shared by every layer of the crate. Leaves and
//! library code return [`Error`]; only the binary turns an error into an
//! exit code and an `ERROR: (<command>) <message>` line.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code for a successful command.
pub const EXIT_OK: i32 = 0;
/// Exit code for any failure that is not a usage error or an interrupt.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for argument parsing failures.
pub const EXIT_USAGE: i32 = 2;
/// Exit code when the user interrupts the process.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Structured error from a service, decoded from the Google JSON error envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    /// HTTP status code (e.g. 404).
    pub code: u16,
    /// Canonical status string (e.g. `NOT_FOUND`), when the server sent one.
    pub status: Option<String>,
    /// Machine-readable reason of the first error detail.
    pub reason: Option<String>,
    /// Human-readable message from the server.
    pub message: String,
    /// URL of the failed request.
    pub url: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

impl HttpError {
    /// Decode an error response body. Bodies that are not in the standard
    /// envelope keep the raw (truncated) text as the message.
    pub fn from_response(code: u16, url: &str, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => Self {
                code,
                status: envelope.error.status,
                reason: envelope.error.errors.into_iter().find_map(|e| e.reason),
                message: envelope.error.message,
                url: url.to_string(),
            },
            Err(_) => {
                let message: String = body.trim().chars().take(200).collect();
                Self {
                    code,
                    status: None,
                    reason: None,
                    message,
                    url: url.to_string(),
                }
            }
        }
    }

    /// Whether the failure is worth retrying for an idempotent request.
    pub fn is_retryable(&self) -> bool {
        self.code >= 500 || self.code == 429
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, self.message.is_empty()) {
            (Some(status), false) => write!(f, "{}: {}", status, self.message),
            (Some(status), true) => write!(f, "{}", status),
            (None, false) => write!(f, "HTTPError {}: {}", self.code, self.message),
            (None, true) => write!(f, "HTTPError {}", self.code),
        }
    }
}

/// Every failure the framework can report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad flags or positionals, including help requests that must exit non-zero.
    #[error("{0}")]
    Usage(String),

    /// A specific value failed a type or choice check.
    #[error("argument {name}: {reason}")]
    InvalidArgument {
        name: String,
        value: String,
        reason: String,
    },

    /// A property needed by the command is not set.
    #[error("The required property [{property}] is not currently set.\n{hint}")]
    RequiredProperty { property: String, hint: String },

    /// A property value failed validation.
    #[error("Invalid value for property [{property}]: {reason}")]
    InvalidProperty { property: String, reason: String },

    /// An ini-style properties file could not be parsed.
    #[error("Failed to parse properties file [{}] at line {line}: {message}", path.display())]
    PropertiesParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A template variable of a collection could not be resolved.
    #[error("The required parameter [{param}] of collection [{collection}] is not set.")]
    RequiredParameter { collection: String, param: String },

    /// A URL resolved to a different collection than the one requested.
    #[error("wrong collection: expected [{expected}], got [{actual}], for path [{path}]")]
    WrongCollection {
        expected: String,
        actual: String,
        path: String,
    },

    /// An identifier could not be turned into a resource reference.
    #[error("could not parse resource [{identifier}]: {reason}")]
    InvalidResource { identifier: String, reason: String },

    /// The collection name is not registered.
    #[error("unknown collection [{0}]")]
    UnknownCollection(String),

    /// HTTP 404.
    #[error("{0}")]
    NotFound(HttpError),

    /// HTTP 409 that is not an optimistic-concurrency failure.
    #[error("{0}")]
    AlreadyExists(HttpError),

    /// HTTP 403.
    #[error("{0}")]
    PermissionDenied(HttpError),

    /// HTTP 401, or no usable credentials.
    #[error("{0}")]
    Unauthenticated(String),

    /// HTTP 412 or an ETag mismatch during a read-modify-write.
    #[error("{message}")]
    Conflict { message: String },

    /// Any other non-success HTTP status.
    #[error("{0}")]
    Http(HttpError),

    /// A long-running operation finished with an error.
    #[error("{0}")]
    Operation(String),

    /// Waiting for an operation exceeded its deadline.
    #[error("Operation [{operation}] timed out after {seconds}s. It may still be running.")]
    Timeout { operation: String, seconds: u64 },

    /// The user answered "no" at a prompt.
    #[error("{0}")]
    OperationCancelled(String),

    /// A prompt was needed but nobody can answer it.
    #[error("This prompt could not be answered because you are not in an interactive session. {0}")]
    UnattendedPrompt(String),

    /// A user-supplied file is malformed or unreadable.
    #[error("{0}")]
    BadFile(String),

    /// Removing an IAM binding that does not exist.
    #[error("Policy binding with the specified member and role not found!")]
    BindingNotFound,

    /// Transport failure after retries were exhausted.
    #[error("Network error: {0}")]
    Network(String),

    /// The process was interrupted.
    #[error("Command killed by keyboard interrupt")]
    Interrupted,

    /// Local I/O failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A broken invariant inside the framework.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Build an [`Error::InvalidArgument`].
    pub fn invalid_argument(name: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Classify a non-success HTTP response.
    pub fn from_http(code: u16, url: &str, body: &str) -> Self {
        let http = HttpError::from_response(code, url, body);
        match code {
            401 => Self::Unauthenticated(http.to_string()),
            403 => Self::PermissionDenied(http),
            404 => Self::NotFound(http),
            409 if http.status.as_deref() == Some("ABORTED") => Self::Conflict {
                message: http.to_string(),
            },
            409 => Self::AlreadyExists(http),
            412 => Self::Conflict {
                message: http.to_string(),
            },
            _ => Self::Http(http),
        }
    }

    /// The HTTP status behind this error, if it came from a service.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::NotFound(e) | Self::AlreadyExists(e) | Self::PermissionDenied(e) | Self::Http(e) => {
                Some(e.code)
            }
            Self::Unauthenticated(_) => Some(401),
            _ => None,
        }
    }

    /// Whether an idempotent request failing with this error should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the error is a usage problem (exit code 2).
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_) | Self::InvalidArgument { .. })
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) | Self::InvalidArgument { .. } => EXIT_USAGE,
            Self::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }

    /// Whether a stack-like detail dump should accompany the message even
    /// without debug verbosity.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_decodes_envelope() {
        let body = r#"{"error":{"code":404,"message":"The resource was not found","status":"NOT_FOUND","errors":[{"reason":"notFound"}]}}"#;
        let err = HttpError::from_response(404, "https://x/y", body);
        assert_eq!(err.status.as_deref(), Some("NOT_FOUND"));
        assert_eq!(err.reason.as_deref(), Some("notFound"));
        assert_eq!(err.to_string(), "NOT_FOUND: The resource was not found");
    }

    #[test]
    fn test_http_error_keeps_raw_body() {
        let err = HttpError::from_response(502, "https://x", "Bad Gateway");
        assert_eq!(err.to_string(), "HTTPError 502: Bad Gateway");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classification_by_status() {
        assert!(matches!(Error::from_http(404, "u", "{}"), Error::NotFound(_)));
        assert!(matches!(Error::from_http(403, "u", "{}"), Error::PermissionDenied(_)));
        assert!(matches!(Error::from_http(401, "u", "{}"), Error::Unauthenticated(_)));
        assert!(matches!(Error::from_http(412, "u", "{}"), Error::Conflict { .. }));
        assert!(matches!(Error::from_http(409, "u", "{}"), Error::AlreadyExists(_)));
        assert!(matches!(Error::from_http(500, "u", "{}"), Error::Http(_)));
        let aborted = r#"{"error":{"message":"concurrent","status":"ABORTED"}}"#;
        assert!(matches!(Error::from_http(409, "u", aborted), Error::Conflict { .. }));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Usage("x".into()).exit_code(), EXIT_USAGE);
        assert_eq!(Error::invalid_argument("--limit", "x", "bad").exit_code(), EXIT_USAGE);
        assert_eq!(Error::OperationCancelled("Aborted by user.".into()).exit_code(), EXIT_FAILURE);
        assert_eq!(Error::Interrupted.exit_code(), EXIT_INTERRUPTED);
        assert_eq!(Error::Operation("boom".into()).exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_invalid_argument_format() {
        let err = Error::invalid_argument("--limit", "abc", "expected an integer");
        assert_eq!(err.to_string(), "argument --limit: expected an integer");
    }
}
