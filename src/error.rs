//! Error types for the supervisor and JSON error responses for the proxy

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the state, token, supervisor and readiness components
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The configuration marker could not be inspected
    #[error("failed to read configuration marker {}: {source}", .path.display())]
    ConfigurationRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A token file exists but could not be read as text
    #[error("failed to read gateway token from {}: {source}", .path.display())]
    TokenRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A freshly generated token could not be written to the state directory
    #[error("failed to persist gateway token to {}: {source}", .path.display())]
    TokenPersistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The token cannot be carried in an HTTP header
    #[error("gateway token contains characters that are not valid in an HTTP header")]
    InvalidToken,

    /// The gateway command could not be spawned
    #[error("failed to spawn gateway command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// No candidate health endpoint answered successfully in time
    #[error(
        "gateway at {target} did not become ready within {timeout_ms}ms; probed {} without a successful response. \
         Check the gateway output above or raise gateway.startup_timeout_ms",
        .attempted.join(", ")
    )]
    ReadinessTimeout {
        target: String,
        attempted: Vec<String>,
        timeout_ms: u128,
    },

    /// The process went away before any health endpoint answered
    #[error("gateway process exited during startup (exit code: {code:?})")]
    ExitedDuringStartup { code: Option<i32> },

    /// A gateway is already supervised by this process
    #[error("a gateway process is already running (pid {pid:?})")]
    AlreadyRunning { pid: Option<u32> },

    /// The handle does not refer to the currently supervised process
    #[error("no supervised gateway process matches the given handle")]
    NotRunning,
}

/// Error codes for proxy errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProxyErrorCode {
    /// Setup path requested but no onboarding service is attached
    SetupUnavailable,
    /// Gateway is being started, the client should retry
    GatewayStarting,
    /// Gateway exited or failed to start in this session
    GatewayUnavailable,
    /// Request timed out waiting for the gateway
    RequestTimeout,
    /// Failed to connect to the gateway
    ConnectionFailed,
    /// Internal proxy error
    InternalError,
}

impl ProxyErrorCode {
    /// Get the default HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyErrorCode::SetupUnavailable => StatusCode::NOT_FOUND,
            ProxyErrorCode::GatewayStarting => StatusCode::SERVICE_UNAVAILABLE,
            ProxyErrorCode::GatewayUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ProxyErrorCode::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyErrorCode::ConnectionFailed => StatusCode::BAD_GATEWAY,
            ProxyErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Proxy-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ProxyErrorCode::SetupUnavailable => "SETUP_UNAVAILABLE",
            ProxyErrorCode::GatewayStarting => "GATEWAY_STARTING",
            ProxyErrorCode::GatewayUnavailable => "GATEWAY_UNAVAILABLE",
            ProxyErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
            ProxyErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ProxyErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Seconds a client should wait before retrying, if the condition is transient
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ProxyErrorCode::GatewayStarting => Some(2),
            ProxyErrorCode::ConnectionFailed => Some(1),
            _ => None,
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// The error code
    pub code: ProxyErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: ProxyErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Proxy-Error header
pub fn json_error_response(
    code: ProxyErrorCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let error = ErrorResponse::new(code, message);
    let body = error.to_json();

    let mut builder = Response::builder()
        .status(code.status_code())
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .header("X-Proxy-Error", code.as_header_value());

    if let Some(secs) = code.retry_after_secs() {
        builder = builder.header(hyper::header::RETRY_AFTER, secs.to_string());
    }

    builder
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}
