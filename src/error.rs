//! Error types
//!
//! A single error enum shared by the query client, the provider catalog,
//! the tree engine and the document store.

use serde_json::Value;
use thiserror::Error;

/// Errors produced while talking to ARM or resolving resources
#[derive(Debug, Clone, Error)]
pub enum ArmError {
    /// The resource ID does not contain a `/providers/{ns}/{type}/` segment
    #[error("Incorrect resourceId: {0}")]
    MalformedResourceId(String),

    /// The resource type is unknown to the provider catalog, or has no API versions
    #[error("Failed to resolve {0}")]
    Resolution(String),

    /// Not signed in, or no subscriptions available
    #[error("You need to be signed in to Azure for this. {0}")]
    AuthRequired(String),

    /// Non-success HTTP status returned by the ARM endpoint
    #[error("{method} {url} failed with status {status}")]
    Http {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    /// The request never produced an HTTP response
    #[error("Request failed: {0}")]
    Network(String),

    /// Edited document text is not valid JSON
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// The user aborted an interactive step
    #[error("Cancelled applying changes")]
    UserCancelled,

    /// Pagination still had a continuation after the request cap
    #[error("Pagination did not terminate after {0} requests")]
    PaginationExhausted(usize),

    /// The document URI is not tracked by the document store
    #[error("{0} wasn't loaded")]
    DocumentNotLoaded(String),

    /// An external command line tool failed
    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type for ARM operations
pub type ArmResult<T> = Result<T, ArmError>;

impl ArmError {
    /// Create a resolution error
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution(message.into())
    }

    /// Create an external tool error
    pub fn external_tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// HTTP status, when this error came from an HTTP response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Parsed JSON body of an HTTP error response
    pub fn response_json(&self) -> Option<Value> {
        match self {
            Self::Http { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }

    /// `error.code` of an ARM error payload
    pub fn arm_error_code(&self) -> Option<String> {
        self.response_json()?
            .pointer("/error/code")?
            .as_str()
            .map(str::to_string)
    }

    /// `error.message` of an ARM error payload
    pub fn arm_error_message(&self) -> Option<String> {
        self.response_json()?
            .pointer("/error/message")?
            .as_str()
            .map(str::to_string)
    }
}

impl From<std::io::Error> for ArmError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for ArmError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Format an error as a single user-facing line
///
/// Appends the structured `error` payload of ARM responses, the way the
/// portal shows `code: message` pairs.
pub fn format_arm_error(error: &ArmError) -> String {
    match (error.arm_error_code(), error.arm_error_message()) {
        (Some(code), Some(message)) => format!("{}. {}: {}", error, code, message),
        (Some(code), None) => format!("{}. {}", error, code),
        _ => match error {
            ArmError::Http { body, .. } if !body.is_empty() => {
                let snippet: String = body.chars().take(200).collect();
                format!("{}. {}", error, snippet)
            }
            _ => error.to_string(),
        },
    }
}
