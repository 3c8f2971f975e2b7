//! Error types for the Snyk provider.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors returned by the Snyk API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The API answered with a non-success status code.
    #[error("{method} {url}: {status} {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// HTTP method of the failed request.
        method: String,
        /// Request URL.
        url: String,
        /// Error message extracted from the response body.
        message: String,
        /// Value of the `snyk-request-id` response header.
        request_id: Option<String>,
    },

    /// The request could not be sent or the response could not be read.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body did not match the expected shape.
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// A request URL could not be built from the configured base URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The client could not be constructed.
    #[error("invalid client configuration: {0}")]
    Configuration(String),
}

impl ApiError {
    /// Build a status error without request context, mostly useful for fakes.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            method: String::new(),
            url: String::new(),
            message: message.into(),
            request_id: None,
        }
    }

    /// Shorthand for a 404 status error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::status(404, message)
    }

    /// The HTTP status code, when the API answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the API reported that the object does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }
}

/// Errors that can occur while serving provider operations.
///
/// Every variant is turned into an error diagnostic by the server; none of
/// them is ever surfaced as a gRPC status.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A Snyk API call failed.
    #[error("{summary}: {source}")]
    Api {
        /// Short, user facing summary such as "Unable to get organization".
        summary: String,
        /// The underlying client error.
        #[source]
        source: ApiError,
    },

    /// An operation failed with a summary and a detail message.
    #[error("{summary}: {detail}")]
    Failed {
        /// Short, user facing summary.
        summary: String,
        /// Longer explanation.
        detail: String,
    },

    /// Configuration failed validation.
    #[error("{}", summarize(.0))]
    Diagnostics(Vec<Diagnostic>),

    /// A resource or data source operation ran before the provider was configured.
    #[error("Unconfigured Snyk client")]
    Unconfigured,

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// An I/O error occurred while setting up the server.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The plugin was launched outside of its host.
    #[error("{0}")]
    Handshake(String),
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| match &d.detail {
            Some(detail) => format!("{}: {}", d.summary, detail),
            None => d.summary.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl ProviderError {
    /// Wrap an API error with the summary shown to the user.
    pub fn api(summary: impl Into<String>, source: ApiError) -> Self {
        Self::Api {
            summary: summary.into(),
            source,
        }
    }

    /// Build a failure with a summary and a detail.
    pub fn failed(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Failed {
            summary: summary.into(),
            detail: detail.into(),
        }
    }

    /// Convert the error into the diagnostics reported to the host.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        match self {
            Self::Api { summary, source } => {
                vec![Diagnostic::error(summary).with_detail(source.to_string())]
            }
            Self::Failed { summary, detail } => {
                vec![Diagnostic::error(summary).with_detail(detail)]
            }
            Self::Diagnostics(diagnostics) => diagnostics,
            Self::Unconfigured => vec![Diagnostic::error("Unconfigured Snyk client").with_detail(
                "Expected a configured Snyk client. Please report this issue to the provider developers.",
            )],
            other => vec![Diagnostic::error(other.to_string())],
        }
    }
}
