//! Error types for the Lambda Cloud client.

use thiserror::Error;

/// Errors raised by [`crate::lambda::LambdaClient`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LambdaError {
    /// Raised when the HTTP client cannot be constructed.
    #[error("failed to build HTTP client: {message}")]
    Client {
        /// Message from the HTTP stack.
        message: String,
    },
    /// Raised when a request cannot be sent or its body cannot be read,
    /// including timeouts.
    #[error("request to {path} failed: {message}")]
    Transport {
        /// API path that was called.
        path: String,
        /// Message from the HTTP stack.
        message: String,
    },
    /// Raised when the API answers with a status of 400 or above.
    #[error("API request failed: {status} {body}")]
    Api {
        /// Status line, for example `404 Not Found`.
        status: String,
        /// Raw response body.
        body: String,
    },
    /// Raised when a successful response body does not match the expected shape.
    #[error("failed to decode response from {path}: {message}")]
    Decode {
        /// API path that was called.
        path: String,
        /// Decoder message.
        message: String,
    },
    /// Raised when a launch succeeds but returns no instance identifiers.
    #[error("no instance IDs returned")]
    MissingInstanceIds,
}
