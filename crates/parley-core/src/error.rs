// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Parley conversation engine.

use std::time::Duration;

use thiserror::Error;

/// The primary error type used across all Parley crates.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Configuration errors (invalid values, missing credentials).
    #[error("configuration error: {0}")]
    Config(String),

    /// Database errors (connection, query failure, serialization of stored rows).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Media retrieval errors (download failure, size limit, unsupported payload).
    #[error("media error: {message}")]
    Media {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Media key, ciphertext, or declared category did not produce valid plaintext.
    #[error("media decryption failed: {0}")]
    DecryptionFailed(String),

    /// Object storage rejected or failed to accept an upload.
    #[error("object storage upload failed: {message}")]
    StorageUpload {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Outbound provider errors other than throttling.
    #[error("egress error: {message}")]
    Egress {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The provider kept throttling until the retry budget ran out.
    #[error("send throttled by provider after {attempts} attempts")]
    SendThrottleExhausted { attempts: u32 },

    /// The egress worker is no longer accepting requests.
    #[error("egress queue is closed")]
    EgressClosed,

    /// A dialogue handler reported a failure.
    #[error("flow error: {0}")]
    Flow(String),

    /// Any failure inside a turn; every write of the turn was rolled back.
    #[error("turn rolled back: {source}")]
    Transaction { source: Box<ParleyError> },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`ParleyError`], used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Config,
    Storage,
    Media,
    DecryptionFailed,
    StorageUploadFailed,
    Egress,
    SendThrottleExhausted,
    EgressClosed,
    Flow,
    TransactionFailure,
    Timeout,
    Internal,
}

impl ParleyError {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Media { .. } => ErrorKind::Media,
            Self::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
            Self::StorageUpload { .. } => ErrorKind::StorageUploadFailed,
            Self::Egress { .. } => ErrorKind::Egress,
            Self::SendThrottleExhausted { .. } => ErrorKind::SendThrottleExhausted,
            Self::EgressClosed => ErrorKind::EgressClosed,
            Self::Flow(_) => ErrorKind::Flow,
            Self::Transaction { .. } => ErrorKind::TransactionFailure,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the same operation may succeed if attempted again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StorageUpload { .. }
            | Self::SendThrottleExhausted { .. }
            | Self::Timeout { .. } => true,
            Self::Transaction { source } => source.is_retryable(),
            _ => false,
        }
    }

    /// Wraps an error raised inside a turn. Already-wrapped errors are returned unchanged.
    pub fn into_transaction(self) -> Self {
        match self {
            Self::Transaction { .. } => self,
            other => Self::Transaction {
                source: Box::new(other),
            },
        }
    }

    /// Wraps a foreign error as a storage failure.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            source: Box::new(err),
        }
    }
}

impl From<serde_json::Error> for ParleyError {
    fn from(err: serde_json::Error) -> Self {
        Self::storage(err)
    }
}
