// Centralized error handling for the node

use crate::models::api::ErrorResponse;
use crate::models::transfer::TransferStatus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

/// Input rejected before any state change
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("File is empty")]
    EmptyFile,

    #[error("File too large: {size} bytes > {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File type '{0}' is not allowed")]
    UnsupportedType(String),

    #[error("Rating score must be between 1 and 5, got {0}")]
    InvalidScore(u8),

    #[error("Peers cannot rate themselves")]
    SelfRating,

    #[error("Rating already submitted for this target")]
    DuplicateRating,

    #[error("Invalid content identifier: {0}")]
    InvalidCid(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("File not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReputationError {
    #[error("Reputation engine is not running")]
    EngineStopped,

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThrottleError {
    #[error("No throttler registered for peer {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum RatingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("File not found: {0}")]
    UnknownFile(String),

    #[error(transparent)]
    Reputation(#[from] ReputationError),
}

/// Errors on the peer-to-peer wire
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Message too large: {size} bytes > {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage { expected: String, got: String },
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transfer not found: {0}")]
    NotFound(String),

    #[error("Transfer {id} is not active (status: {status})")]
    NotActive { id: String, status: TransferStatus },

    #[error("File {0} is not hosted on this node")]
    NotHosted(String),

    #[error("Request rejected by remote peer: {0}")]
    Rejected(String),

    #[error("Peer offer for {cid} does not match the indexed record: {reason}")]
    Mismatch { cid: String, reason: String },

    #[error("Transfer {id} did not complete: {reason}")]
    Incomplete { id: String, reason: String },

    #[error("Transfer manager is shutting down")]
    Closed,

    #[error("I/O error during transfer: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors of the node-level operations that compose several components
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error(transparent)]
    Rating(#[from] RatingError),

    #[error(transparent)]
    Reputation(#[from] ReputationError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the HTTP API
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        ApiError::NotFound(err.to_string())
    }
}

impl From<ReputationError> for ApiError {
    fn from(err: ReputationError) -> Self {
        match err {
            ReputationError::UnknownPeer(_) => ApiError::NotFound(err.to_string()),
            ReputationError::EngineStopped => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<RatingError> for ApiError {
    fn from(err: RatingError) -> Self {
        match err {
            RatingError::Validation(e) => e.into(),
            RatingError::Reputation(e) => e.into(),
            RatingError::UnknownPeer(_) | RatingError::UnknownFile(_) => {
                ApiError::NotFound(err.to_string())
            }
        }
    }
}

impl From<TransferError> for ApiError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::NotFound(_) | TransferError::NotHosted(_) => {
                ApiError::NotFound(err.to_string())
            }
            TransferError::NotActive { .. } => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<LibraryError> for ApiError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::Validation(e) => e.into(),
            LibraryError::UnknownPeer(_) => ApiError::NotFound(err.to_string()),
            LibraryError::Rating(e) => e.into(),
            LibraryError::Reputation(e) => e.into(),
            LibraryError::Transfer(e) => e.into(),
            LibraryError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
