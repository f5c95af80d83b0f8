use thiserror::Error;

use crate::domain::TrainingStatus;

/// Operator input problems. Always raised before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please upload a folder before starting the training.")]
    EmptyDataset,
    #[error("training cannot start while status is {0}")]
    TrainingUnavailable(TrainingStatus),
    #[error("a dataset upload is already in progress")]
    UploadInProgress,
    #[error("File not uploaded!")]
    MissingImage,
    #[error("Player not selected!")]
    MissingPlayer,
    #[error("Cropping option not selected!")]
    MissingCropDecision,
    #[error("corner set needs exactly 4 points, got {count}")]
    IncompleteCornerSet { count: usize },
}

/// Network failures and non-success responses from the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("server responded with {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

impl TransportError {
    /// Text meant for the operator: the server's own message when it sent one.
    pub fn operator_message(&self) -> &str {
        match self {
            Self::Rejected { message, .. } if !message.trim().is_empty() => message,
            Self::Rejected { .. } => "request rejected",
            Self::Network(_) => "Network error",
            Self::InvalidBody(message) => message,
        }
    }
}

/// Push-channel payloads the client could not interpret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid event frame: {0}")]
    InvalidFrame(String),
    #[error("unrecognized metric variant {variant:?}")]
    UnknownVariant { variant: Option<String> },
    #[error("unexpected output shape: {0}")]
    UnexpectedOutput(String),
}
