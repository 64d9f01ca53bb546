//! Error taxonomy for hypervisor operations.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Failure of a control-plane operation.
///
/// Read paths (`list`, `screenshot`, `send_input`) never return these; they
/// degrade to sentinel or empty values. Mutating paths always do.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The management command did not finish within its bound.
    #[error("hypervisor command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The host could not satisfy the request. `message` tells the operator
    /// what to do; `raw` keeps the hypervisor's own text.
    #[error("{message}")]
    InsufficientResources { message: String, raw: String },

    /// Anything the classifier does not recognise. Carries the hypervisor's
    /// diagnostic verbatim.
    #[error("{0}")]
    HypervisorError(String),

    /// This host has no hypervisor management interface.
    #[error("hypervisor management is not available on this host")]
    NotSupported,

    /// The request was rejected before anything was submitted.
    #[error("invalid request: {0}")]
    InvalidSpec(String),

    /// The VM storage root could not be prepared.
    #[error("storage root {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Discriminant of [`ControlError`], for callers that map errors to status
/// codes or JSON without matching on payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    InsufficientResources,
    HypervisorError,
    NotSupported,
    InvalidSpec,
    Storage,
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::Timeout(_) => ErrorKind::Timeout,
            ControlError::InsufficientResources { .. } => ErrorKind::InsufficientResources,
            ControlError::HypervisorError(_) => ErrorKind::HypervisorError,
            ControlError::NotSupported => ErrorKind::NotSupported,
            ControlError::InvalidSpec(_) => ErrorKind::InvalidSpec,
            ControlError::Storage { .. } => ErrorKind::Storage,
        }
    }
}
