use ceremony_shared::CeremonyError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Storage locator {0} is missing")]
    StorageLocatorMissing(String),

    #[error("Contribution {0} does not exist in storage")]
    UnknownContribution(String),

    #[error("Round zero has no contributions to verify")]
    VerificationOnInitialContribution,

    #[error("{0}")]
    Ceremony(#[from] CeremonyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoordinatorError {
    /// Returns an operator facing hint on how to recover from the failure.
    pub fn remediation(&self) -> &'static str {
        match self {
            CoordinatorError::StorageLocatorMissing(_) => {
                "Run `init` for the requested families before issuing grants or finalizing."
            }
            CoordinatorError::UnknownContribution(_) => "Run `list` to see the contributions held in storage.",
            CoordinatorError::VerificationOnInitialContribution => {
                "Pass the id of a contributor round, e.g. 0001_name."
            }
            CoordinatorError::Ceremony(error) => error.remediation(),
            CoordinatorError::Io(_) | CoordinatorError::Json(_) => {
                "Check the storage directory and configuration file named above."
            }
        }
    }
}
