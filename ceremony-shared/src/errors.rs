use thiserror::Error;

#[derive(Debug, Error)]
pub enum CeremonyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transfer of {label} failed after {attempts} attempt(s): {last_error}")]
    TransferFailed {
        label: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Unrecognized artifact name: {0}")]
    UnrecognizedArtifactName(String),

    #[error("Circuit name {0} matches more than one catalog entry: {1}")]
    AmbiguousCircuitName(String, String),

    #[error("The setup binary did not produce the expected output {0}")]
    ContributionNotProduced(String),

    #[error("No circuits were processed for family {0}")]
    EmptyRound(String),

    #[error("Transfer grant for {0} has expired")]
    CapabilityExpired(String),

    #[error("Transfer grant for {0} carries an invalid signature")]
    InvalidSignature(String),

    #[error("Malformed predecessor contribution id: {0}")]
    MalformedPredecessorId(String),

    #[error("Invalid contributor label {0:?}, expected ASCII letters, digits or '-'")]
    InvalidContributor(String),

    #[error("Chain link {0} is missing circuits: {1}")]
    IncompleteChainLink(String, String),

    #[error("Manifest carries no upload grant for {0}")]
    MissingUploadGrant(String),

    #[error("{0} failed: {1}")]
    ToolFailed(String, String),

    #[error("Transfer request failed: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl CeremonyError {
    /// Returns an operator facing hint on how to recover from the failure.
    pub fn remediation(&self) -> &'static str {
        match self {
            CeremonyError::Configuration(_) => {
                "Install the missing tool or point the configuration at it, then rerun the command."
            }
            CeremonyError::TransferFailed { .. } | CeremonyError::Http(_) => {
                "Check network connectivity, delete the contributor workdir and rerun the round from scratch."
            }
            CeremonyError::UnrecognizedArtifactName(_) | CeremonyError::AmbiguousCircuitName(..) => {
                "Remove or rename the offending file in storage; the coordinator must reissue grants afterwards."
            }
            CeremonyError::ContributionNotProduced(_) | CeremonyError::ToolFailed(..) => {
                "Inspect the setup binary output above, delete the contributor workdir and rerun the round."
            }
            CeremonyError::EmptyRound(_) => {
                "Confirm the predecessor contribution exists for the requested family and request new grants."
            }
            CeremonyError::CapabilityExpired(_) | CeremonyError::InvalidSignature(_) => {
                "Ask the coordinator to issue a fresh manifest; expired grants are never renewed."
            }
            CeremonyError::MalformedPredecessorId(_) | CeremonyError::InvalidContributor(_) => {
                "Use a predecessor id of the form 0001_name and a contributor label made of letters, digits or '-'."
            }
            CeremonyError::IncompleteChainLink(..) => {
                "Rerun the round from scratch so every circuit of the family is contributed."
            }
            CeremonyError::MissingUploadGrant(_) => {
                "The manifest is inconsistent with the predecessor files; ask the coordinator to reissue it."
            }
            CeremonyError::Io(_) | CeremonyError::Json(_) | CeremonyError::Url(_) => {
                "Check the paths and files named above, clean the workdir and rerun."
            }
        }
    }
}
