use crate::CoordinatorError;

use ceremony_shared::{
    catalog::Family,
    chain::ContributionId,
    structures::{GrantMode, TransferGrant},
};

use std::{fmt, path::PathBuf};
use time::OffsetDateTime;

const CONTRIBUTIONS_DIRECTORY: &str = "contributions";
const FALLBACK_CONSTRAINT_SYSTEM_DIRECTORY: &str = "r1cs";
const PHASE1_DIRECTORY: &str = "ph1";
const KEYS_DIRECTORY: &str = "keys";

/// A data structure representing all possible types of objects in storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// `contributions/{id}`
    ContributionDirectory(ContributionId),
    /// `contributions/{id}/{family}`
    FamilyDirectory(ContributionId, Family),
    /// `contributions/{id}/{family}/{file}`
    Artifact(ContributionId, Family, String),
    /// `ph1/{family}.ph1`
    Ph1(Family),
    /// The round-zero constraint system, `contributions/0000_initial/{family}/{canonical}.r1cs`
    ConstraintSystem(Family, String),
    /// `r1cs/{canonical}.r1cs`
    FallbackConstraintSystem(String),
    /// Extracted and imported keys of a final link, `keys/{id}/{family}`
    Keys(ContributionId, Family),
}

impl Locator {
    /// Returns the `/`-separated path of the object relative to the storage root.
    pub fn relative_path(&self) -> String {
        match self {
            Locator::ContributionDirectory(id) => format!("{}/{}", CONTRIBUTIONS_DIRECTORY, id),
            Locator::FamilyDirectory(id, family) => format!("{}/{}/{}", CONTRIBUTIONS_DIRECTORY, id, family),
            Locator::Artifact(id, family, file) => format!("{}/{}/{}/{}", CONTRIBUTIONS_DIRECTORY, id, family, file),
            Locator::Ph1(family) => format!("{}/{}.ph1", PHASE1_DIRECTORY, family),
            Locator::ConstraintSystem(family, canonical) => format!(
                "{}/{}/{}/{}.r1cs",
                CONTRIBUTIONS_DIRECTORY,
                ContributionId::initial(),
                family,
                canonical
            ),
            Locator::FallbackConstraintSystem(canonical) => {
                format!("{}/{}.r1cs", FALLBACK_CONSTRAINT_SYSTEM_DIRECTORY, canonical)
            }
            Locator::Keys(id, family) => format!("{}/{}/{}", KEYS_DIRECTORY, id, family),
        }
    }

    /// Returns the root directory holding every contribution.
    pub(crate) fn contributions_root() -> &'static str {
        CONTRIBUTIONS_DIRECTORY
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relative_path())
    }
}

/// A standard model for the ceremony's blob store.
pub trait Storage: Send + Sync {
    /// Returns the local path of a locator.
    fn to_path(&self, locator: &Locator) -> PathBuf;

    /// Returns `true` if a given locator exists in storage. Otherwise, returns `false`.
    fn exists(&self, locator: &Locator) -> bool;

    /// Returns the file names directly inside a directory locator, sorted.
    /// A missing directory has no files.
    fn list(&self, locator: &Locator) -> Result<Vec<String>, CoordinatorError>;

    /// Returns the contents of a locator.
    fn read(&self, locator: &Locator) -> Result<Vec<u8>, CoordinatorError>;

    /// Writes the contents of a locator, replacing any existing object.
    fn write(&self, locator: &Locator, contents: &[u8]) -> Result<(), CoordinatorError>;

    /// Copies the object at `source` to `destination`.
    fn copy(&self, source: &Locator, destination: &Locator) -> Result<(), CoordinatorError>;

    /// Removes the object at a locator.
    fn remove(&self, locator: &Locator) -> Result<(), CoordinatorError>;

    /// Returns a signed, time-bounded capability to read or write a locator.
    fn grant(
        &self,
        locator: &Locator,
        mode: GrantMode,
        expires_at: OffsetDateTime,
    ) -> Result<TransferGrant, CoordinatorError>;

    /// Returns the ids of every stored contribution, in chain order.
    fn contributions(&self) -> Result<Vec<ContributionId>, CoordinatorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths() {
        let id: ContributionId = "0001_alice".parse().unwrap();
        assert_eq!(
            Locator::ContributionDirectory(id.clone()).relative_path(),
            "contributions/0001_alice"
        );
        assert_eq!(
            Locator::Artifact(id.clone(), Family::V1, "a.ph2".to_string()).to_string(),
            "contributions/0001_alice/v1/a.ph2"
        );
        assert_eq!(Locator::Ph1(Family::Batch).relative_path(), "ph1/batch.ph1");
        assert_eq!(
            Locator::ConstraintSystem(Family::V2, "inclusion_32_1".to_string()).relative_path(),
            "contributions/0000_initial/v2/inclusion_32_1.r1cs"
        );
        assert_eq!(
            Locator::FallbackConstraintSystem("inclusion_32_1".to_string()).relative_path(),
            "r1cs/inclusion_32_1.r1cs"
        );
        assert_eq!(Locator::Keys(id, Family::V2).relative_path(), "keys/0001_alice/v2");
    }
}
