use crate::{
    storage::{Locator, Storage},
    CoordinatorError,
};

use ceremony_shared::{
    catalog::{Family, FamilySelection},
    chain::ContributionId,
    setup_binary::SetupBinary,
    verification::{verify_round, RoundVerification},
};

use std::time::Instant;
use tracing::info;

pub(crate) struct Verification;

impl Verification {
    ///
    /// Verifies a stored contribution against round zero.
    ///
    /// Without an explicit selection, the families the contribution holds
    /// are verified.
    ///
    pub(crate) fn run(
        storage: &dyn Storage,
        setup: &dyn SetupBinary,
        contribution_id: &ContributionId,
        selection: Option<&FamilySelection>,
    ) -> Result<RoundVerification, CoordinatorError> {
        if contribution_id.is_initial() {
            return Err(CoordinatorError::VerificationOnInitialContribution);
        }
        let candidates = Locator::ContributionDirectory(contribution_id.clone());
        if !storage.exists(&candidates) {
            return Err(CoordinatorError::UnknownContribution(contribution_id.to_string()));
        }

        let selection = match selection {
            Some(selection) => selection.clone(),
            None => Self::stored_families(storage, contribution_id),
        };

        info!("Verifying {} ({})", contribution_id, selection);
        let now = Instant::now();
        let report = verify_round(
            setup,
            &storage.to_path(&candidates),
            &storage.to_path(&Locator::ContributionDirectory(ContributionId::initial())),
            &selection,
        )?;
        info!("Verified {} in {:?}", contribution_id, now.elapsed());

        Ok(report)
    }

    /// Returns the families a contribution has a directory for, or every family if it has none.
    fn stored_families(storage: &dyn Storage, contribution_id: &ContributionId) -> FamilySelection {
        let families: Vec<&str> = Family::ALL
            .iter()
            .filter(|family| {
                storage
                    .to_path(&Locator::FamilyDirectory(contribution_id.clone(), **family))
                    .is_dir()
            })
            .map(Family::as_str)
            .collect();
        families.join(",").parse().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{environment::Environment, storage::Disk};
    use ceremony_shared::{
        testing::FakeSetup,
        verification::Outcome,
    };

    #[test]
    fn test_verify_rejects_round_zero_and_unknown_contributions() {
        let directory = tempfile::tempdir().unwrap();
        let storage = Disk::load(&Environment::test(directory.path())).unwrap();
        let setup = FakeSetup::new();

        assert!(matches!(
            Verification::run(&storage, &setup, &ContributionId::initial(), None),
            Err(CoordinatorError::VerificationOnInitialContribution)
        ));
        assert!(matches!(
            Verification::run(&storage, &setup, &"0001_alice".parse().unwrap(), None),
            Err(CoordinatorError::UnknownContribution(_))
        ));
    }

    #[test]
    fn test_verify_stored_families_only() {
        let directory = tempfile::tempdir().unwrap();
        let storage = Disk::load(&Environment::test(directory.path())).unwrap();
        let setup = FakeSetup::new();
        let alice: ContributionId = "0001_alice".parse().unwrap();

        let initial = Locator::Artifact(
            ContributionId::initial(),
            Family::Batch,
            "batch_append_32_10_0000.ph2".to_string(),
        );
        storage.write(&initial, b"ph2:seed").unwrap();
        let candidate = Locator::Artifact(
            alice.clone(),
            Family::Batch,
            "batch_append_32_10_alice_contribution_0001.ph2".to_string(),
        );
        let candidate_path = storage.to_path(&candidate);
        std::fs::create_dir_all(candidate_path.parent().unwrap()).unwrap();
        setup
            .phase2_contribute(&storage.to_path(&initial), &candidate_path)
            .unwrap();

        let report = Verification::run(&storage, &setup, &alice, None).unwrap();
        assert_eq!(report.count(Outcome::Pass), 1);
        // Only one of the batch circuits was contributed.
        assert_eq!(report.missing.len(), 5);
        assert!(report.missing.iter().all(|circuit| circuit.family() == Family::Batch));
        assert!(!report.is_success());
    }
}
