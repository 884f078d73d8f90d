use ceremony_contributor::{Executor, RoundReport, Transport};
use ceremony_coordinator::{
    environment::Environment,
    storage::{Disk, Locator},
    Coordinator,
    CoordinatorError,
    Storage,
    CHECKSUM_FILE,
};
use ceremony_shared::{
    catalog::{Catalog, Family, FamilySelection},
    chain::{next_id, ContributionId, ContributorLabel},
    structures::ExchangeManifest,
    testing::{FakeProver, FakeSetup},
    verification::Outcome,
};

use std::{path::PathBuf, sync::Arc};

struct Ceremony {
    directory: tempfile::TempDir,
    environment: Environment,
    coordinator: Coordinator,
    setup: Arc<FakeSetup>,
    transport: Transport,
}

impl Ceremony {
    /// Initializes round zero of `families` with fake tools.
    fn new(families: &FamilySelection) -> Self {
        let directory = tempfile::tempdir().unwrap();
        let mut environment = Environment::test(directory.path());
        for family in families.families() {
            let ptau = directory.path().join(format!("{}.ptau", family));
            std::fs::write(&ptau, format!("ptau:{}", family)).unwrap();
            environment.settings_mut().toolchain.ptau.insert(*family, ptau);
        }

        let storage = Disk::load(&environment).unwrap();
        let transport = Transport::new(environment.retry_policy().clone())
            .with_authority(storage.authority().clone(), storage.base_url().clone());
        let setup = Arc::new(FakeSetup::new());
        let coordinator = Coordinator::new(
            environment.clone(),
            Box::new(storage),
            setup.clone(),
            Arc::new(FakeProver::new()),
        );
        coordinator.initialize(families).unwrap();

        Self {
            directory,
            environment,
            coordinator,
            setup,
            transport,
        }
    }

    fn workdir(&self, contributor: &str) -> PathBuf {
        self.directory.path().join("workdirs").join(contributor)
    }

    /// Issues grants, hands the manifest over as JSON and runs the contributor's round.
    async fn contribute(
        &self,
        contributor: &str,
        predecessor: &str,
        issued: &FamilySelection,
        selected: &FamilySelection,
    ) -> (ExchangeManifest, RoundReport) {
        let contributor = ContributorLabel::new(contributor).unwrap();
        let manifest = self.coordinator.issue_grants(&contributor, predecessor, issued).unwrap();

        let path = self.directory.path().join(format!("{}.json", manifest.contribution_id));
        manifest.store(&path).unwrap();
        let manifest = ExchangeManifest::load(&path).unwrap();

        let executor = Executor::new(self.setup.clone(), self.transport.clone(), self.workdir(contributor.as_str()))
            .with_concurrency(2);
        let report = executor.execute_round(&manifest, selected).await.unwrap();
        (manifest, report)
    }

    fn storage(&self) -> &dyn Storage {
        self.coordinator.storage()
    }
}

fn families(selection: &str) -> FamilySelection {
    selection.parse().unwrap()
}

#[tokio::test]
async fn test_two_families_with_alice() {
    let selection = families("v1,batch");
    let ceremony = Ceremony::new(&selection);

    let alice = ContributorLabel::new("alice").unwrap();
    assert_eq!(next_id("0000_initial", &alice).unwrap().to_string(), "0001_alice");

    let (manifest, report) = ceremony.contribute("alice", "0000_initial", &selection, &selection).await;
    assert_eq!(manifest.contribution_id.to_string(), "0001_alice");
    assert_eq!(report.attestation.len(), Catalog::standard().subset(&selection).len());

    let verification = ceremony.coordinator.verify(&manifest.contribution_id, None).unwrap();
    assert!(verification.is_success(), "{}", verification);
    assert!(verification.missing.is_empty());
    for family in selection.families() {
        let family_only = FamilySelection::only(*family);
        let verification = ceremony
            .coordinator
            .verify(&manifest.contribution_id, Some(&family_only))
            .unwrap();
        assert!(verification.is_success());
        assert_eq!(verification.count(Outcome::Pass), Catalog::standard().subset(&family_only).len());
    }

    // The attestation log of each family reached storage.
    let log = ceremony
        .storage()
        .read(&Locator::Artifact(
            manifest.contribution_id.clone(),
            Family::Batch,
            manifest.attestation_file_name(),
        ))
        .unwrap();
    assert!(String::from_utf8(log).unwrap().contains("batch_append_32_10: "));

    // A second contributor builds on the latest link and is still rooted at round zero.
    let (manifest, _) = ceremony.contribute("bob", "latest", &selection, &selection).await;
    assert_eq!(manifest.contribution_id.to_string(), "0002_bob");
    assert_eq!(manifest.previous_contribution.to_string(), "0001_alice");
    assert!(ceremony.coordinator.verify(&manifest.contribution_id, None).unwrap().is_success());
    assert_eq!(
        ceremony.coordinator.latest().unwrap().to_string(),
        "0002_bob"
    );
}

#[tokio::test]
async fn test_tampered_candidate_fails_verification() {
    let selection = FamilySelection::only(Family::Batch);
    let ceremony = Ceremony::new(&selection);
    let (manifest, _) = ceremony.contribute("alice", "0000_initial", &selection, &selection).await;

    let tampered = Locator::Artifact(
        manifest.contribution_id.clone(),
        Family::Batch,
        "batch_update_32_10_alice_contribution_0001.ph2".to_string(),
    );
    let mut contents = ceremony.storage().read(&tampered).unwrap();
    contents.push(b'!');
    ceremony.storage().write(&tampered, &contents).unwrap();

    let verification = ceremony.coordinator.verify(&manifest.contribution_id, None).unwrap();
    assert!(!verification.is_success());
    assert_eq!(verification.count(Outcome::Fail), 1);
    assert_eq!(verification.count(Outcome::Pass), 5);
}

#[tokio::test]
async fn test_round_missing_a_circuit_fails_verification() {
    let selection = FamilySelection::only(Family::Batch);
    let ceremony = Ceremony::new(&selection);
    let (manifest, _) = ceremony.contribute("alice", "0000_initial", &selection, &selection).await;

    ceremony
        .storage()
        .remove(&Locator::Artifact(
            manifest.contribution_id.clone(),
            Family::Batch,
            "batch_address-append_40_250_alice_contribution_0001.ph2".to_string(),
        ))
        .unwrap();

    let verification = ceremony.coordinator.verify(&manifest.contribution_id, None).unwrap();
    assert!(!verification.is_success());
    assert_eq!(verification.count(Outcome::Pass), 5);
    assert_eq!(verification.missing.len(), 1);
    assert_eq!(verification.missing[0].canonical_name(), "batch_address-append_40_250");
}

#[tokio::test]
async fn test_finalize_is_idempotent() {
    let selection = FamilySelection::only(Family::Batch);
    let ceremony = Ceremony::new(&selection);
    let (manifest, _) = ceremony.contribute("alice", "0000_initial", &selection, &selection).await;

    let first = ceremony.coordinator.finalize(&manifest.contribution_id, &selection).unwrap();
    assert!(first.is_success(), "{}", first);
    assert_eq!(first.succeeded.len(), 6);
    assert_eq!(ceremony.setup.extractions(), 6);

    let checksum_path = ceremony.environment.deployment_directory().join(CHECKSUM_FILE);
    let checksum = std::fs::read_to_string(&checksum_path).unwrap();
    assert_eq!(checksum.lines().count(), 12);
    assert!(checksum.contains("  batch_append_32_10.key\n"));

    let second = ceremony.coordinator.finalize(&manifest.contribution_id, &selection).unwrap();
    assert!(second.is_success());
    assert_eq!(ceremony.setup.extractions(), 6);
    assert_eq!(first.checksum, second.checksum);
    assert_eq!(std::fs::read_to_string(&checksum_path).unwrap(), checksum);
}

#[tokio::test]
async fn test_family_filter_leaves_other_families_untouched() {
    let selection = families("v1,batch");
    let ceremony = Ceremony::new(&selection);
    let batch = FamilySelection::only(Family::Batch);

    let (manifest, report) = ceremony.contribute("alice", "0000_initial", &selection, &batch).await;
    assert!(report.uploaded.iter().all(|path| path.starts_with("batch/")));
    assert!(!ceremony
        .storage()
        .exists(&Locator::FamilyDirectory(manifest.contribution_id.clone(), Family::V1)));
    assert!(!ceremony
        .workdir("alice")
        .join("retained/0000_initial/v1")
        .exists());

    // Only the stored family is verified unless asked otherwise.
    let verification = ceremony.coordinator.verify(&manifest.contribution_id, None).unwrap();
    assert!(verification.is_success());
    let verification = ceremony
        .coordinator
        .verify(&manifest.contribution_id, Some(&selection))
        .unwrap();
    assert!(!verification.is_success());
    assert_eq!(
        verification.missing.len(),
        Catalog::standard().subset(&FamilySelection::only(Family::V1)).len()
    );
}

#[tokio::test]
async fn test_verification_of_round_zero_is_rejected() {
    let selection = FamilySelection::only(Family::Batch);
    let ceremony = Ceremony::new(&selection);
    assert!(matches!(
        ceremony.coordinator.verify(&ContributionId::initial(), None),
        Err(CoordinatorError::VerificationOnInitialContribution)
    ));
}
