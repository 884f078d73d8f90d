use crate::{
    environment::Environment,
    storage::{Locator, Storage},
    CoordinatorError,
};

use ceremony_shared::{
    catalog::{Catalog, CircuitIdentity, Family, FamilySelection},
    chain::ContributionId,
    naming::{ArtifactName, Extension},
    prover::ProverTool,
    setup_binary::SetupBinary,
    utils::create_parent_directory,
    CeremonyError,
};

use std::time::Instant;
use tracing::{debug, info};

/// The counts of round-zero objects an initialization produced or found in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitializationReport {
    pub created: usize,
    pub skipped: usize,
}

pub(crate) struct Initialization;

impl Initialization {
    ///
    /// Runs round zero for the selected families.
    ///
    /// Per family, converts the powers-of-tau file into the phase 1 input,
    /// then generates every circuit's constraint system and initial
    /// commitment. Objects already in storage are kept, so a partially
    /// initialized ceremony can be resumed. The first failure aborts.
    ///
    pub(crate) fn run(
        environment: &Environment,
        storage: &dyn Storage,
        setup: &dyn SetupBinary,
        prover: &dyn ProverTool,
        selection: &FamilySelection,
    ) -> Result<InitializationReport, CoordinatorError> {
        let catalog = Catalog::standard().subset(selection);
        let mut report = InitializationReport::default();

        for family in selection.families() {
            info!("Initializing {} ({} circuits)", family, catalog.family(*family).len());
            let now = Instant::now();

            Self::phase1(environment, storage, setup, *family, &mut report)?;
            for circuit in catalog.family(*family) {
                Self::constraint_system(storage, prover, circuit, &mut report)?;
                Self::initial_commitment(storage, setup, circuit, &mut report)?;
            }

            info!("Initialized {} in {:?}", family, now.elapsed());
        }

        Ok(report)
    }

    fn phase1(
        environment: &Environment,
        storage: &dyn Storage,
        setup: &dyn SetupBinary,
        family: Family,
        report: &mut InitializationReport,
    ) -> Result<(), CoordinatorError> {
        let locator = Locator::Ph1(family);
        if storage.exists(&locator) {
            debug!("{} exists, skipping the powers-of-tau conversion", locator);
            report.skipped += 1;
            return Ok(());
        }

        let ptau = environment.toolchain().ptau(family)?;
        let path = storage.to_path(&locator);
        create_parent_directory(&path)?;
        setup.phase1_from_ptau(ptau, &path)?;
        Self::ensure_written(storage, &locator, "phase 1 conversion")?;

        info!("Converted {} into {}", ptau.display(), locator);
        report.created += 1;
        Ok(())
    }

    fn constraint_system(
        storage: &dyn Storage,
        prover: &dyn ProverTool,
        circuit: &CircuitIdentity,
        report: &mut InitializationReport,
    ) -> Result<(), CoordinatorError> {
        let locator = Locator::ConstraintSystem(circuit.family(), circuit.canonical_name());
        if storage.exists(&locator) {
            debug!("{} exists, skipping generation", locator);
            report.skipped += 1;
            return Ok(());
        }

        let path = storage.to_path(&locator);
        create_parent_directory(&path)?;
        prover.generate_r1cs(circuit, &path)?;
        Self::ensure_written(storage, &locator, "constraint system generation")?;

        debug!("Generated {}", locator);
        report.created += 1;
        Ok(())
    }

    fn initial_commitment(
        storage: &dyn Storage,
        setup: &dyn SetupBinary,
        circuit: &CircuitIdentity,
        report: &mut InitializationReport,
    ) -> Result<(), CoordinatorError> {
        let family = circuit.family();
        let initial = ContributionId::initial();
        let ph2 = Locator::Artifact(
            initial.clone(),
            family,
            ArtifactName::initial(circuit, Extension::Ph2).to_string(),
        );
        let evals = Locator::Artifact(
            initial,
            family,
            ArtifactName::initial(circuit, Extension::Evals).to_string(),
        );
        if storage.exists(&ph2) && storage.exists(&evals) {
            debug!("{} exists, skipping phase 2 setup", ph2);
            report.skipped += 1;
            return Ok(());
        }

        let constraint_system = Locator::ConstraintSystem(family, circuit.canonical_name());
        setup.phase2_new(
            &storage.to_path(&Locator::Ph1(family)),
            &storage.to_path(&constraint_system),
            &storage.to_path(&ph2),
            &storage.to_path(&evals),
        )?;
        Self::ensure_written(storage, &ph2, "phase 2 setup")?;
        Self::ensure_written(storage, &evals, "phase 2 setup")?;

        info!("Created the initial commitment of {}", circuit.qualified_name());
        report.created += 1;
        Ok(())
    }

    fn ensure_written(storage: &dyn Storage, locator: &Locator, step: &str) -> Result<(), CoordinatorError> {
        match storage.exists(locator) {
            true => Ok(()),
            false => Err(CeremonyError::ToolFailed(step.to_string(), format!("{} was not written", locator)).into()),
        }
    }
}
