use crate::{
    commands::{Finalization, FinalizeReport, GrantIssuance, Initialization, InitializationReport, Verification},
    environment::Environment,
    storage::{Disk, Storage},
    CoordinatorError,
};

use ceremony_shared::{
    catalog::FamilySelection,
    chain::{ContributionId, ContributorLabel},
    prover::{ProverCommand, ProverTool},
    setup_binary::{SetupBinary, SetupCommand},
    structures::ExchangeManifest,
    verification::RoundVerification,
};

use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

///
/// The ceremony coordinator.
///
/// Owns the blob store and drives the external tools over it. Every
/// operation is a single pass over storage; no state is kept between calls.
///
pub struct Coordinator {
    environment: Environment,
    storage: Box<dyn Storage>,
    setup: Arc<dyn SetupBinary>,
    prover: Arc<dyn ProverTool>,
}

impl Coordinator {
    /// Creates a new instance of the `Coordinator` over the given storage and tools.
    pub fn new(
        environment: Environment,
        storage: Box<dyn Storage>,
        setup: Arc<dyn SetupBinary>,
        prover: Arc<dyn ProverTool>,
    ) -> Self {
        Self {
            environment,
            storage,
            setup,
            prover,
        }
    }

    /// Creates a `Coordinator` over disk storage, driving the configured tools.
    pub fn from_environment(environment: Environment) -> Result<Self, CoordinatorError> {
        let (setup_binary, prover_binary) = environment.toolchain().check()?;
        info!(
            "Using {} and {}",
            setup_binary.display(),
            prover_binary.display()
        );

        let storage = Disk::load(&environment)?;
        Ok(Self::new(
            environment,
            Box::new(storage),
            Arc::new(SetupCommand::new(setup_binary)),
            Arc::new(ProverCommand::new(prover_binary)),
        ))
    }

    ///
    /// Creates a `Coordinator` over disk storage without resolving the
    /// external tools. Operations that invoke them fail when run.
    ///
    pub fn load(environment: Environment) -> Result<Self, CoordinatorError> {
        let storage = Disk::load(&environment)?;
        let toolchain = environment.toolchain().clone();
        Ok(Self::new(
            environment,
            Box::new(storage),
            Arc::new(SetupCommand::new(toolchain.setup_binary)),
            Arc::new(ProverCommand::new(toolchain.prover_binary)),
        ))
    }

    #[inline]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    #[inline]
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Creates round zero for the selected families.
    pub fn initialize(&self, selection: &FamilySelection) -> Result<InitializationReport, CoordinatorError> {
        Initialization::run(
            &self.environment,
            self.storage(),
            self.setup.as_ref(),
            self.prover.as_ref(),
            selection,
        )
    }

    ///
    /// Issues the manifest for the next contribution on top of `predecessor`.
    ///
    /// `predecessor` is a contribution id, or `latest` for the highest stored one.
    ///
    pub fn issue_grants(
        &self,
        contributor: &ContributorLabel,
        predecessor: &str,
        selection: &FamilySelection,
    ) -> Result<ExchangeManifest, CoordinatorError> {
        GrantIssuance::run(
            &self.environment,
            self.storage(),
            contributor,
            predecessor,
            selection,
            OffsetDateTime::now_utc(),
        )
    }

    /// Verifies a stored contribution against round zero.
    pub fn verify(
        &self,
        contribution_id: &ContributionId,
        selection: Option<&FamilySelection>,
    ) -> Result<RoundVerification, CoordinatorError> {
        Verification::run(self.storage(), self.setup.as_ref(), contribution_id, selection)
    }

    /// Produces the deployable keys of the selected families from a final contribution.
    pub fn finalize(
        &self,
        final_id: &ContributionId,
        selection: &FamilySelection,
    ) -> Result<FinalizeReport, CoordinatorError> {
        Finalization::run(
            self.storage(),
            self.setup.as_ref(),
            self.prover.as_ref(),
            final_id,
            selection,
            self.environment.deployment_directory(),
        )
    }

    /// Returns every stored contribution in chain order.
    pub fn contributions(&self) -> Result<Vec<ContributionId>, CoordinatorError> {
        self.storage.contributions()
    }

    /// Returns the highest stored contribution.
    pub fn latest(&self) -> Result<ContributionId, CoordinatorError> {
        self.contributions()?
            .pop()
            .ok_or_else(|| CoordinatorError::UnknownContribution(crate::commands::LATEST_CONTRIBUTION.to_string()))
    }
}
