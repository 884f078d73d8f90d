use crate::{
    environment::Environment,
    storage::{Locator, Storage},
    CoordinatorError,
};

use ceremony_shared::{
    catalog::{Catalog, FamilySelection},
    chain::{ensure_coverage, next_id, ContributionId, ContributorLabel},
    naming::{derive_output_name, resolve_circuit, Extension},
    structures::{attestation_file_name, ExchangeManifest, FamilyGrants, GrantMode},
    CeremonyError,
};

use time::OffsetDateTime;
use tracing::{debug, info};

/// Resolves to the highest contribution held in storage.
pub const LATEST_CONTRIBUTION: &str = "latest";

pub(crate) struct GrantIssuance;

impl GrantIssuance {
    ///
    /// Issues the manifest a contributor needs to build the next link on top
    /// of `predecessor`.
    ///
    /// Every commitment of the predecessor in the selected families receives
    /// a read grant; its successor name and the round's attestation log
    /// receive write grants under the new contribution. All grants share one
    /// expiry. Fails without issuing anything if a family's commitments are
    /// missing or do not cover its circuits, or if a stored file does not
    /// follow the naming grammar.
    ///
    pub(crate) fn run(
        environment: &Environment,
        storage: &dyn Storage,
        contributor: &ContributorLabel,
        predecessor: &str,
        selection: &FamilySelection,
        now: OffsetDateTime,
    ) -> Result<ExchangeManifest, CoordinatorError> {
        let predecessor = Self::resolve_predecessor(storage, predecessor)?;
        let contribution_id = next_id(&predecessor.to_string(), contributor)?;
        let expires_at = now + environment.grant_validity();
        let catalog = Catalog::standard().subset(selection);

        info!(
            "Issuing grants for {} on top of {} ({})",
            contribution_id, predecessor, selection
        );

        let mut families = Vec::with_capacity(selection.families().len());
        for family in selection.families() {
            let mut grants = FamilyGrants::new(*family);

            let commitments: Vec<String> = storage
                .list(&Locator::FamilyDirectory(predecessor.clone(), *family))?
                .into_iter()
                .filter(|file| file.ends_with(Extension::Ph2.as_str()))
                .collect();
            if commitments.is_empty() {
                return Err(CeremonyError::EmptyRound(family.to_string()).into());
            }

            let mut circuits = Vec::with_capacity(commitments.len());
            for file in &commitments {
                circuits.push(resolve_circuit(file, &catalog, Some(*family))?);
            }
            ensure_coverage(
                &predecessor,
                &catalog.subset(&FamilySelection::only(*family)),
                circuits.iter(),
            )?;

            for file in commitments {
                let output = derive_output_name(&file, contributor, contribution_id.sequence())?;

                let download = storage.grant(
                    &Locator::Artifact(predecessor.clone(), *family, file.clone()),
                    GrantMode::Read,
                    expires_at,
                )?;
                let upload = storage.grant(
                    &Locator::Artifact(contribution_id.clone(), *family, output.clone()),
                    GrantMode::Write,
                    expires_at,
                )?;
                debug!("{}/{} -> {}", family, file, output);

                grants.download.insert(file, download.url);
                grants.upload.insert(output, upload.url);
            }

            let attestation = attestation_file_name(&contribution_id);
            let upload = storage.grant(
                &Locator::Artifact(contribution_id.clone(), *family, attestation.clone()),
                GrantMode::Write,
                expires_at,
            )?;
            grants.upload.insert(attestation, upload.url);

            info!("{} carries {} commitments", family, grants.download.len());
            families.push(grants);
        }

        Ok(ExchangeManifest {
            contributor: contributor.clone(),
            contribution_id,
            previous_contribution: predecessor,
            expires_at: Some(expires_at),
            families,
        })
    }

    fn resolve_predecessor(storage: &dyn Storage, predecessor: &str) -> Result<ContributionId, CoordinatorError> {
        if predecessor == LATEST_CONTRIBUTION {
            return storage
                .contributions()?
                .pop()
                .ok_or_else(|| CoordinatorError::UnknownContribution(predecessor.to_string()));
        }

        let id: ContributionId = predecessor.parse()?;
        match storage.exists(&Locator::ContributionDirectory(id.clone())) {
            true => Ok(id),
            false => Err(CoordinatorError::UnknownContribution(id.to_string())),
        }
    }
}
