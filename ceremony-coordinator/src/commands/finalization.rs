use crate::{
    storage::{Locator, Storage},
    CoordinatorError,
};

use ceremony_shared::{
    catalog::{Catalog, CircuitIdentity, FamilySelection},
    chain::ContributionId,
    naming::{ArtifactName, Extension},
    prover::{ImportFlags, ImportPaths, ProverTool},
    setup_binary::SetupBinary,
    utils::{copy_file, sha256_file},
    CeremonyError,
};

use itertools::Itertools;
use std::{
    fmt,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info};

/// The name of the content hash manifest in the deployment directory.
pub const CHECKSUM_FILE: &str = "CHECKSUM";

/// Where a circuit's constraint system may be found, in priority order.
const CONSTRAINT_SYSTEM_RESOLVERS: [fn(&ContributionId, &CircuitIdentity) -> Locator; 3] =
    [contribution_local, round_zero, fallback];

fn contribution_local(final_id: &ContributionId, circuit: &CircuitIdentity) -> Locator {
    Locator::Artifact(
        final_id.clone(),
        circuit.family(),
        format!("{}.r1cs", circuit.canonical_name()),
    )
}

fn round_zero(_: &ContributionId, circuit: &CircuitIdentity) -> Locator {
    Locator::ConstraintSystem(circuit.family(), circuit.canonical_name())
}

fn fallback(_: &ContributionId, circuit: &CircuitIdentity) -> Locator {
    Locator::FallbackConstraintSystem(circuit.canonical_name())
}

/// The outcome of a finalization pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    /// The qualified names of the circuits whose keys were deployed.
    pub succeeded: Vec<String>,
    /// The qualified names of the circuits that failed, with the reason.
    pub failed: Vec<(String, String)>,
    /// The digest of the `CHECKSUM` manifest after the pass, if one was written.
    pub checksum: Option<String>,
}

impl FinalizeReport {
    pub fn is_success(&self) -> bool {
        !self.succeeded.is_empty() && self.failed.is_empty()
    }
}

impl fmt::Display for FinalizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (circuit, reason) in &self.failed {
            writeln!(f, "  failed  {}: {}", circuit, reason)?;
        }
        write!(
            f,
            "{} succeeded, {} failed: {}",
            self.succeeded.len(),
            self.failed.len(),
            if self.is_success() { "PASS" } else { "FAIL" }
        )
    }
}

/// The deployable files produced for one circuit.
struct DeployedKeys {
    key: PathBuf,
    vkey: PathBuf,
}

pub(crate) struct Finalization;

impl Finalization {
    ///
    /// Turns the final link of the chain into deployable key files.
    ///
    /// Each circuit of the selection is processed independently: a failing
    /// circuit is recorded in the report and the pass moves on. Keys already
    /// extracted from the final link are reused. The `CHECKSUM` manifest
    /// of the deployment directory is rewritten after the pass.
    ///
    pub(crate) fn run(
        storage: &dyn Storage,
        setup: &dyn SetupBinary,
        prover: &dyn ProverTool,
        final_id: &ContributionId,
        selection: &FamilySelection,
        deployment_directory: &Path,
    ) -> Result<FinalizeReport, CoordinatorError> {
        if !storage.exists(&Locator::ContributionDirectory(final_id.clone())) {
            return Err(CoordinatorError::UnknownContribution(final_id.to_string()));
        }
        fs_err::create_dir_all(deployment_directory)?;

        info!("Finalizing {} ({})", final_id, selection);
        let catalog = Catalog::standard().subset(selection);
        let mut report = FinalizeReport::default();

        for circuit in catalog.iter() {
            let name = circuit.qualified_name();
            match Self::finalize_circuit(storage, setup, prover, final_id, circuit, deployment_directory) {
                Ok(deployed) => {
                    debug!("Deployed {} and {}", deployed.key.display(), deployed.vkey.display());
                    report.succeeded.push(name);
                }
                Err(failure) => {
                    error!("Unable to finalize {}: {}", name, failure);
                    report.failed.push((name, failure.to_string()));
                }
            }
        }

        if !report.succeeded.is_empty() {
            report.checksum = Some(write_checksum_manifest(deployment_directory)?);
        }

        info!(
            "Finalized {}: {} succeeded, {} failed",
            final_id,
            report.succeeded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn finalize_circuit(
        storage: &dyn Storage,
        setup: &dyn SetupBinary,
        prover: &dyn ProverTool,
        final_id: &ContributionId,
        circuit: &CircuitIdentity,
        deployment_directory: &Path,
    ) -> Result<DeployedKeys, CoordinatorError> {
        let canonical = circuit.canonical_name();
        let keys = storage.to_path(&Locator::Keys(final_id.clone(), circuit.family()));
        let pk = keys.join(format!("{}.pk", canonical));
        let vk = keys.join(format!("{}.vk", canonical));

        if pk.exists() && vk.exists() {
            debug!("Keys of {} were already extracted", circuit.qualified_name());
        } else {
            let ph2 = Self::locate_artifact(storage, final_id, circuit, Extension::Ph2)?;
            let evals = Self::locate_evals(storage, final_id, circuit)?;
            fs_err::create_dir_all(&keys)?;
            setup.extract_keys(&ph2, &evals, &pk, &vk)?;
            info!("Extracted the keys of {}", circuit.qualified_name());
        }

        let r1cs = CONSTRAINT_SYSTEM_RESOLVERS
            .iter()
            .map(|resolve| resolve(final_id, circuit))
            .find(|locator| storage.exists(locator))
            .ok_or_else(|| CoordinatorError::StorageLocatorMissing(format!("{}.r1cs", circuit.qualified_name())))?;

        let key = keys.join(format!("{}.key", canonical));
        let vkey = keys.join(format!("{}.vkey", canonical));
        prover.import_setup(
            &ImportFlags::for_circuit(circuit),
            &ImportPaths {
                pk: &pk,
                vk: &vk,
                r1cs: &storage.to_path(&r1cs),
                key: &key,
                vkey: &vkey,
            },
        )?;
        for produced in [&key, &vkey].iter() {
            if !produced.exists() {
                return Err(CeremonyError::ToolFailed(
                    "import-setup".to_string(),
                    format!("{} was not written", produced.display()),
                )
                .into());
            }
        }

        let deployed = DeployedKeys {
            key: deployment_directory.join(format!("{}.key", canonical)),
            vkey: deployment_directory.join(format!("{}.vkey", canonical)),
        };
        copy_file(&key, &deployed.key)?;
        copy_file(&vkey, &deployed.vkey)?;
        Ok(deployed)
    }

    /// Returns the path of the circuit's file with `extension` in the given link.
    fn find_artifact(
        storage: &dyn Storage,
        id: &ContributionId,
        circuit: &CircuitIdentity,
        extension: Extension,
    ) -> Result<Option<PathBuf>, CoordinatorError> {
        let canonical = circuit.canonical_name();
        let file = storage
            .list(&Locator::FamilyDirectory(id.clone(), circuit.family()))?
            .into_iter()
            .filter(|file| match ArtifactName::parse(file) {
                Ok(name) => name.extension() == extension && name.base() == canonical,
                Err(_) => false,
            })
            .last();
        Ok(file.map(|file| storage.to_path(&Locator::Artifact(id.clone(), circuit.family(), file))))
    }

    fn locate_artifact(
        storage: &dyn Storage,
        id: &ContributionId,
        circuit: &CircuitIdentity,
        extension: Extension,
    ) -> Result<PathBuf, CoordinatorError> {
        Self::find_artifact(storage, id, circuit, extension)?.ok_or_else(|| {
            CoordinatorError::StorageLocatorMissing(format!(
                "{}/{}{}",
                Locator::FamilyDirectory(id.clone(), circuit.family()),
                circuit.canonical_name(),
                extension.as_str()
            ))
        })
    }

    /// Evaluations live in round zero unless the final link carries its own.
    fn locate_evals(
        storage: &dyn Storage,
        final_id: &ContributionId,
        circuit: &CircuitIdentity,
    ) -> Result<PathBuf, CoordinatorError> {
        match Self::find_artifact(storage, final_id, circuit, Extension::Evals)? {
            Some(evals) => Ok(evals),
            None => Self::locate_artifact(storage, &ContributionId::initial(), circuit, Extension::Evals),
        }
    }
}

///
/// Rewrites the `CHECKSUM` manifest covering every deployed file.
///
/// Lines are `{sha256}  {file name}`, sorted by name. The manifest is written
/// to a temporary file in the same directory and renamed over the old one.
/// Returns the digest of the new manifest.
///
pub(crate) fn write_checksum_manifest(deployment_directory: &Path) -> Result<String, CoordinatorError> {
    let mut files = Vec::new();
    for entry in fs_err::read_dir(deployment_directory)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file() && name != CHECKSUM_FILE && !name.starts_with('.') {
            files.push((name, entry.path()));
        }
    }

    let mut manifest = String::new();
    for (name, path) in files.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
        manifest.push_str(&format!("{}  {}\n", sha256_file(&path)?, name));
    }

    let mut temporary = tempfile::Builder::new()
        .prefix(".checksum")
        .tempfile_in(deployment_directory)?;
    temporary.write_all(manifest.as_bytes())?;
    temporary.as_file().sync_all()?;
    let destination = deployment_directory.join(CHECKSUM_FILE);
    temporary
        .persist(&destination)
        .map_err(|error| CoordinatorError::Io(error.error))?;

    sha256_file(&destination).map_err(Into::into)
}
