use ceremony_shared::{
    catalog::FamilySelection,
    setup_binary::SetupBinary,
    verification::{verify_round, RoundVerification},
    CeremonyError,
};

use std::path::Path;
use tracing::info;

///
/// Verifies a local copy of a round, e.g. the `contributions/{id}` directory
/// of a contributor's workdir, against a local copy of round zero.
///
pub fn verify_workspace(
    setup: &dyn SetupBinary,
    workspace: &Path,
    initial: &Path,
    selection: &FamilySelection,
) -> Result<RoundVerification, CeremonyError> {
    for directory in [workspace, initial].iter() {
        if !directory.is_dir() {
            return Err(CeremonyError::Configuration(format!(
                "{} is not a directory",
                directory.display()
            )));
        }
    }

    info!("Verifying {} against {}", workspace.display(), initial.display());
    verify_round(setup, workspace, initial, selection)
}
