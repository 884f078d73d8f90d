//! Checks a contributed round against the round-zero commitments.
//!
//! Every candidate is compared with the round-zero file of its circuit, never
//! with the adjacent round, so a pass means the candidate is a valid update
//! chain rooted at the public initial parameters.

use crate::{
    catalog::{Catalog, CircuitIdentity, Family, FamilySelection},
    errors::CeremonyError,
    naming::{ArtifactName, Extension},
    setup_binary::SetupBinary,
};

use std::{
    collections::BTreeSet,
    fmt,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
    /// No round-zero file exists for the candidate's circuit.
    Skip,
    /// The candidate's name does not resolve to a catalog circuit.
    Unrecognized,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
            Outcome::Skip => "skip",
            Outcome::Unrecognized => "unrecognized",
        };
        write!(f, "{}", text)
    }
}

/// The verdict on one candidate file.
#[derive(Clone, Debug)]
pub struct CandidateVerdict {
    pub file: PathBuf,
    pub circuit: Option<CircuitIdentity>,
    pub outcome: Outcome,
    pub detail: Option<String>,
}

/// The verdicts of a whole round.
#[derive(Clone, Debug, Default)]
pub struct RoundVerification {
    pub verdicts: Vec<CandidateVerdict>,
    /// Catalog circuits of the selection no candidate was found for.
    pub missing: Vec<CircuitIdentity>,
}

impl RoundVerification {
    #[inline]
    pub fn checked(&self) -> usize {
        self.verdicts.len()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.verdicts.iter().filter(|verdict| verdict.outcome == outcome).count()
    }

    /// Returns `true` if at least one candidate was checked, every candidate
    /// passed and no circuit is missing. Otherwise, returns `false`.
    pub fn is_success(&self) -> bool {
        self.checked() > 0 && self.count(Outcome::Pass) == self.checked() && self.missing.is_empty()
    }
}

impl fmt::Display for RoundVerification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for verdict in self.verdicts.iter().filter(|verdict| verdict.outcome != Outcome::Pass) {
            write!(f, "  {:<13} {}", verdict.outcome.to_string(), verdict.file.display())?;
            if let Some(detail) = &verdict.detail {
                write!(f, " ({})", detail)?;
            }
            writeln!(f)?;
        }
        for circuit in &self.missing {
            writeln!(f, "  {:<13} {}", "missing", circuit.qualified_name())?;
        }
        write!(
            f,
            "checked {}, passed {}, failed {}, skipped {}, unrecognized {}, missing {}: {}",
            self.checked(),
            self.count(Outcome::Pass),
            self.count(Outcome::Fail),
            self.count(Outcome::Skip),
            self.count(Outcome::Unrecognized),
            self.missing.len(),
            match self.is_success() {
                true => "PASS",
                false => "FAIL",
            }
        )
    }
}

/// Returns every `.ph2` file below `directory`, recursively, in path order.
fn collect_commitments(directory: &Path) -> Result<Vec<PathBuf>, CeremonyError> {
    let mut files = Vec::new();
    if !directory.is_dir() {
        return Ok(files);
    }
    let mut pending = vec![directory.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs_err::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.to_string_lossy().ends_with(Extension::Ph2.as_str()) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Returns `true` if the candidate directory groups files by family.
fn has_family_directories(candidate_root: &Path) -> bool {
    Family::ALL
        .iter()
        .any(|family| candidate_root.join(family.as_str()).is_dir())
}

/// Returns the round-zero file of a circuit, preferring the family subdirectory.
fn locate_initial(initial_root: &Path, circuit: &CircuitIdentity) -> Option<PathBuf> {
    let name = ArtifactName::initial(circuit, Extension::Ph2).to_string();
    [
        initial_root.join(circuit.family().as_str()).join(&name),
        initial_root.join(&name),
    ]
    .iter()
    .find(|path| path.is_file())
    .cloned()
}

///
/// Verifies every candidate commitment below `candidate_root` against the
/// round-zero files below `initial_root`.
///
/// Candidates are discovered per family subdirectory; a directory without any
/// family subdirectory is treated as a flat legacy layout whose files are
/// attributed to families by name. The pass always runs to completion and
/// reports per-file outcomes rather than stopping at the first failure.
///
pub fn verify_round(
    setup: &dyn SetupBinary,
    candidate_root: &Path,
    initial_root: &Path,
    selection: &FamilySelection,
) -> Result<RoundVerification, CeremonyError> {
    let catalog = Catalog::standard().subset(selection);
    let mut candidates: Vec<(PathBuf, Option<Family>)> = Vec::new();

    match has_family_directories(candidate_root) {
        true => {
            for family in selection.families() {
                for file in collect_commitments(&candidate_root.join(family.as_str()))? {
                    candidates.push((file, Some(*family)));
                }
            }
        }
        false => {
            warn!(
                "{} has no family subdirectories, reading it as a flat directory",
                candidate_root.display()
            );
            for file in collect_commitments(candidate_root)? {
                candidates.push((file, None));
            }
        }
    }

    let mut report = RoundVerification::default();
    let mut covered = BTreeSet::new();

    for (file, family_hint) in candidates {
        let name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let circuit = match ArtifactName::parse(&name).and_then(|artifact| artifact.circuit(&catalog, family_hint)) {
            Ok(circuit) => circuit,
            Err(error) => {
                // Flat directories may hold other families' files.
                if family_hint.is_none() && is_other_family(&name, selection) {
                    debug!("Ignoring {} outside of the selected families", name);
                    continue;
                }
                warn!("Unable to attribute {}: {}", file.display(), error);
                report.verdicts.push(CandidateVerdict {
                    file,
                    circuit: None,
                    outcome: Outcome::Unrecognized,
                    detail: Some(error.to_string()),
                });
                continue;
            }
        };
        covered.insert(circuit.clone());

        let initial = match locate_initial(initial_root, &circuit) {
            Some(initial) => initial,
            None => {
                error!("No round-zero file for {} in {}", circuit.qualified_name(), initial_root.display());
                report.verdicts.push(CandidateVerdict {
                    file,
                    circuit: Some(circuit),
                    outcome: Outcome::Skip,
                    detail: Some("no round-zero file".to_string()),
                });
                continue;
            }
        };

        let (outcome, detail) = match setup.phase2_verify(&file, &initial) {
            Ok(true) => (Outcome::Pass, None),
            Ok(false) => (Outcome::Fail, None),
            Err(error) => (Outcome::Fail, Some(error.to_string())),
        };
        match outcome {
            Outcome::Pass => info!("{} verified against {}", name, initial.display()),
            _ => error!("{} failed verification against {}", name, initial.display()),
        }
        report.verdicts.push(CandidateVerdict {
            file,
            circuit: Some(circuit),
            outcome,
            detail,
        });
    }

    report.missing = catalog.iter().filter(|circuit| !covered.contains(*circuit)).cloned().collect();
    for circuit in &report.missing {
        error!("No candidate found for {}", circuit.qualified_name());
    }
    Ok(report)
}

/// Returns `true` if a file name resolves to a circuit of a family outside the selection.
fn is_other_family(name: &str, selection: &FamilySelection) -> bool {
    match crate::naming::resolve_circuit(name, &Catalog::standard(), None) {
        Ok(circuit) => !selection.contains(circuit.family()),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chain::ContributorLabel, naming::derive_output_name, testing::FakeSetup};

    struct Round {
        _directory: tempfile::TempDir,
        initial: PathBuf,
        candidate: PathBuf,
    }

    /// Builds round zero and one contribution for the batch family.
    fn batch_round(setup: &FakeSetup, grouped: bool) -> Round {
        let directory = tempfile::tempdir().unwrap();
        let initial = directory.path().join("0000_initial");
        let candidate = directory.path().join("0001_alice");
        let alice = ContributorLabel::new("alice").unwrap();

        for circuit in Catalog::standard().family(Family::Batch) {
            let name = ArtifactName::initial(circuit, Extension::Ph2).to_string();
            let initial_file = initial.join("batch").join(&name);
            std::fs::create_dir_all(initial_file.parent().unwrap()).unwrap();
            std::fs::write(&initial_file, format!("ph2:{}", circuit)).unwrap();

            let output = derive_output_name(&name, &alice, 1).unwrap();
            let output = match grouped {
                true => candidate.join("batch").join(output),
                false => candidate.join(output),
            };
            setup.phase2_contribute(&initial_file, &output).unwrap();
        }
        Round {
            _directory: directory,
            initial,
            candidate,
        }
    }

    #[test]
    fn test_complete_round_passes() {
        let setup = FakeSetup::new();
        let round = batch_round(&setup, true);
        let report = verify_round(
            &setup,
            &round.candidate,
            &round.initial,
            &FamilySelection::only(Family::Batch),
        )
        .unwrap();
        assert_eq!(report.checked(), 6);
        assert!(report.is_success(), "{}", report);
    }

    #[test]
    fn test_flat_legacy_layout() {
        let setup = FakeSetup::new();
        let round = batch_round(&setup, false);
        let report = verify_round(&setup, &round.candidate, &round.initial, &FamilySelection::all()).unwrap();
        assert_eq!(report.count(Outcome::Pass), 6);
        // v1 and v2 are selected but absent.
        assert_eq!(report.missing.len(), 41);
        assert!(!report.is_success());

        let batch_only =
            verify_round(&setup, &round.candidate, &round.initial, &FamilySelection::only(Family::Batch)).unwrap();
        assert!(batch_only.is_success());
    }

    #[test]
    fn test_tampered_candidate_fails() {
        let setup = FakeSetup::new();
        let round = batch_round(&setup, true);
        let tampered = round.candidate.join("batch/batch_update_32_10_alice_contribution_0001.ph2");
        let mut contents = std::fs::read(&tampered).unwrap();
        contents[0] ^= 0xff;
        std::fs::write(&tampered, contents).unwrap();

        let report = verify_round(
            &setup,
            &round.candidate,
            &round.initial,
            &FamilySelection::only(Family::Batch),
        )
        .unwrap();
        assert_eq!(report.count(Outcome::Fail), 1);
        assert_eq!(report.count(Outcome::Pass), 5);
        assert!(!report.is_success());
    }

    #[test]
    fn test_missing_circuit_fails() {
        let setup = FakeSetup::new();
        let round = batch_round(&setup, true);
        std::fs::remove_file(round.candidate.join("batch/batch_append_32_500_alice_contribution_0001.ph2")).unwrap();

        let report = verify_round(
            &setup,
            &round.candidate,
            &round.initial,
            &FamilySelection::only(Family::Batch),
        )
        .unwrap();
        assert_eq!(report.count(Outcome::Pass), 5);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].canonical_name(), "batch_append_32_500");
        assert!(!report.is_success());
    }

    #[test]
    fn test_skip_and_unrecognized() {
        let setup = FakeSetup::new();
        let round = batch_round(&setup, true);
        std::fs::remove_file(round.initial.join("batch/batch_update_32_500_0000.ph2")).unwrap();
        std::fs::write(round.candidate.join("batch/stray_alice_contribution_0001.ph2"), b"?").unwrap();

        let report = verify_round(
            &setup,
            &round.candidate,
            &round.initial,
            &FamilySelection::only(Family::Batch),
        )
        .unwrap();
        assert_eq!(report.count(Outcome::Skip), 1);
        assert_eq!(report.count(Outcome::Unrecognized), 1);
        assert!(!report.is_success());
    }

    #[test]
    fn test_empty_round_is_not_a_pass() {
        let setup = FakeSetup::new();
        let directory = tempfile::tempdir().unwrap();
        let report = verify_round(
            &setup,
            directory.path(),
            directory.path(),
            &FamilySelection::only(Family::Batch),
        )
        .unwrap();
        assert_eq!(report.checked(), 0);
        assert!(!report.is_success());
    }
}
