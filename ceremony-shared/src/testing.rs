//! Deterministic stand-ins for the setup binary and the prover tool.

use crate::{
    catalog::CircuitIdentity,
    errors::CeremonyError,
    prover::{ImportFlags, ImportPaths, ProverTool},
    setup_binary::SetupBinary,
    utils::create_parent_directory,
};

use sha2::{Digest, Sha256};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

const CONTRIBUTION_TAG: &str = "|contribution:";

///
/// Models a phase 2 update chain with plain bytes.
///
/// A contribution appends a tag derived from the digest of its input, so a
/// candidate verifies against the round-zero file only when it extends it by
/// a well-formed sequence of tags. Any edit to a candidate breaks the chain.
///
#[derive(Debug, Default)]
pub struct FakeSetup {
    contributions: AtomicUsize,
    verifications: AtomicUsize,
    extractions: AtomicUsize,
    withheld: Mutex<Vec<String>>,
}

impl FakeSetup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contributions to inputs whose file name contains `pattern` report a
    /// hash but write no output.
    pub fn withhold_output(&self, pattern: &str) {
        if let Ok(mut withheld) = self.withheld.lock() {
            withheld.push(pattern.to_string());
        }
    }

    pub fn contributions(&self) -> usize {
        self.contributions.load(Ordering::SeqCst)
    }

    pub fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }

    pub fn extractions(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }

    fn is_withheld(&self, input: &Path) -> bool {
        let name = input.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
        match self.withheld.lock() {
            Ok(withheld) => withheld.iter().any(|pattern| name.contains(pattern.as_str())),
            Err(_) => false,
        }
    }
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn contribution_tag(input: &[u8]) -> Vec<u8> {
    format!("{}{}", CONTRIBUTION_TAG, &digest(input)[..16]).into_bytes()
}

fn write<P: AsRef<Path>>(path: P, contents: &[u8]) -> Result<(), CeremonyError> {
    create_parent_directory(path.as_ref())?;
    fs_err::write(path.as_ref(), contents)?;
    Ok(())
}

impl SetupBinary for FakeSetup {
    fn phase1_from_ptau(&self, ptau: &Path, ph1: &Path) -> Result<(), CeremonyError> {
        let ptau = fs_err::read(ptau)?;
        write(ph1, format!("ph1:{}", digest(&ptau)).as_bytes())
    }

    fn phase2_new(&self, ph1: &Path, r1cs: &Path, ph2: &Path, evals: &Path) -> Result<(), CeremonyError> {
        let mut seed = fs_err::read(ph1)?;
        seed.extend(fs_err::read(r1cs)?);
        let seed = digest(&seed);
        write(ph2, format!("ph2:{}", seed).as_bytes())?;
        write(evals, format!("evals:{}", seed).as_bytes())
    }

    fn phase2_contribute(&self, input: &Path, output: &Path) -> Result<String, CeremonyError> {
        self.contributions.fetch_add(1, Ordering::SeqCst);
        let mut contents = fs_err::read(input)?;
        contents.extend(contribution_tag(&contents));
        if !self.is_withheld(input) {
            write(output, &contents)?;
        }
        Ok(digest(&contents))
    }

    fn phase2_verify(&self, candidate: &Path, initial: &Path) -> Result<bool, CeremonyError> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        let candidate = fs_err::read(candidate)?;
        let initial = fs_err::read(initial)?;
        if !candidate.starts_with(&initial) {
            return Ok(false);
        }

        let mut length = initial.len();
        let mut rounds = 0;
        while length < candidate.len() {
            let tag = contribution_tag(&candidate[..length]);
            if !candidate[length..].starts_with(&tag) {
                return Ok(false);
            }
            length += tag.len();
            rounds += 1;
        }
        Ok(rounds > 0)
    }

    fn extract_keys(&self, ph2: &Path, evals: &Path, pk: &Path, vk: &Path) -> Result<(), CeremonyError> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        let mut seed = fs_err::read(ph2)?;
        seed.extend(fs_err::read(evals)?);
        let seed = digest(&seed);
        write(pk, format!("pk:{}", seed).as_bytes())?;
        write(vk, format!("vk:{}", seed).as_bytes())
    }
}

/// Builds constraint systems and key files from the circuit parameters alone.
#[derive(Debug, Default)]
pub struct FakeProver {
    imports: AtomicUsize,
    missing_constraint_systems: Mutex<Vec<String>>,
}

impl FakeProver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constraint systems are never generated for circuits named `canonical_name`.
    pub fn skip_constraint_system(&self, canonical_name: &str) {
        if let Ok(mut missing) = self.missing_constraint_systems.lock() {
            missing.push(canonical_name.to_string());
        }
    }

    pub fn imports(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }
}

impl ProverTool for FakeProver {
    fn generate_r1cs(&self, circuit: &CircuitIdentity, output: &Path) -> Result<(), CeremonyError> {
        let skipped = match self.missing_constraint_systems.lock() {
            Ok(missing) => missing.contains(&circuit.canonical_name()),
            Err(_) => false,
        };
        if skipped {
            return Ok(());
        }
        write(output, format!("r1cs:{}", circuit.qualified_name()).as_bytes())
    }

    fn import_setup(&self, flags: &ImportFlags, paths: &ImportPaths<'_>) -> Result<(), CeremonyError> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        let mut seed = fs_err::read(paths.pk)?;
        seed.extend(fs_err::read(paths.r1cs)?);
        seed.extend(flags.to_string().as_bytes());
        write(paths.key, format!("key:{}", digest(&seed)).as_bytes())?;

        let mut vkey = fs_err::read(paths.vk)?;
        vkey.extend(flags.to_string().as_bytes());
        write(paths.vkey, format!("vkey:{}", digest(&vkey)).as_bytes())
    }
}
