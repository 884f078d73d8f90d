//! The seam to the external cryptographic setup binary.

use crate::{errors::CeremonyError, utils::run_external_command};

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::debug;

///
/// The operations of the external setup binary.
///
/// Implementations are invoked one at a time; callers never run two
/// operations over the same working directory concurrently.
///
pub trait SetupBinary: Send + Sync {
    /// Converts a powers-of-tau file into the phase 1 input of phase 2.
    fn phase1_from_ptau(&self, ptau: &Path, ph1: &Path) -> Result<(), CeremonyError>;

    /// Creates the round-zero commitment and evaluation blob of a circuit.
    fn phase2_new(&self, ph1: &Path, r1cs: &Path, ph2: &Path, evals: &Path) -> Result<(), CeremonyError>;

    /// Applies a contribution to `input`, writing `output`. Returns the contribution hash.
    fn phase2_contribute(&self, input: &Path, output: &Path) -> Result<String, CeremonyError>;

    /// Returns `true` if `candidate` is a valid update chain rooted at `initial`.
    /// Otherwise, returns `false`.
    fn phase2_verify(&self, candidate: &Path, initial: &Path) -> Result<bool, CeremonyError>;

    /// Extracts the proving and verifying keys from a final commitment.
    fn extract_keys(&self, ph2: &Path, evals: &Path, pk: &Path, vk: &Path) -> Result<(), CeremonyError>;
}

/// Drives a setup binary installed on the machine.
#[derive(Clone, Debug)]
pub struct SetupCommand {
    program: PathBuf,
}

impl SetupCommand {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[inline]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, subcommand: &str, paths: &[&Path]) -> Result<String, CeremonyError> {
        let mut args: Vec<&OsStr> = vec![OsStr::new(subcommand)];
        args.extend(paths.iter().map(|path| path.as_os_str()));
        run_external_command(&self.program, &args)
    }
}

impl SetupBinary for SetupCommand {
    fn phase1_from_ptau(&self, ptau: &Path, ph1: &Path) -> Result<(), CeremonyError> {
        self.run("ptau", &[ptau, ph1]).map(|_| ())
    }

    fn phase2_new(&self, ph1: &Path, r1cs: &Path, ph2: &Path, evals: &Path) -> Result<(), CeremonyError> {
        self.run("p2n", &[ph1, r1cs, ph2, evals]).map(|_| ())
    }

    fn phase2_contribute(&self, input: &Path, output: &Path) -> Result<String, CeremonyError> {
        let stdout = self.run("p2c", &[input, output])?;
        parse_contribution_hash(&stdout).ok_or_else(|| {
            CeremonyError::ToolFailed(
                self.program.display().to_string(),
                format!("no contribution hash in the output of p2c {}", input.display()),
            )
        })
    }

    fn phase2_verify(&self, candidate: &Path, initial: &Path) -> Result<bool, CeremonyError> {
        // A non-zero exit is a rejected candidate, not a tool failure.
        let status = Command::new(&self.program)
            .arg("p2v")
            .arg(candidate)
            .arg(initial)
            .status()
            .map_err(|error| CeremonyError::ToolFailed(self.program.display().to_string(), error.to_string()))?;
        debug!("p2v {} exited with {}", candidate.display(), status);
        Ok(status.success())
    }

    fn extract_keys(&self, ph2: &Path, evals: &Path, pk: &Path, vk: &Path) -> Result<(), CeremonyError> {
        self.run("key", &[ph2, evals, pk, vk]).map(|_| ())
    }
}

/// Returns the last hexadecimal token printed by a contribution run.
pub fn parse_contribution_hash(stdout: &str) -> Option<String> {
    stdout
        .split(|c: char| c.is_whitespace() || c == ':' || c == '=')
        .filter(|token| token.len() >= 16 && token.bytes().all(|b| b.is_ascii_hexdigit()))
        .last()
        .map(|token| token.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_contribution_hash() {
        let stdout = "Contributing to phase 2\nprogress 100%\nContribution Hash: 0A1b2c3d4e5f60718293a4b5c6d7e8f9\n";
        assert_eq!(
            parse_contribution_hash(stdout).as_deref(),
            Some("0a1b2c3d4e5f60718293a4b5c6d7e8f9")
        );
        assert_eq!(parse_contribution_hash("done in 1234 ms"), None);
        assert_eq!(parse_contribution_hash(""), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_program_is_a_tool_failure() {
        let setup = SetupCommand::new("/nonexistent/semaphore-mtb-setup");
        let path = Path::new("a.ph2");
        assert!(matches!(
            setup.phase2_contribute(path, path),
            Err(CeremonyError::ToolFailed(..))
        ));
        assert!(matches!(
            setup.phase2_verify(path, path),
            Err(CeremonyError::ToolFailed(..))
        ));
    }
}
