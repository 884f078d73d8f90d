//! The seam to the external prover tool, which builds constraint systems and
//! packages extracted keys into deployable files.

use crate::{
    catalog::{CircuitIdentity, CircuitKind, Family},
    errors::CeremonyError,
    utils::run_external_command,
};

use std::{
    ffi::OsString,
    fmt,
    path::{Path, PathBuf},
};

/// The circuit parameters the prover tool needs to rebuild a circuit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportFlags {
    flags: Vec<(String, String)>,
}

impl ImportFlags {
    /// Derives the flags of a circuit from its identity.
    pub fn for_circuit(circuit: &CircuitIdentity) -> Self {
        let mut flags = vec![("circuit".to_string(), circuit.kind().as_str().to_string())];
        let mut push = |name: &str, value: u32| flags.push((name.to_string(), value.to_string()));

        let heights = circuit.heights();
        let counts = circuit.counts();
        match circuit.kind() {
            CircuitKind::Inclusion => {
                push("inclusion-tree-height", heights[0]);
                push("inclusion-compressed-accounts", counts[0]);
            }
            CircuitKind::NonInclusion => {
                push("non-inclusion-tree-height", heights[0]);
                push("non-inclusion-compressed-accounts", counts[0]);
            }
            CircuitKind::Combined => {
                // v1 shares one height between both trees.
                let non_inclusion_height = heights.get(1).copied().unwrap_or(heights[0]);
                push("inclusion-tree-height", heights[0]);
                push("inclusion-compressed-accounts", counts[0]);
                push("non-inclusion-tree-height", non_inclusion_height);
                push("non-inclusion-compressed-accounts", counts[1]);
            }
            CircuitKind::Append => {
                push("append-tree-height", heights[0]);
                push("append-batch-size", counts[0]);
            }
            CircuitKind::Update => {
                push("update-tree-height", heights[0]);
                push("update-batch-size", counts[0]);
            }
            CircuitKind::AddressAppend => {
                push("address-append-tree-height", heights[0]);
                push("address-append-batch-size", counts[0]);
            }
        }
        if circuit.family() == Family::V1 {
            flags.push(("legacy".to_string(), "true".to_string()));
        }
        Self { flags }
    }

    /// Returns the value of a flag, if it is set.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.flags
            .iter()
            .find(|(flag, _)| flag == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the flags as command-line arguments.
    pub fn to_args(&self) -> Vec<String> {
        self.flags
            .iter()
            .flat_map(|(name, value)| vec![format!("--{}", name), value.clone()])
            .collect()
    }
}

impl fmt::Display for ImportFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_args().join(" "))
    }
}

/// The files produced and consumed by an import.
#[derive(Clone, Debug)]
pub struct ImportPaths<'a> {
    pub pk: &'a Path,
    pub vk: &'a Path,
    pub r1cs: &'a Path,
    pub key: &'a Path,
    pub vkey: &'a Path,
}

pub trait ProverTool: Send + Sync {
    /// Writes the constraint system of a circuit to `output`.
    fn generate_r1cs(&self, circuit: &CircuitIdentity, output: &Path) -> Result<(), CeremonyError>;

    /// Packages extracted keys and the constraint system into `.key` and `.vkey` files.
    fn import_setup(&self, flags: &ImportFlags, paths: &ImportPaths<'_>) -> Result<(), CeremonyError>;
}

/// Drives a prover tool installed on the machine.
#[derive(Clone, Debug)]
pub struct ProverCommand {
    program: PathBuf,
}

impl ProverCommand {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[inline]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ProverTool for ProverCommand {
    fn generate_r1cs(&self, circuit: &CircuitIdentity, output: &Path) -> Result<(), CeremonyError> {
        let mut args: Vec<OsString> = vec!["r1cs".into()];
        args.extend(ImportFlags::for_circuit(circuit).to_args().into_iter().map(OsString::from));
        args.push("--output".into());
        args.push(output.as_os_str().to_owned());
        run_external_command(&self.program, &args).map(|_| ())
    }

    fn import_setup(&self, flags: &ImportFlags, paths: &ImportPaths<'_>) -> Result<(), CeremonyError> {
        let mut args: Vec<OsString> = vec!["import-setup".into()];
        args.extend(flags.to_args().into_iter().map(OsString::from));
        for (name, path) in [
            ("--pk", paths.pk),
            ("--vk", paths.vk),
            ("--r1cs", paths.r1cs),
            ("--output", paths.key),
            ("--output-vkey", paths.vkey),
        ]
        .iter()
        {
            args.push(OsString::from(*name));
            args.push(path.as_os_str().to_owned());
        }
        run_external_command(&self.program, &args).map(|_| ())
    }
}
