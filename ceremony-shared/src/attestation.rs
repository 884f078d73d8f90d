use crate::errors::CeremonyError;

use sha2::{Digest, Sha256};
use std::{fmt, path::Path};

/// One line of the attestation log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttestationEntry {
    pub circuit: String,
    pub hash: String,
}

///
/// The append-only per-round log of contribution hashes.
///
/// Every line reads `{circuit_canonical_name}: {contribution_hash}`. The log's
/// own SHA-256 digest lets anyone check out of band that the artifact a
/// contributor holds is the one the coordinator received.
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttestationRecord {
    entries: Vec<AttestationEntry>,
}

impl AttestationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a line to the log.
    pub fn append(&mut self, circuit: &str, hash: &str) -> Result<(), CeremonyError> {
        let valid = |value: &str| !value.is_empty() && !value.contains(|c: char| c.is_whitespace() || c == ':');
        if !valid(circuit) || !valid(hash) {
            return Err(CeremonyError::Configuration(format!(
                "invalid attestation line {:?}: {:?}",
                circuit, hash
            )));
        }
        self.entries.push(AttestationEntry {
            circuit: circuit.to_string(),
            hash: hash.to_string(),
        });
        Ok(())
    }

    /// Appends every line of another record.
    pub fn extend(&mut self, other: &AttestationRecord) {
        self.entries.extend(other.entries.iter().cloned());
    }

    pub fn entries(&self) -> &[AttestationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the hash recorded for a circuit, if any.
    pub fn hash_of(&self, circuit: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.circuit == circuit)
            .map(|entry| entry.hash.as_str())
    }

    /// Returns the log text, one newline-terminated line per entry.
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Returns the SHA-256 hex digest of the rendered log.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.render().as_bytes()))
    }

    /// Parses a rendered log.
    pub fn parse(text: &str) -> Result<Self, CeremonyError> {
        let mut record = Self::new();
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            let (circuit, hash) = line
                .split_once(": ")
                .ok_or_else(|| CeremonyError::Configuration(format!("malformed attestation line {:?}", line)))?;
            record.append(circuit, hash)?;
        }
        Ok(record)
    }

    /// Writes the log to `path` and its digest next to it as `{path}.sha256`.
    /// Returns the digest.
    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<String, CeremonyError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let digest = self.digest();
        fs_err::write(path, self.render())?;

        let mut digest_path = path.as_os_str().to_owned();
        digest_path.push(".sha256");
        fs_err::write(Path::new(&digest_path), format!("{}\n", digest))?;
        Ok(digest)
    }
}

impl fmt::Display for AttestationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}: {}", entry.circuit, entry.hash)?;
        }
        Ok(())
    }
}
