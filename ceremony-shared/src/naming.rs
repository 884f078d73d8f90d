//! The artifact file-name grammar.
//!
//! ```text
//! round zero:    {canonical}_{seq4}.ph2          e.g. inclusion_26_1_0000.ph2
//! contribution:  {canonical}_{contributor}_contribution_{seq4}.ph2
//! ```
//!
//! Both shapes also exist with the `.evals` extension. Parsing is strict: a
//! name that fits neither shape is an error, never a best guess, since
//! misattributing a file corrupts the chain.

use crate::{
    catalog::{Catalog, CircuitIdentity, Family},
    chain::ContributorLabel,
    errors::CeremonyError,
};

use std::{fmt, str::FromStr};

/// The sequence number of the round-zero files.
pub const INITIAL_SEQUENCE: u32 = 0;

const CONTRIBUTION_MARKER: &str = "_contribution";
const SEQUENCE_WIDTH: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Extension {
    /// The phase 2 commitment.
    Ph2,
    /// The auxiliary evaluation blob produced alongside the round-zero commitment.
    Evals,
}

impl Extension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Extension::Ph2 => ".ph2",
            Extension::Evals => ".evals",
        }
    }

    fn split(filename: &str) -> Option<(&str, Self)> {
        [Extension::Ph2, Extension::Evals]
            .iter()
            .find_map(|extension| filename.strip_suffix(extension.as_str()).map(|stem| (stem, *extension)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Suffix {
    Initial { sequence: u32 },
    Contribution { contributor: ContributorLabel, sequence: u32 },
}

impl Suffix {
    #[inline]
    pub fn sequence(&self) -> u32 {
        match self {
            Suffix::Initial { sequence } | Suffix::Contribution { sequence, .. } => *sequence,
        }
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suffix::Initial { sequence } => write!(f, "_{:04}", sequence),
            Suffix::Contribution { contributor, sequence } => {
                write!(f, "_{}{}_{:04}", contributor, CONTRIBUTION_MARKER, sequence)
            }
        }
    }
}

/// A parsed artifact file name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArtifactName {
    base: String,
    suffix: Suffix,
    extension: Extension,
}

impl ArtifactName {
    pub fn new(base: &str, suffix: Suffix, extension: Extension) -> Self {
        Self {
            base: base.to_string(),
            suffix,
            extension,
        }
    }

    /// Returns the round-zero name of a circuit.
    pub fn initial(circuit: &CircuitIdentity, extension: Extension) -> Self {
        Self::new(
            &circuit.canonical_name(),
            Suffix::Initial {
                sequence: INITIAL_SEQUENCE,
            },
            extension,
        )
    }

    /// Returns the name of a circuit's commitment in a contributor round.
    pub fn contribution(circuit: &CircuitIdentity, contributor: &ContributorLabel, sequence: u32) -> Self {
        Self::new(
            &circuit.canonical_name(),
            Suffix::Contribution {
                contributor: contributor.clone(),
                sequence,
            },
            Extension::Ph2,
        )
    }

    /// Parses a file name against the grammar.
    pub fn parse(filename: &str) -> Result<Self, CeremonyError> {
        let unrecognized = || CeremonyError::UnrecognizedArtifactName(filename.to_string());

        let (stem, extension) = Extension::split(filename).ok_or_else(unrecognized)?;
        let (rest, sequence) = stem.rsplit_once('_').ok_or_else(unrecognized)?;
        if sequence.len() < SEQUENCE_WIDTH || !sequence.bytes().all(|b| b.is_ascii_digit()) {
            return Err(unrecognized());
        }
        let sequence = sequence.parse::<u32>().map_err(|_| unrecognized())?;

        let (base, suffix) = match rest.strip_suffix(CONTRIBUTION_MARKER) {
            Some(rest) => {
                let (base, contributor) = rest.rsplit_once('_').ok_or_else(unrecognized)?;
                let contributor = ContributorLabel::new(contributor).map_err(|_| unrecognized())?;
                (base, Suffix::Contribution { contributor, sequence })
            }
            None => (rest, Suffix::Initial { sequence }),
        };
        if base.is_empty() {
            return Err(unrecognized());
        }

        Ok(Self::new(base, suffix, extension))
    }

    /// Returns the circuit's canonical base name.
    #[inline]
    pub fn base(&self) -> &str {
        &self.base
    }

    #[inline]
    pub fn suffix(&self) -> &Suffix {
        &self.suffix
    }

    #[inline]
    pub fn extension(&self) -> Extension {
        self.extension
    }

    /// Returns the name this artifact takes after `contributor` applies contribution `sequence`.
    pub fn successor(&self, contributor: &ContributorLabel, sequence: u32) -> Self {
        Self::new(
            &self.base,
            Suffix::Contribution {
                contributor: contributor.clone(),
                sequence,
            },
            self.extension,
        )
    }

    /// Resolves the artifact's circuit against a catalog.
    pub fn circuit(&self, catalog: &Catalog, family_hint: Option<Family>) -> Result<CircuitIdentity, CeremonyError> {
        catalog.resolve(&self.base, family_hint)
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.base, self.suffix, self.extension.as_str())
    }
}

impl FromStr for ArtifactName {
    type Err = CeremonyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Rewrites an input file name into the name of the contributor's output.
///
/// This depends on nothing but its arguments.
pub fn derive_output_name(
    input_filename: &str,
    contributor: &ContributorLabel,
    new_sequence: u32,
) -> Result<String, CeremonyError> {
    Ok(ArtifactName::parse(input_filename)?
        .successor(contributor, new_sequence)
        .to_string())
}

/// Recovers the circuit's canonical base name from an artifact file name.
pub fn canonical_circuit_name(filename: &str) -> Result<String, CeremonyError> {
    Ok(ArtifactName::parse(filename)?.base().to_string())
}

/// Parses an artifact file name and resolves its circuit against the catalog.
pub fn resolve_circuit(
    filename: &str,
    catalog: &Catalog,
    family_hint: Option<Family>,
) -> Result<CircuitIdentity, CeremonyError> {
    ArtifactName::parse(filename)?.circuit(catalog, family_hint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Family;

    fn label(name: &str) -> ContributorLabel {
        ContributorLabel::new(name).unwrap()
    }

    #[test]
    fn test_parse_initial() {
        let name = ArtifactName::parse("inclusion_26_1_0000.ph2").unwrap();
        assert_eq!(name.base(), "inclusion_26_1");
        assert_eq!(name.suffix(), &Suffix::Initial { sequence: 0 });
        assert_eq!(name.extension(), Extension::Ph2);

        let evals = ArtifactName::parse("batch_address-append_40_250_0000.evals").unwrap();
        assert_eq!(evals.base(), "batch_address-append_40_250");
        assert_eq!(evals.extension(), Extension::Evals);
    }

    #[test]
    fn test_parse_contribution() {
        let name = ArtifactName::parse("combined_32_40_1_1_alice_contribution_0007.ph2").unwrap();
        assert_eq!(name.base(), "combined_32_40_1_1");
        assert_eq!(
            name.suffix(),
            &Suffix::Contribution {
                contributor: label("alice"),
                sequence: 7
            }
        );
        assert_eq!(name.to_string(), "combined_32_40_1_1_alice_contribution_0007.ph2");
    }

    #[test]
    fn test_parse_rejects_unknown_shapes() {
        for filename in &[
            "inclusion_26_1.ph2",
            "inclusion_26_1_0000",
            "inclusion_26_1_0000.zkey",
            "inclusion_26_1_000.ph2",
            "inclusion_26_1_00a0.ph2",
            "_0000.ph2",
            "_alice_contribution_0001.ph2",
            "inclusion_26_1_alice_contribution.ph2",
            "inclusion_26_1_al.ice_contribution_0001.ph2",
            "inclusion_26_1_alice_contribution_01.ph2",
            "README.md",
        ] {
            match ArtifactName::parse(filename) {
                Err(CeremonyError::UnrecognizedArtifactName(name)) => assert_eq!(&name, filename),
                other => panic!("{} should be rejected, found {:?}", filename, other),
            }
        }
    }

    #[test]
    fn test_derive_output_name() {
        assert_eq!(
            derive_output_name("inclusion_26_1_0000.ph2", &label("alice"), 1).unwrap(),
            "inclusion_26_1_alice_contribution_0001.ph2"
        );
        assert_eq!(
            derive_output_name("inclusion_26_1_alice_contribution_0001.ph2", &label("bob"), 2).unwrap(),
            "inclusion_26_1_bob_contribution_0002.ph2"
        );
        assert_eq!(
            derive_output_name("batch_update_32_500_0000.evals", &label("carol-2"), 12).unwrap(),
            "batch_update_32_500_carol-2_contribution_0012.evals"
        );
        assert!(derive_output_name("inclusion_26_1.ph2", &label("bob"), 2).is_err());
    }

    #[test]
    fn test_round_trip_over_the_catalog() {
        let catalog = Catalog::standard();
        let contributors = [label("alice"), label("bob"), label("x-1")];
        for circuit in catalog.iter() {
            let mut filename = ArtifactName::initial(circuit, Extension::Ph2).to_string();
            for (index, contributor) in contributors.iter().enumerate() {
                filename = derive_output_name(&filename, contributor, index as u32 + 1).unwrap();
                assert_eq!(canonical_circuit_name(&filename).unwrap(), circuit.canonical_name());
                assert_eq!(&resolve_circuit(&filename, &catalog, None).unwrap(), circuit);
                assert_eq!(
                    &resolve_circuit(&filename, &catalog, Some(circuit.family())).unwrap(),
                    circuit
                );
            }
        }
    }

    #[test]
    fn test_long_sequences() {
        let name = derive_output_name("inclusion_26_1_0000.ph2", &label("alice"), 12345).unwrap();
        assert_eq!(name, "inclusion_26_1_alice_contribution_12345.ph2");
        assert_eq!(ArtifactName::parse(&name).unwrap().suffix().sequence(), 12345);
    }

    #[test]
    fn test_resolve_circuit_family_hint() {
        let catalog = Catalog::standard();
        assert!(resolve_circuit("inclusion_26_1_0000.ph2", &catalog, Some(Family::V2)).is_err());
        assert_eq!(
            resolve_circuit("inclusion_26_1_0000.ph2", &catalog, Some(Family::V1))
                .unwrap()
                .family(),
            Family::V1
        );
    }
}
