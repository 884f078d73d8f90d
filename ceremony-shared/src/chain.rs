//! Contribution identifiers and the chain-of-custody model.

use crate::{
    catalog::{Catalog, CircuitIdentity},
    errors::CeremonyError,
};

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    convert::TryFrom,
    fmt,
    path::PathBuf,
    str::FromStr,
};

/// The contributor label used by round zero.
pub const INITIAL_CONTRIBUTOR: &str = "initial";

const MAXIMUM_LABEL_LENGTH: usize = 64;

/// A contributor's free-form label, restricted to ASCII letters, digits and `-`
/// so that it can never break the file-name grammar or escape a directory.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContributorLabel(String);

impl ContributorLabel {
    pub fn new(label: &str) -> Result<Self, CeremonyError> {
        let valid = !label.is_empty()
            && label.len() <= MAXIMUM_LABEL_LENGTH
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
        match valid {
            true => Ok(Self(label.to_string())),
            false => Err(CeremonyError::InvalidContributor(label.to_string())),
        }
    }

    /// Returns the label of round zero.
    pub fn initial() -> Self {
        Self(INITIAL_CONTRIBUTOR.to_string())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContributorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContributorLabel {
    type Err = CeremonyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContributorLabel {
    type Error = CeremonyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ContributorLabel> for String {
    fn from(label: ContributorLabel) -> Self {
        label.0
    }
}

/// The globally unique identifier of a chain link, `{sequence:04}_{contributor}`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContributionId {
    sequence: u32,
    contributor: ContributorLabel,
}

impl ContributionId {
    pub fn new(sequence: u32, contributor: ContributorLabel) -> Self {
        Self { sequence, contributor }
    }

    /// Returns the identifier of round zero, `0000_initial`.
    pub fn initial() -> Self {
        Self::new(0, ContributorLabel::initial())
    }

    #[inline]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    #[inline]
    pub fn contributor(&self) -> &ContributorLabel {
        &self.contributor
    }

    /// Returns `true` if this is round zero.
    #[inline]
    pub fn is_initial(&self) -> bool {
        self.sequence == 0
    }

    /// Returns the identifier of the link `contributor` builds on top of this one.
    pub fn next(&self, contributor: &ContributorLabel) -> Result<Self, CeremonyError> {
        let sequence = self
            .sequence
            .checked_add(1)
            .ok_or_else(|| CeremonyError::MalformedPredecessorId(self.to_string()))?;
        Ok(Self::new(sequence, contributor.clone()))
    }
}

impl fmt::Display for ContributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}_{}", self.sequence, self.contributor)
    }
}

impl FromStr for ContributionId {
    type Err = CeremonyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CeremonyError::MalformedPredecessorId(s.to_string());
        let (sequence, contributor) = s.split_once('_').ok_or_else(malformed)?;
        let sequence = parse_sequence(sequence).ok_or_else(malformed)?;
        let contributor = ContributorLabel::new(contributor).map_err(|_| malformed())?;
        Ok(Self::new(sequence, contributor))
    }
}

impl TryFrom<String> for ContributionId {
    type Error = CeremonyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContributionId> for String {
    fn from(id: ContributionId) -> Self {
        id.to_string()
    }
}

fn parse_sequence(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok()
}

///
/// Returns the identifier following `predecessor_id` for `contributor`.
///
/// Only the leading numeric prefix of the predecessor (everything up to the
/// first `_`) is interpreted. The new sequence is the predecessor's plus one,
/// zero-padded to four digits.
///
pub fn next_id(predecessor_id: &str, contributor: &ContributorLabel) -> Result<ContributionId, CeremonyError> {
    let prefix = match predecessor_id.split_once('_') {
        Some((prefix, _)) => prefix,
        None => predecessor_id,
    };
    let sequence =
        parse_sequence(prefix).ok_or_else(|| CeremonyError::MalformedPredecessorId(predecessor_id.to_string()))?;
    let sequence = sequence
        .checked_add(1)
        .ok_or_else(|| CeremonyError::MalformedPredecessorId(predecessor_id.to_string()))?;
    Ok(ContributionId::new(sequence, contributor.clone()))
}

/// The files one chain link holds for a circuit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkFiles {
    pub commitment: PathBuf,
    pub evals: Option<PathBuf>,
}

impl LinkFiles {
    pub fn commitment(commitment: PathBuf) -> Self {
        Self {
            commitment,
            evals: None,
        }
    }
}

/// One ceremony round: a contributor's pass over every circuit of one or more families.
#[derive(Clone, Debug)]
pub struct ChainLink {
    id: ContributionId,
    predecessor: Option<ContributionId>,
    files: BTreeMap<CircuitIdentity, LinkFiles>,
}

impl ChainLink {
    /// Starts an empty link on top of `predecessor`.
    pub fn start(predecessor: &ContributionId, contributor: &ContributorLabel) -> Result<Self, CeremonyError> {
        Ok(Self {
            id: predecessor.next(contributor)?,
            predecessor: Some(predecessor.clone()),
            files: BTreeMap::new(),
        })
    }

    /// Returns a link for already stored state whose history is not known.
    pub fn existing(id: ContributionId) -> Self {
        Self {
            id,
            predecessor: None,
            files: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> &ContributionId {
        &self.id
    }

    #[inline]
    pub fn predecessor(&self) -> Option<&ContributionId> {
        self.predecessor.as_ref()
    }

    #[inline]
    pub fn files(&self) -> &BTreeMap<CircuitIdentity, LinkFiles> {
        &self.files
    }

    pub fn get(&self, circuit: &CircuitIdentity) -> Option<&LinkFiles> {
        self.files.get(circuit)
    }

    /// Records the files produced for a circuit, replacing any earlier entry.
    pub fn record(&mut self, circuit: CircuitIdentity, files: LinkFiles) {
        self.files.insert(circuit, files);
    }

    /// Returns the circuits of `catalog` this link does not cover.
    pub fn missing<'a>(&self, catalog: &'a Catalog) -> Vec<&'a CircuitIdentity> {
        catalog
            .iter()
            .filter(|circuit| !self.files.contains_key(*circuit))
            .collect()
    }

    /// Returns an error naming every circuit of `catalog` this link does not cover.
    pub fn ensure_complete(&self, catalog: &Catalog) -> Result<(), CeremonyError> {
        ensure_coverage(&self.id, catalog, self.files.keys())
    }
}

/// Returns an error naming every circuit of `catalog` that `covered` leaves out.
pub fn ensure_coverage<'a, I>(id: &ContributionId, catalog: &Catalog, covered: I) -> Result<(), CeremonyError>
where
    I: IntoIterator<Item = &'a CircuitIdentity>,
{
    let covered: BTreeSet<&CircuitIdentity> = covered.into_iter().collect();
    let missing: Vec<String> = catalog
        .iter()
        .filter(|circuit| !covered.contains(circuit))
        .map(CircuitIdentity::qualified_name)
        .collect();
    match missing.is_empty() {
        true => Ok(()),
        false => Err(CeremonyError::IncompleteChainLink(id.to_string(), missing.join(", "))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{enumerate, Family, FamilySelection};

    fn label(name: &str) -> ContributorLabel {
        ContributorLabel::new(name).unwrap()
    }

    #[test]
    fn test_contributor_label() {
        assert!(ContributorLabel::new("alice").is_ok());
        assert!(ContributorLabel::new("Alice-42").is_ok());
        for invalid in &["", "al_ice", "../alice", "al ice", "alice/", "ålice"] {
            assert!(ContributorLabel::new(invalid).is_err(), "{:?} should be rejected", invalid);
        }
        assert!(ContributorLabel::new(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_next_id_from_initial() {
        let id = next_id("0000_initial", &label("alice")).unwrap();
        assert_eq!(id.to_string(), "0001_alice");
        assert_eq!(id.sequence(), 1);
    }

    #[test]
    fn test_next_id_is_monotonic() {
        let mut previous = ContributionId::initial().to_string();
        for sequence in 1..=20u32 {
            let id = next_id(&previous, &label("bob")).unwrap();
            assert_eq!(id.sequence(), sequence);
            previous = id.to_string();
        }
        assert_eq!(previous, "0020_bob");

        assert_eq!(next_id("0099", &label("x")).unwrap().to_string(), "0100_x");
        assert_eq!(next_id("9999_y", &label("x")).unwrap().to_string(), "10000_x");
        assert_eq!(next_id("12345_y", &label("x")).unwrap().sequence(), 12346);
    }

    #[test]
    fn test_next_id_rejects_malformed_prefixes() {
        for malformed in &["initial", "_0001", "", "00a1_bob", "-001_bob", "4294967295_bob", "99999999999_bob"] {
            match next_id(malformed, &label("alice")) {
                Err(CeremonyError::MalformedPredecessorId(id)) => assert_eq!(&id, malformed),
                other => panic!("{:?} should be rejected, found {:?}", malformed, other),
            }
        }
    }

    #[test]
    fn test_contribution_id_parsing() {
        let id: ContributionId = "0003_carol".parse().unwrap();
        assert_eq!(id.sequence(), 3);
        assert_eq!(id.contributor().as_str(), "carol");
        assert!("0003".parse::<ContributionId>().is_err());
        assert!("0003_".parse::<ContributionId>().is_err());
        assert!(ContributionId::initial().is_initial());

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"0003_carol\"");
        assert_eq!(serde_json::from_str::<ContributionId>(&json).unwrap(), id);
    }

    #[test]
    fn test_chain_link_coverage() {
        let catalog = Catalog::standard().subset(&FamilySelection::only(Family::Batch));
        let mut link = ChainLink::start(&ContributionId::initial(), &label("alice")).unwrap();
        assert_eq!(link.id().to_string(), "0001_alice");
        assert_eq!(link.predecessor(), Some(&ContributionId::initial()));
        assert_eq!(link.missing(&catalog).len(), 6);

        let circuits = enumerate(Family::Batch);
        for circuit in circuits.iter().skip(1) {
            link.record(
                circuit.clone(),
                LinkFiles::commitment(PathBuf::from(format!("{}.ph2", circuit))),
            );
        }
        assert_eq!(link.missing(&catalog), vec![&circuits[0]]);
        match link.ensure_complete(&catalog) {
            Err(CeremonyError::IncompleteChainLink(id, missing)) => {
                assert_eq!(id, "0001_alice");
                assert_eq!(missing, "batch/batch_append_32_10");
            }
            other => panic!("expected an incomplete link, found {:?}", other),
        }

        link.record(circuits[0].clone(), LinkFiles::commitment(PathBuf::from("a.ph2")));
        assert!(link.ensure_complete(&catalog).is_ok());
    }

    #[test]
    fn test_ensure_coverage() {
        let catalog = Catalog::standard().subset(&FamilySelection::only(Family::Batch));
        let circuits = enumerate(Family::Batch);
        let id = ContributionId::initial();
        assert!(ensure_coverage(&id, &catalog, circuits.iter()).is_ok());

        match ensure_coverage(&id, &catalog, circuits.iter().step_by(2)) {
            Err(CeremonyError::IncompleteChainLink(id, missing)) => {
                assert_eq!(id, "0000_initial");
                assert_eq!(missing.split(", ").count(), 3);
                assert!(!missing.contains(&circuits[0].qualified_name()));
            }
            other => panic!("expected missing circuits, found {:?}", other),
        }
    }
}
