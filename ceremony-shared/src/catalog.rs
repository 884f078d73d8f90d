//! The fixed set of circuits tracked through the ceremony.
//!
//! The tables below are the single source of truth for every consumer. The
//! coordinator and contributors must agree on them exactly, otherwise chain
//! coverage silently breaks at verification time.

use crate::errors::CeremonyError;

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

const V1_TREE_HEIGHT: u32 = 26;
const V1_INCLUSION_ACCOUNTS: &[u32] = &[1, 2, 3, 4, 8];
const V1_NON_INCLUSION_ACCOUNTS: &[u32] = &[1, 2];
const V1_COMBINED_INCLUSION_ACCOUNTS: &[u32] = &[1, 2, 3, 4];
const V1_COMBINED_NON_INCLUSION_ACCOUNTS: &[u32] = &[1, 2];

const V2_INCLUSION_TREE_HEIGHT: u32 = 32;
const V2_NON_INCLUSION_TREE_HEIGHT: u32 = 40;
const V2_INCLUSION_ACCOUNTS: &[u32] = &[1, 2, 3, 4, 8];
const V2_NON_INCLUSION_ACCOUNTS: &[u32] = &[1, 2, 3, 4, 8];
const V2_COMBINED_INCLUSION_ACCOUNTS: &[u32] = &[1, 2, 3, 4];
const V2_COMBINED_NON_INCLUSION_ACCOUNTS: &[u32] = &[1, 2, 3, 4];

const BATCH_STATE_TREE_HEIGHT: u32 = 32;
const BATCH_ADDRESS_TREE_HEIGHT: u32 = 40;
const BATCH_APPEND_SIZES: &[u32] = &[10, 500];
const BATCH_UPDATE_SIZES: &[u32] = &[10, 500];
const BATCH_ADDRESS_APPEND_SIZES: &[u32] = &[10, 250];

const BATCH_PREFIX: &str = "batch_";

/// A named group of circuit configurations sharing tree-height conventions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    V1,
    V2,
    Batch,
}

impl Family {
    pub const ALL: [Family; 3] = [Family::V1, Family::V2, Family::Batch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::V1 => "v1",
            Family::V2 => "v2",
            Family::Batch => "batch",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Family {
    type Err = CeremonyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "v1" => Ok(Family::V1),
            "v2" => Ok(Family::V2),
            "batch" => Ok(Family::Batch),
            _ => Err(CeremonyError::Configuration(format!(
                "unknown circuit family {:?}, expected one of v1, v2, batch",
                s
            ))),
        }
    }
}

/// The families requested for one operation, either `all` or an explicit list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FamilySelection(Vec<Family>);

impl FamilySelection {
    pub fn all() -> Self {
        Self(Family::ALL.to_vec())
    }

    pub fn only(family: Family) -> Self {
        Self(vec![family])
    }

    /// Returns the selected families in catalog order.
    pub fn families(&self) -> &[Family] {
        &self.0
    }

    pub fn contains(&self, family: Family) -> bool {
        self.0.contains(&family)
    }
}

impl Default for FamilySelection {
    fn default() -> Self {
        Self::all()
    }
}

impl From<Option<Family>> for FamilySelection {
    fn from(family: Option<Family>) -> Self {
        match family {
            Some(family) => Self::only(family),
            None => Self::all(),
        }
    }
}

impl FromStr for FamilySelection {
    type Err = CeremonyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        let mut families = Vec::new();
        for token in s.split(',').map(str::trim).filter(|token| !token.is_empty()) {
            let family = token.parse::<Family>()?;
            if !families.contains(&family) {
                families.push(family);
            }
        }
        if families.is_empty() {
            return Err(CeremonyError::Configuration("empty family selection".to_string()));
        }
        families.sort();
        Ok(Self(families))
    }
}

impl fmt::Display for FamilySelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == Family::ALL.len() {
            return write!(f, "all");
        }
        let names: Vec<&str> = self.0.iter().map(Family::as_str).collect();
        write!(f, "{}", names.join(","))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitKind {
    Inclusion,
    NonInclusion,
    Combined,
    Append,
    Update,
    AddressAppend,
}

impl CircuitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitKind::Inclusion => "inclusion",
            CircuitKind::NonInclusion => "non-inclusion",
            CircuitKind::Combined => "combined",
            CircuitKind::Append => "append",
            CircuitKind::Update => "update",
            CircuitKind::AddressAppend => "address-append",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "inclusion" => Some(CircuitKind::Inclusion),
            "non-inclusion" => Some(CircuitKind::NonInclusion),
            "combined" => Some(CircuitKind::Combined),
            "append" => Some(CircuitKind::Append),
            "update" => Some(CircuitKind::Update),
            "address-append" => Some(CircuitKind::AddressAppend),
            _ => None,
        }
    }

    /// Returns the number of tree heights and counts a circuit of this kind
    /// carries in the given family, or `None` if the family has no such kind.
    pub fn arity(&self, family: Family) -> Option<(usize, usize)> {
        match (family, self) {
            (Family::V1, CircuitKind::Inclusion) | (Family::V1, CircuitKind::NonInclusion) => Some((1, 1)),
            (Family::V1, CircuitKind::Combined) => Some((1, 2)),
            (Family::V2, CircuitKind::Inclusion) | (Family::V2, CircuitKind::NonInclusion) => Some((1, 1)),
            (Family::V2, CircuitKind::Combined) => Some((2, 2)),
            (Family::Batch, CircuitKind::Append)
            | (Family::Batch, CircuitKind::Update)
            | (Family::Batch, CircuitKind::AddressAppend) => Some((1, 1)),
            _ => None,
        }
    }
}

impl fmt::Display for CircuitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable descriptor of one circuit tracked through the ceremony.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CircuitIdentity {
    family: Family,
    kind: CircuitKind,
    heights: Vec<u32>,
    counts: Vec<u32>,
}

impl CircuitIdentity {
    /// Creates a new circuit identity, checking the parameter arity for its family.
    pub fn new(family: Family, kind: CircuitKind, heights: Vec<u32>, counts: Vec<u32>) -> Result<Self, CeremonyError> {
        let identity = Self {
            family,
            kind,
            heights,
            counts,
        };
        match kind.arity(family) {
            Some((heights, counts))
                if identity.heights.len() == heights
                    && identity.counts.len() == counts
                    && identity.heights.iter().chain(identity.counts.iter()).all(|value| *value > 0) =>
            {
                Ok(identity)
            }
            _ => Err(CeremonyError::UnrecognizedArtifactName(identity.canonical_name())),
        }
    }

    #[inline]
    pub fn family(&self) -> Family {
        self.family
    }

    #[inline]
    pub fn kind(&self) -> CircuitKind {
        self.kind
    }

    #[inline]
    pub fn heights(&self) -> &[u32] {
        &self.heights
    }

    #[inline]
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Returns the canonical name, e.g. `combined_32_40_1_1` or `batch_append_32_10`.
    ///
    /// The name alone is lossy across families, the family must accompany it
    /// whenever stored files are disambiguated.
    pub fn canonical_name(&self) -> String {
        let mut name = String::new();
        if self.family == Family::Batch {
            name.push_str(BATCH_PREFIX);
        }
        name.push_str(self.kind.as_str());
        for value in self.heights.iter().chain(self.counts.iter()) {
            name.push('_');
            name.push_str(&value.to_string());
        }
        name
    }

    /// Returns `{family}/{canonical_name}`.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.family, self.canonical_name())
    }

    /// Parses a canonical name under the conventions of one family.
    pub fn parse(family: Family, name: &str) -> Result<Self, CeremonyError> {
        let unrecognized = || CeremonyError::UnrecognizedArtifactName(name.to_string());

        let body = match (family, name.strip_prefix(BATCH_PREFIX)) {
            (Family::Batch, Some(body)) => body,
            (Family::Batch, None) | (_, Some(_)) => return Err(unrecognized()),
            (_, None) => name,
        };

        let mut tokens = body.split('_');
        let kind = tokens.next().and_then(CircuitKind::from_token).ok_or_else(unrecognized)?;
        let (num_heights, num_counts) = kind.arity(family).ok_or_else(unrecognized)?;

        let values = tokens
            .map(|token| match token.parse::<u32>() {
                Ok(value) if value > 0 && !token.starts_with('0') => Ok(value),
                _ => Err(unrecognized()),
            })
            .collect::<Result<Vec<u32>, CeremonyError>>()?;
        if values.len() != num_heights + num_counts {
            return Err(unrecognized());
        }

        let (heights, counts) = values.split_at(num_heights);
        Self::new(family, kind, heights.to_vec(), counts.to_vec())
    }
}

impl fmt::Display for CircuitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

/// The set of circuits a ceremony (or one operation of it) tracks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Catalog {
    circuits: Vec<CircuitIdentity>,
}

impl Catalog {
    /// Returns the full ceremony catalog built from the fixed tables.
    pub fn standard() -> Self {
        let circuits = Family::ALL.iter().flat_map(|family| enumerate(*family)).collect();
        Self { circuits }
    }

    /// Creates a catalog from an explicit list of circuits, keeping the first
    /// occurrence of any duplicate.
    pub fn from_circuits<I: IntoIterator<Item = CircuitIdentity>>(circuits: I) -> Self {
        let mut unique: Vec<CircuitIdentity> = Vec::new();
        for circuit in circuits {
            if !unique.contains(&circuit) {
                unique.push(circuit);
            }
        }
        Self { circuits: unique }
    }

    /// Returns the catalog restricted to the selected families.
    pub fn subset(&self, selection: &FamilySelection) -> Self {
        Self {
            circuits: self
                .circuits
                .iter()
                .filter(|circuit| selection.contains(circuit.family))
                .cloned()
                .collect(),
        }
    }

    /// Returns the circuits of one family, in table order.
    pub fn family(&self, family: Family) -> Vec<&CircuitIdentity> {
        self.circuits.iter().filter(|circuit| circuit.family == family).collect()
    }

    /// Returns the families present in this catalog, in catalog order.
    pub fn families(&self) -> Vec<Family> {
        let mut families: Vec<Family> = self.circuits.iter().map(CircuitIdentity::family).collect();
        families.sort();
        families.dedup();
        families
    }

    pub fn iter(&self) -> impl Iterator<Item = &CircuitIdentity> {
        self.circuits.iter()
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    pub fn contains(&self, circuit: &CircuitIdentity) -> bool {
        self.circuits.contains(circuit)
    }

    /// Resolves a canonical circuit name against the catalog.
    ///
    /// Resolution runs in two stages: the family is fixed first (from the hint,
    /// the `batch_` prefix, or by trying v1 and v2), then the parameter arity
    /// of that family decides how the numbers are read. A name that fits more
    /// than one catalog entry is rejected rather than guessed.
    pub fn resolve(&self, name: &str, family_hint: Option<Family>) -> Result<CircuitIdentity, CeremonyError> {
        let families = match family_hint {
            Some(family) => vec![family],
            None if name.starts_with(BATCH_PREFIX) => vec![Family::Batch],
            None => vec![Family::V1, Family::V2],
        };

        let mut matches: Vec<CircuitIdentity> = families
            .into_iter()
            .filter_map(|family| CircuitIdentity::parse(family, name).ok())
            .filter(|circuit| self.contains(circuit))
            .collect();

        match matches.len() {
            0 => Err(CeremonyError::UnrecognizedArtifactName(name.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(CeremonyError::AmbiguousCircuitName(
                name.to_string(),
                matches
                    .iter()
                    .map(CircuitIdentity::qualified_name)
                    .collect::<Vec<_>>()
                    .join(", "),
            )),
        }
    }
}

fn single(family: Family, kind: CircuitKind, height: u32, counts: &[u32]) -> Vec<CircuitIdentity> {
    counts
        .iter()
        .map(|count| CircuitIdentity {
            family,
            kind,
            heights: vec![height],
            counts: vec![*count],
        })
        .collect()
}

fn combined(family: Family, heights: &[u32], inclusion: &[u32], non_inclusion: &[u32]) -> Vec<CircuitIdentity> {
    let mut circuits = Vec::with_capacity(inclusion.len() * non_inclusion.len());
    for i in inclusion {
        for j in non_inclusion {
            circuits.push(CircuitIdentity {
                family,
                kind: CircuitKind::Combined,
                heights: heights.to_vec(),
                counts: vec![*i, *j],
            });
        }
    }
    circuits
}

/// Enumerates the circuits of a family from the fixed tables, in table order.
pub fn enumerate(family: Family) -> Vec<CircuitIdentity> {
    match family {
        Family::V1 => [
            single(family, CircuitKind::Inclusion, V1_TREE_HEIGHT, V1_INCLUSION_ACCOUNTS),
            single(family, CircuitKind::NonInclusion, V1_TREE_HEIGHT, V1_NON_INCLUSION_ACCOUNTS),
            combined(
                family,
                &[V1_TREE_HEIGHT],
                V1_COMBINED_INCLUSION_ACCOUNTS,
                V1_COMBINED_NON_INCLUSION_ACCOUNTS,
            ),
        ]
        .concat(),
        Family::V2 => [
            single(
                family,
                CircuitKind::Inclusion,
                V2_INCLUSION_TREE_HEIGHT,
                V2_INCLUSION_ACCOUNTS,
            ),
            single(
                family,
                CircuitKind::NonInclusion,
                V2_NON_INCLUSION_TREE_HEIGHT,
                V2_NON_INCLUSION_ACCOUNTS,
            ),
            combined(
                family,
                &[V2_INCLUSION_TREE_HEIGHT, V2_NON_INCLUSION_TREE_HEIGHT],
                V2_COMBINED_INCLUSION_ACCOUNTS,
                V2_COMBINED_NON_INCLUSION_ACCOUNTS,
            ),
        ]
        .concat(),
        Family::Batch => [
            single(family, CircuitKind::Append, BATCH_STATE_TREE_HEIGHT, BATCH_APPEND_SIZES),
            single(family, CircuitKind::Update, BATCH_STATE_TREE_HEIGHT, BATCH_UPDATE_SIZES),
            single(
                family,
                CircuitKind::AddressAppend,
                BATCH_ADDRESS_TREE_HEIGHT,
                BATCH_ADDRESS_APPEND_SIZES,
            ),
        ]
        .concat(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_sizes_are_stable() {
        assert_eq!(enumerate(Family::V1).len(), 15);
        assert_eq!(enumerate(Family::V2).len(), 26);
        assert_eq!(enumerate(Family::Batch).len(), 6);
        assert_eq!(Catalog::standard().len(), 47);
    }

    #[test]
    fn test_canonical_names() {
        let v1 = enumerate(Family::V1);
        assert_eq!(v1[0].canonical_name(), "inclusion_26_1");
        assert!(v1.iter().any(|c| c.canonical_name() == "non-inclusion_26_2"));
        assert!(v1.iter().any(|c| c.canonical_name() == "combined_26_4_2"));

        let v2 = enumerate(Family::V2);
        assert!(v2.iter().any(|c| c.canonical_name() == "non-inclusion_40_8"));
        assert!(v2.iter().any(|c| c.canonical_name() == "combined_32_40_3_4"));

        let batch = enumerate(Family::Batch);
        assert_eq!(batch[0].canonical_name(), "batch_append_32_10");
        assert_eq!(batch[5].canonical_name(), "batch_address-append_40_250");
    }

    #[test]
    fn test_canonical_names_are_unique_within_the_catalog() {
        let catalog = Catalog::standard();
        let mut names: Vec<String> = catalog.iter().map(CircuitIdentity::canonical_name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), catalog.len());
    }

    #[test]
    fn test_resolve_every_catalog_entry() {
        let catalog = Catalog::standard();
        for circuit in catalog.iter() {
            let name = circuit.canonical_name();
            assert_eq!(&catalog.resolve(&name, None).unwrap(), circuit);
            assert_eq!(&catalog.resolve(&name, Some(circuit.family())).unwrap(), circuit);
        }
    }

    #[test]
    fn test_resolve_uses_family_arity() {
        let catalog = Catalog::standard();

        // Three numbers only fit the v1 combined layout.
        let v1 = catalog.resolve("combined_26_1_1", None).unwrap();
        assert_eq!(v1.family(), Family::V1);
        assert_eq!(v1.heights(), &[26]);
        assert_eq!(v1.counts(), &[1, 1]);

        // Four numbers only fit the v2 combined layout.
        let v2 = catalog.resolve("combined_32_40_1_1", None).unwrap();
        assert_eq!(v2.family(), Family::V2);
        assert_eq!(v2.heights(), &[32, 40]);

        // A v1 shaped name under a v2 hint is rejected.
        assert!(catalog.resolve("combined_26_1_1", Some(Family::V2)).is_err());
    }

    #[test]
    fn test_resolve_reports_ambiguity() {
        let ambiguous = Catalog::from_circuits(vec![
            CircuitIdentity::new(Family::V1, CircuitKind::Inclusion, vec![26], vec![1]).unwrap(),
            CircuitIdentity::new(Family::V2, CircuitKind::Inclusion, vec![26], vec![1]).unwrap(),
        ]);
        match ambiguous.resolve("inclusion_26_1", None) {
            Err(CeremonyError::AmbiguousCircuitName(name, _)) => assert_eq!(name, "inclusion_26_1"),
            other => panic!("expected an ambiguity error, found {:?}", other),
        }
        assert_eq!(
            ambiguous.resolve("inclusion_26_1", Some(Family::V2)).unwrap().family(),
            Family::V2
        );
    }

    #[test]
    fn test_resolve_rejects_unknown_names() {
        let catalog = Catalog::standard();
        for name in &[
            "",
            "inclusion",
            "inclusion_26",
            "inclusion_26_5",
            "inclusion_26_01",
            "exclusion_26_1",
            "batch_inclusion_26_1",
            "append_32_10",
            "batch_append_32_10_1",
        ] {
            assert!(catalog.resolve(name, None).is_err(), "{} should not resolve", name);
        }
    }

    #[test]
    fn test_family_selection_parsing() {
        assert_eq!("all".parse::<FamilySelection>().unwrap(), FamilySelection::all());
        assert_eq!(
            "v2".parse::<FamilySelection>().unwrap(),
            FamilySelection::only(Family::V2)
        );
        let selection = "batch, v1".parse::<FamilySelection>().unwrap();
        assert_eq!(selection.families(), &[Family::V1, Family::Batch]);
        assert_eq!(selection.to_string(), "v1,batch");
        assert!("v3".parse::<FamilySelection>().is_err());
        assert!("".parse::<FamilySelection>().is_err());
    }

    #[test]
    fn test_subset() {
        let catalog = Catalog::standard();
        let subset = catalog.subset(&FamilySelection::only(Family::Batch));
        assert_eq!(subset.len(), 6);
        assert_eq!(subset.families(), vec![Family::Batch]);
    }
}
