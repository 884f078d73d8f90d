//! The data structures exchanged between the coordinator and contributors.

use crate::{
    catalog::{Catalog, Family, FamilySelection},
    chain::{ContributionId, ContributorLabel},
    errors::CeremonyError,
};

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, convert::TryFrom, fmt, path::Path};
use time::OffsetDateTime;
use url::Url;

/// Returns the name of the per-round hash attestation log.
pub fn attestation_file_name(contribution_id: &ContributionId) -> String {
    format!("{}_contribution_hashes.txt", contribution_id)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantMode {
    Read,
    Write,
}

impl GrantMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantMode::Read => "read",
            GrantMode::Write => "write",
        }
    }
}

impl fmt::Display for GrantMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A time-bounded capability to read or write one object of the blob store.
///
/// The expiry is advisory metadata, enforcement happens in the storage backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferGrant {
    pub path: String,
    pub mode: GrantMode,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub url: Url,
}

/// The download and upload grants of one circuit family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FamilyGrants {
    pub family: Family,
    /// Predecessor file name to read grant.
    pub download: BTreeMap<String, Url>,
    /// Expected output file name to write grant, including the attestation log.
    pub upload: BTreeMap<String, Url>,
}

impl FamilyGrants {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            download: BTreeMap::new(),
            upload: BTreeMap::new(),
        }
    }
}

///
/// The document handed from the coordinator to a contributor.
///
/// It is self-describing: a contributor needs nothing else to know what to
/// fetch and where to send the results.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireManifest", try_from = "WireManifest")]
pub struct ExchangeManifest {
    pub contributor: ContributorLabel,
    pub contribution_id: ContributionId,
    pub previous_contribution: ContributionId,
    pub expires_at: Option<OffsetDateTime>,
    pub families: Vec<FamilyGrants>,
}

impl ExchangeManifest {
    /// Returns the grants of a family, if the manifest carries it.
    pub fn family(&self, family: Family) -> Option<&FamilyGrants> {
        self.families.iter().find(|grants| grants.family == family)
    }

    /// Returns the grants of the selected families in manifest order.
    pub fn select(&self, selection: &FamilySelection) -> Vec<&FamilyGrants> {
        self.families
            .iter()
            .filter(|grants| selection.contains(grants.family))
            .collect()
    }

    /// Returns the families the manifest carries. A manifest without families is an `EmptyRound`.
    pub fn selection(&self) -> Result<FamilySelection, CeremonyError> {
        if self.families.is_empty() {
            return Err(CeremonyError::EmptyRound(self.contribution_id.to_string()));
        }
        let names: Vec<&str> = self.families.iter().map(|grants| grants.family.as_str()).collect();
        names.join(",").parse()
    }

    /// Returns the attestation log name for this round.
    pub fn attestation_file_name(&self) -> String {
        attestation_file_name(&self.contribution_id)
    }

    pub fn to_json_pretty(&self) -> Result<String, CeremonyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CeremonyError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a manifest from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CeremonyError> {
        Self::from_json(&fs_err::read_to_string(path.as_ref())?)
    }

    /// Writes the manifest to a file, creating parent directories as needed.
    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<(), CeremonyError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WireFamily {
    version: Family,
    download: BTreeMap<String, Url>,
    upload: BTreeMap<String, Url>,
}

/// The two JSON layouts of a manifest: a flat one for a single family and a
/// `versions` array when several families are exchanged at once.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum WireManifest {
    Multi {
        contributor: ContributorLabel,
        contribution_id: ContributionId,
        previous_contribution: ContributionId,
        #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
        expires_at: Option<OffsetDateTime>,
        versions: Vec<WireFamily>,
    },
    Single {
        contributor: ContributorLabel,
        contribution_id: ContributionId,
        previous_contribution: ContributionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<Family>,
        #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
        expires_at: Option<OffsetDateTime>,
        download: BTreeMap<String, Url>,
        upload: BTreeMap<String, Url>,
    },
}

impl From<ExchangeManifest> for WireManifest {
    fn from(manifest: ExchangeManifest) -> Self {
        let ExchangeManifest {
            contributor,
            contribution_id,
            previous_contribution,
            expires_at,
            mut families,
        } = manifest;

        if families.len() == 1 {
            let grants = families.remove(0);
            return WireManifest::Single {
                contributor,
                contribution_id,
                previous_contribution,
                version: Some(grants.family),
                expires_at,
                download: grants.download,
                upload: grants.upload,
            };
        }

        WireManifest::Multi {
            contributor,
            contribution_id,
            previous_contribution,
            expires_at,
            versions: families
                .into_iter()
                .map(|grants| WireFamily {
                    version: grants.family,
                    download: grants.download,
                    upload: grants.upload,
                })
                .collect(),
        }
    }
}

impl TryFrom<WireManifest> for ExchangeManifest {
    type Error = CeremonyError;

    fn try_from(wire: WireManifest) -> Result<Self, Self::Error> {
        let manifest = match wire {
            WireManifest::Multi {
                contributor,
                contribution_id,
                previous_contribution,
                expires_at,
                versions,
            } => ExchangeManifest {
                contributor,
                contribution_id,
                previous_contribution,
                expires_at,
                families: versions
                    .into_iter()
                    .map(|family| FamilyGrants {
                        family: family.version,
                        download: family.download,
                        upload: family.upload,
                    })
                    .collect(),
            },
            WireManifest::Single {
                contributor,
                contribution_id,
                previous_contribution,
                version,
                expires_at,
                download,
                upload,
            } => {
                let family = match version {
                    Some(family) => family,
                    None => infer_family(&download)?,
                };
                ExchangeManifest {
                    contributor,
                    contribution_id,
                    previous_contribution,
                    expires_at,
                    families: vec![FamilyGrants {
                        family,
                        download,
                        upload,
                    }],
                }
            }
        };

        if manifest.contribution_id.contributor() != &manifest.contributor {
            return Err(CeremonyError::Configuration(format!(
                "manifest contribution {} does not belong to contributor {}",
                manifest.contribution_id, manifest.contributor
            )));
        }
        if manifest.previous_contribution.next(&manifest.contributor)? != manifest.contribution_id {
            return Err(CeremonyError::MalformedPredecessorId(format!(
                "{} cannot precede {}",
                manifest.previous_contribution, manifest.contribution_id
            )));
        }
        Ok(manifest)
    }
}

/// Infers the family of a single-family manifest written without `version`
/// from the circuits its download set names.
fn infer_family(download: &BTreeMap<String, Url>) -> Result<Family, CeremonyError> {
    let catalog = Catalog::standard();
    let mut families = Vec::new();
    for filename in download.keys() {
        let family = crate::naming::resolve_circuit(filename, &catalog, None)?.family();
        if !families.contains(&family) {
            families.push(family);
        }
    }
    match families.as_slice() {
        [family] => Ok(*family),
        _ => Err(CeremonyError::Configuration(
            "manifest does not name its version and its files do not identify a single family".to_string(),
        )),
    }
}
