//! Signed, time-bounded URLs granting access to one object of the blob store.

use crate::{
    errors::CeremonyError,
    structures::{GrantMode, TransferGrant},
};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::{Duration, OffsetDateTime};
use url::Url;

/// Grants are valid for seven days unless configured otherwise.
pub const DEFAULT_GRANT_VALIDITY: Duration = Duration::days(7);

const MODE_PARAMETER: &str = "mode";
const EXPIRES_PARAMETER: &str = "expires";
const SIGNATURE_PARAMETER: &str = "signature";

type HmacSha256 = Hmac<Sha256>;

/// Issues and checks signed URLs with a secret shared with the storage backend.
#[derive(Clone)]
pub struct GrantAuthority {
    secret: Vec<u8>,
}

impl std::fmt::Debug for GrantAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantAuthority").finish()
    }
}

impl GrantAuthority {
    pub fn new<S: AsRef<[u8]>>(secret: S) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Returns the HMAC-SHA256 over the NUL-separated mode, path and expiry of a grant.
    fn mac(&self, mode: GrantMode, path: &str, expires: i64) -> Result<HmacSha256, CeremonyError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|error| CeremonyError::Configuration(format!("invalid signing secret: {}", error)))?;
        let expires = expires.to_string();
        for field in [mode.as_str(), path, expires.as_str()].iter() {
            mac.update(&[0u8]);
            mac.update(field.as_bytes());
        }
        Ok(mac)
    }

    /// Returns a grant for `path` (relative to `base`) valid until `expires_at`.
    pub fn sign(
        &self,
        base: &Url,
        path: &str,
        mode: GrantMode,
        expires_at: OffsetDateTime,
    ) -> Result<TransferGrant, CeremonyError> {
        let expires = expires_at.unix_timestamp();
        let signature = hex::encode(self.mac(mode, path, expires)?.finalize().into_bytes());
        let mut url = base.join(path)?;
        url.query_pairs_mut()
            .clear()
            .append_pair(MODE_PARAMETER, mode.as_str())
            .append_pair(EXPIRES_PARAMETER, &expires.to_string())
            .append_pair(SIGNATURE_PARAMETER, &signature);

        Ok(TransferGrant {
            path: path.to_string(),
            mode,
            expires_at: OffsetDateTime::from_unix_timestamp(expires)
                .map_err(|error| CeremonyError::Configuration(error.to_string()))?,
            url,
        })
    }

    ///
    /// Checks a signed URL the way the storage backend does before serving it.
    ///
    /// Returns the storage path (relative to `base`) the URL grants `mode`
    /// access to.
    ///
    pub fn authorize(
        &self,
        base: &Url,
        url: &Url,
        mode: GrantMode,
        now: OffsetDateTime,
    ) -> Result<String, CeremonyError> {
        let path = url
            .path()
            .strip_prefix(base.path())
            .ok_or_else(|| CeremonyError::InvalidSignature(url.path().to_string()))?
            .to_string();

        let expires = query_value(url, EXPIRES_PARAMETER)
            .and_then(|value| value.parse::<i64>().ok())
            .ok_or_else(|| CeremonyError::InvalidSignature(path.clone()))?;
        let signature = query_value(url, SIGNATURE_PARAMETER)
            .and_then(|signature| hex::decode(signature).ok())
            .ok_or_else(|| CeremonyError::InvalidSignature(path.clone()))?;
        if query_value(url, MODE_PARAMETER).as_deref() != Some(mode.as_str()) {
            return Err(CeremonyError::InvalidSignature(path));
        }
        if self.mac(mode, &path, expires)?.verify_slice(&signature).is_err() {
            return Err(CeremonyError::InvalidSignature(path));
        }
        if now.unix_timestamp() > expires {
            return Err(CeremonyError::CapabilityExpired(path));
        }
        Ok(path)
    }
}

fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Returns the advisory expiry carried by a signed URL, if any.
pub fn grant_expiry(url: &Url) -> Option<OffsetDateTime> {
    query_value(url, EXPIRES_PARAMETER)
        .and_then(|value| value.parse::<i64>().ok())
        .and_then(|expires| OffsetDateTime::from_unix_timestamp(expires).ok())
}

/// Fails with `CapabilityExpired` if the URL's advisory expiry has passed.
pub fn ensure_unexpired(url: &Url, now: OffsetDateTime) -> Result<(), CeremonyError> {
    match grant_expiry(url) {
        Some(expires_at) if now > expires_at => Err(CeremonyError::CapabilityExpired(url.path().to_string())),
        _ => Ok(()),
    }
}
