use ceremony_shared::{
    grants::{ensure_unexpired, grant_expiry, GrantAuthority},
    reliability::{retry, Failure, RetryPolicy},
    structures::GrantMode,
    CeremonyError,
};

use reqwest::{header, Client, StatusCode};
use std::{
    io,
    path::{Path, PathBuf},
};
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};
use url::Url;

///
/// Moves files in and out of the blob store through signed grants.
///
/// `http` and `https` grants are fetched with GET and written with PUT,
/// `file` grants are plain copies on the local machine. Every transfer runs
/// under the retry policy; expired grants fail at once.
///
#[derive(Clone, Debug)]
pub struct Transport {
    client: Client,
    policy: RetryPolicy,
    authority: Option<(GrantAuthority, Url)>,
}

impl Transport {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            client: Client::new(),
            policy,
            authority: None,
        }
    }

    /// Checks the signature of `file` grants against `base` before using them.
    pub fn with_authority(mut self, authority: GrantAuthority, base: Url) -> Self {
        self.authority = Some((authority, base));
        self
    }

    #[inline]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Downloads the object behind a read grant to `destination`. Returns the number of bytes written.
    pub async fn download(&self, url: &Url, destination: &Path) -> Result<u64, CeremonyError> {
        let label = format!("download of {}", object_name(url));
        retry(&self.policy, &label, |attempt| self.try_download(url, destination, attempt)).await
    }

    /// Uploads `source` through a write grant. Returns the number of bytes sent.
    pub async fn upload(&self, url: &Url, source: &Path) -> Result<u64, CeremonyError> {
        let label = format!("upload of {}", object_name(url));
        retry(&self.policy, &label, |attempt| self.try_upload(url, source, attempt)).await
    }

    async fn try_download(&self, url: &Url, destination: &Path, attempt: u32) -> Result<u64, Failure> {
        ensure_unexpired(url, OffsetDateTime::now_utc()).map_err(Failure::Permanent)?;
        trace!("Downloading {} (attempt {})", object_name(url), attempt);

        match url.scheme() {
            "file" => {
                let source = self.local_path(url, GrantMode::Read)?;
                match tokio::fs::copy(&source, destination).await {
                    Ok(bytes) => Ok(bytes),
                    Err(error) if error.kind() == io::ErrorKind::NotFound => Err(Failure::Permanent(
                        transfer_failed(url, attempt, format!("{} does not exist", source.display())),
                    )),
                    Err(error) => Err(Failure::Transient(error.into())),
                }
            }
            "http" | "https" => {
                let mut response = self.client.get(url.clone()).send().await.map_err(request_failure)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(classify_status(url, status, attempt, OffsetDateTime::now_utc()));
                }

                let mut file = tokio::fs::File::create(destination)
                    .await
                    .map_err(|error| Failure::Transient(error.into()))?;
                let mut written = 0u64;
                while let Some(chunk) = response.chunk().await.map_err(request_failure)? {
                    file.write_all(&chunk)
                        .await
                        .map_err(|error| Failure::Transient(error.into()))?;
                    written += chunk.len() as u64;
                }
                file.flush().await.map_err(|error| Failure::Transient(error.into()))?;
                Ok(written)
            }
            scheme => Err(Failure::Permanent(unsupported_scheme(scheme))),
        }
    }

    async fn try_upload(&self, url: &Url, source: &Path, attempt: u32) -> Result<u64, Failure> {
        ensure_unexpired(url, OffsetDateTime::now_utc()).map_err(Failure::Permanent)?;
        trace!("Uploading {} (attempt {})", object_name(url), attempt);

        let contents = tokio::fs::read(source)
            .await
            .map_err(|error| Failure::Permanent(error.into()))?;
        let length = contents.len() as u64;

        match url.scheme() {
            "file" => {
                let destination = self.local_path(url, GrantMode::Write)?;
                if let Some(parent) = destination.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|error| Failure::Transient(error.into()))?;
                }
                tokio::fs::write(&destination, contents)
                    .await
                    .map_err(|error| Failure::Transient(error.into()))?;
                Ok(length)
            }
            "http" | "https" => {
                let response = self
                    .client
                    .put(url.clone())
                    .header(header::CONTENT_TYPE, "application/octet-stream")
                    .header(header::CONTENT_LENGTH, length)
                    .body(contents)
                    .send()
                    .await
                    .map_err(request_failure)?;
                let status = response.status();
                match status.is_success() {
                    true => {
                        debug!("Uploaded {} ({} bytes)", object_name(url), length);
                        Ok(length)
                    }
                    false => Err(classify_status(url, status, attempt, OffsetDateTime::now_utc())),
                }
            }
            scheme => Err(Failure::Permanent(unsupported_scheme(scheme))),
        }
    }

    fn local_path(&self, url: &Url, mode: GrantMode) -> Result<PathBuf, Failure> {
        if let Some((authority, base)) = &self.authority {
            authority
                .authorize(base, url, mode, OffsetDateTime::now_utc())
                .map_err(Failure::Permanent)?;
        }
        url.to_file_path().map_err(|_| {
            Failure::Permanent(CeremonyError::Configuration(format!(
                "{} is not a local path",
                url.path()
            )))
        })
    }
}

/// Returns the last path segment of a grant, the name of the object it covers.
pub fn object_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|segment| !segment.is_empty())
        .unwrap_or_else(|| url.path())
        .to_string()
}

///
/// Sorts a failed response into retryable and fatal outcomes.
///
/// Server errors, timeouts and throttling are retried. A 403 on a grant
/// whose expiry has passed is `CapabilityExpired`; any other client error
/// fails the transfer at once.
///
pub(crate) fn classify_status(url: &Url, status: StatusCode, attempt: u32, now: OffsetDateTime) -> Failure {
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        return Failure::Transient(CeremonyError::Http(format!("{} returned {}", object_name(url), status)));
    }
    if status == StatusCode::FORBIDDEN {
        if let Some(expires_at) = grant_expiry(url) {
            if now > expires_at {
                return Failure::Permanent(CeremonyError::CapabilityExpired(object_name(url)));
            }
        }
    }
    Failure::Permanent(transfer_failed(url, attempt, format!("server returned {}", status)))
}

fn request_failure(error: reqwest::Error) -> Failure {
    Failure::Transient(CeremonyError::Http(error.to_string()))
}

fn transfer_failed(url: &Url, attempts: u32, last_error: String) -> CeremonyError {
    CeremonyError::TransferFailed {
        label: object_name(url),
        attempts,
        last_error,
    }
}

fn unsupported_scheme(scheme: &str) -> CeremonyError {
    CeremonyError::Configuration(format!("unsupported grant scheme {:?}", scheme))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn grant(authority: &GrantAuthority, base: &Url, path: &str, mode: GrantMode, expires_at: OffsetDateTime) -> Url {
        authority.sign(base, path, mode, expires_at).unwrap().url
    }

    fn store() -> (tempfile::TempDir, Url) {
        let directory = tempfile::tempdir().unwrap();
        let base = Url::from_directory_path(std::fs::canonicalize(directory.path()).unwrap()).unwrap();
        (directory, base)
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let (directory, base) = store();
        let authority = GrantAuthority::new("secret");
        let expires_at = OffsetDateTime::now_utc() + Duration::hours(1);
        std::fs::write(directory.path().join("a_0000.ph2"), b"initial").unwrap();

        let transport = Transport::new(RetryPolicy::immediate(3)).with_authority(authority.clone(), base.clone());
        let local = tempfile::tempdir().unwrap();
        let download = local.path().join("a_0000.ph2");

        let read = grant(&authority, &base, "a_0000.ph2", GrantMode::Read, expires_at);
        assert_eq!(transport.download(&read, &download).await.unwrap(), 7);
        assert_eq!(std::fs::read(&download).unwrap(), b"initial");

        let write = grant(&authority, &base, "out/a_alice_contribution_0001.ph2", GrantMode::Write, expires_at);
        assert_eq!(transport.upload(&write, &download).await.unwrap(), 7);
        assert_eq!(
            std::fs::read(directory.path().join("out/a_alice_contribution_0001.ph2")).unwrap(),
            b"initial"
        );
    }

    #[tokio::test]
    async fn test_file_grants_are_enforced() {
        let (directory, base) = store();
        let authority = GrantAuthority::new("secret");
        let transport = Transport::new(RetryPolicy::immediate(3)).with_authority(authority.clone(), base.clone());
        std::fs::write(directory.path().join("a_0000.ph2"), b"initial").unwrap();
        let destination = directory.path().join("copy");

        let expired = grant(
            &authority,
            &base,
            "a_0000.ph2",
            GrantMode::Read,
            OffsetDateTime::now_utc() - Duration::minutes(1),
        );
        assert!(matches!(
            transport.download(&expired, &destination).await,
            Err(CeremonyError::CapabilityExpired(_))
        ));

        let forged = grant(
            &GrantAuthority::new("other"),
            &base,
            "a_0000.ph2",
            GrantMode::Read,
            OffsetDateTime::now_utc() + Duration::hours(1),
        );
        assert!(matches!(
            transport.download(&forged, &destination).await,
            Err(CeremonyError::InvalidSignature(_))
        ));

        let missing = grant(
            &authority,
            &base,
            "b_0000.ph2",
            GrantMode::Read,
            OffsetDateTime::now_utc() + Duration::hours(1),
        );
        assert!(matches!(
            transport.download(&missing, &destination).await,
            Err(CeremonyError::TransferFailed { attempts: 1, .. })
        ));
        assert!(!destination.exists());
    }

    #[test]
    fn test_classify_status() {
        let now = OffsetDateTime::now_utc();
        let authority = GrantAuthority::new("secret");
        let base = Url::parse("https://storage.example.org/ceremony/").unwrap();
        let live = grant(&authority, &base, "a.ph2", GrantMode::Read, now + Duration::hours(1));
        let stale = grant(&authority, &base, "a.ph2", GrantMode::Read, now - Duration::hours(1));

        for status in &[
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            assert!(matches!(classify_status(&live, *status, 1, now), Failure::Transient(_)));
        }
        assert!(matches!(
            classify_status(&stale, StatusCode::FORBIDDEN, 1, now),
            Failure::Permanent(CeremonyError::CapabilityExpired(_))
        ));
        assert!(matches!(
            classify_status(&live, StatusCode::FORBIDDEN, 2, now),
            Failure::Permanent(CeremonyError::TransferFailed { attempts: 2, .. })
        ));
        assert!(matches!(
            classify_status(&live, StatusCode::NOT_FOUND, 1, now),
            Failure::Permanent(CeremonyError::TransferFailed { .. })
        ));
    }

    #[test]
    fn test_object_name() {
        let url = Url::parse("https://storage.example.org/c/0001_alice/v1/a_0000.ph2?mode=read").unwrap();
        assert_eq!(object_name(&url), "a_0000.ph2");
    }
}
