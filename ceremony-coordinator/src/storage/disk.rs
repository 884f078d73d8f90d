use crate::{
    environment::Environment,
    storage::{Locator, Storage},
    CoordinatorError,
};

use ceremony_shared::{
    chain::ContributionId,
    grants::GrantAuthority,
    structures::{GrantMode, TransferGrant},
    utils::{copy_file, create_parent_directory},
    CeremonyError,
};

use std::{io, path::PathBuf};
use time::OffsetDateTime;
use tracing::{trace, warn};
use url::Url;

/// A blob store kept in a local directory.
#[derive(Debug)]
pub struct Disk {
    base_directory: PathBuf,
    base_url: Url,
    authority: GrantAuthority,
}

impl Disk {
    /// Loads a new instance of `Disk`, creating the base directory if needed.
    pub fn load(environment: &Environment) -> Result<Self, CoordinatorError> {
        let base_directory = environment.base_directory();
        if !base_directory.exists() {
            fs_err::create_dir_all(base_directory)?;
        }
        let base_directory = fs_err::canonicalize(base_directory)?;

        let base_url = match environment.public_base_url() {
            Some(url) => url.clone(),
            None => Url::from_directory_path(&base_directory).map_err(|_| {
                CeremonyError::Configuration(format!(
                    "{} cannot be expressed as a file URL",
                    base_directory.display()
                ))
            })?,
        };

        Ok(Self {
            base_directory,
            base_url,
            authority: GrantAuthority::new(environment.signing_secret()),
        })
    }

    /// Returns the URL grants are issued under.
    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[inline]
    pub fn authority(&self) -> &GrantAuthority {
        &self.authority
    }
}

impl Storage for Disk {
    fn to_path(&self, locator: &Locator) -> PathBuf {
        locator
            .relative_path()
            .split('/')
            .fold(self.base_directory.clone(), |path, component| path.join(component))
    }

    fn exists(&self, locator: &Locator) -> bool {
        self.to_path(locator).exists()
    }

    fn list(&self, locator: &Locator) -> Result<Vec<String>, CoordinatorError> {
        let directory = self.to_path(locator);
        if !directory.is_dir() {
            return Ok(vec![]);
        }

        let mut files = Vec::new();
        for entry in fs_err::read_dir(&directory)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        files.sort();
        Ok(files)
    }

    fn read(&self, locator: &Locator) -> Result<Vec<u8>, CoordinatorError> {
        match fs_err::read(self.to_path(locator)) {
            Ok(contents) => Ok(contents),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                Err(CoordinatorError::StorageLocatorMissing(locator.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn write(&self, locator: &Locator, contents: &[u8]) -> Result<(), CoordinatorError> {
        let path = self.to_path(locator);
        create_parent_directory(&path)?;
        fs_err::write(&path, contents)?;
        trace!("Wrote {} bytes to {}", contents.len(), locator);
        Ok(())
    }

    fn copy(&self, source: &Locator, destination: &Locator) -> Result<(), CoordinatorError> {
        if !self.exists(source) {
            return Err(CoordinatorError::StorageLocatorMissing(source.to_string()));
        }
        copy_file(self.to_path(source), self.to_path(destination))?;
        Ok(())
    }

    fn remove(&self, locator: &Locator) -> Result<(), CoordinatorError> {
        let path = self.to_path(locator);
        match path.is_dir() {
            true => fs_err::remove_dir_all(&path)?,
            false if path.exists() => fs_err::remove_file(&path)?,
            false => return Err(CoordinatorError::StorageLocatorMissing(locator.to_string())),
        }
        Ok(())
    }

    fn grant(
        &self,
        locator: &Locator,
        mode: GrantMode,
        expires_at: OffsetDateTime,
    ) -> Result<TransferGrant, CoordinatorError> {
        Ok(self
            .authority
            .sign(&self.base_url, &locator.relative_path(), mode, expires_at)?)
    }

    fn contributions(&self) -> Result<Vec<ContributionId>, CoordinatorError> {
        let root = self.base_directory.join(Locator::contributions_root());
        if !root.is_dir() {
            return Ok(vec![]);
        }

        let mut contributions = Vec::new();
        for entry in fs_err::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match name.parse::<ContributionId>() {
                Ok(id) => contributions.push(id),
                Err(_) => warn!("Ignoring {} in the contributions directory", name),
            }
        }
        contributions.sort();
        Ok(contributions)
    }
}
