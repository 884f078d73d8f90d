use ceremony_shared::{catalog::Family, reliability::RetryPolicy, CeremonyError};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, DurationSeconds};
use std::{
    collections::BTreeMap,
    env,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::Level;
use url::Url;

/// Overrides the grant signing secret of any environment.
pub const SIGNING_SECRET_VARIABLE: &str = "CEREMONY_SIGNING_SECRET";

const DEFAULT_SETUP_BINARY: &str = "semaphore-mtb-setup";
const DEFAULT_PROVER_BINARY: &str = "light-prover";

/// The external programs and inputs the coordinator drives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolchain {
    pub setup_binary: PathBuf,
    pub prover_binary: PathBuf,
    /// The powers-of-tau file each family's phase 1 is converted from.
    pub ptau: BTreeMap<Family, PathBuf>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            setup_binary: PathBuf::from(DEFAULT_SETUP_BINARY),
            prover_binary: PathBuf::from(DEFAULT_PROVER_BINARY),
            ptau: BTreeMap::new(),
        }
    }
}

impl Toolchain {
    /// Resolves both programs, failing with a configuration error naming the first missing one.
    pub fn check(&self) -> Result<(PathBuf, PathBuf), CeremonyError> {
        Ok((
            resolve_program(&self.setup_binary)?,
            resolve_program(&self.prover_binary)?,
        ))
    }

    /// Returns the powers-of-tau file of a family.
    pub fn ptau(&self, family: Family) -> Result<&Path, CeremonyError> {
        match self.ptau.get(&family) {
            Some(path) if path.is_file() => Ok(path),
            Some(path) => Err(CeremonyError::Configuration(format!(
                "powers-of-tau file {} for {} does not exist",
                path.display(),
                family
            ))),
            None => Err(CeremonyError::Configuration(format!(
                "no powers-of-tau file is configured for {}",
                family
            ))),
        }
    }
}

///
/// Returns the path of an executable.
///
/// A bare program name is looked up in `PATH`, anything with a directory
/// component must exist as given.
///
pub fn resolve_program(program: &Path) -> Result<PathBuf, CeremonyError> {
    let missing = || CeremonyError::Configuration(format!("required tool {} was not found", program.display()));

    if program.components().count() > 1 {
        return match program.is_file() {
            true => Ok(program.to_path_buf()),
            false => Err(missing()),
        };
    }

    let search_path = env::var_os("PATH").ok_or_else(missing)?;
    env::split_paths(&search_path)
        .map(|directory| directory.join(program))
        .find(|candidate| candidate.is_file())
        .ok_or_else(missing)
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// The root of the blob store.
    pub base_directory: PathBuf,
    /// Where finalized `.key`/`.vkey` files and their `CHECKSUM` manifest land.
    pub deployment_directory: PathBuf,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub grant_validity: Duration,
    pub retry_policy: RetryPolicy,
    #[serde_as(as = "DisplayFromStr")]
    pub verbosity: Level,
    pub toolchain: Toolchain,
    /// Grants point here instead of at `file://` paths when set.
    pub public_base_url: Option<Url>,
    pub signing_secret: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Environment {
    Test(Settings),
    Development(Settings),
    Production(Settings),
}

impl Environment {
    /// Returns the test preset rooted at `base_directory`.
    pub fn test<P: AsRef<Path>>(base_directory: P) -> Self {
        let base_directory = base_directory.as_ref();
        Environment::Test(Settings {
            base_directory: base_directory.join("storage"),
            deployment_directory: base_directory.join("deploy"),
            grant_validity: Duration::from_secs(60 * 60),
            retry_policy: RetryPolicy::immediate(3),
            verbosity: Level::DEBUG,
            toolchain: Toolchain::default(),
            public_base_url: None,
            signing_secret: "test-signing-secret".to_string(),
        })
    }

    pub fn development() -> Self {
        Environment::Development(Settings {
            base_directory: PathBuf::from("./transcript/development"),
            deployment_directory: PathBuf::from("./transcript/development/deploy"),
            grant_validity: Duration::from_secs(7 * 24 * 60 * 60),
            retry_policy: RetryPolicy::default(),
            verbosity: Level::DEBUG,
            toolchain: Toolchain::default(),
            public_base_url: None,
            signing_secret: "development-signing-secret".to_string(),
        })
    }

    pub fn production() -> Self {
        Environment::Production(Settings {
            base_directory: PathBuf::from("./transcript/production"),
            deployment_directory: PathBuf::from("./transcript/production/deploy"),
            grant_validity: Duration::from_secs(7 * 24 * 60 * 60),
            retry_policy: RetryPolicy::default(),
            verbosity: Level::INFO,
            toolchain: Toolchain::default(),
            public_base_url: None,
            signing_secret: String::new(),
        })
    }

    ///
    /// Returns the named preset with the overrides of an optional JSON
    /// settings file and of the process environment applied.
    ///
    pub fn load(name: &str, config: Option<&Path>) -> Result<Self, CeremonyError> {
        let mut environment = match config {
            Some(path) => name.parse::<Environment>()?.with_overrides(path)?,
            None => name.parse::<Environment>()?,
        };
        if let Some(secret) = env::var_os(SIGNING_SECRET_VARIABLE) {
            environment.settings_mut().signing_secret = secret.to_string_lossy().into_owned();
        }
        environment.validate()?;
        Ok(environment)
    }

    /// Applies the keys of a JSON settings file on top of this environment.
    pub fn with_overrides<P: AsRef<Path>>(mut self, path: P) -> Result<Self, CeremonyError> {
        let overrides: serde_json::Value = serde_json::from_str(&fs_err::read_to_string(path.as_ref())?)?;
        let mut settings = serde_json::to_value(self.settings())?;
        merge(&mut settings, overrides);
        *self.settings_mut() = serde_json::from_value(settings)?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), CeremonyError> {
        if self.signing_secret().is_empty() {
            return Err(CeremonyError::Configuration(format!(
                "no grant signing secret is configured, set {}",
                SIGNING_SECRET_VARIABLE
            )));
        }
        if self.grant_validity() == Duration::from_secs(0) {
            return Err(CeremonyError::Configuration("grant validity must be positive".to_string()));
        }
        Ok(())
    }

    #[inline]
    pub fn settings(&self) -> &Settings {
        match self {
            Environment::Test(settings) | Environment::Development(settings) | Environment::Production(settings) => {
                settings
            }
        }
    }

    #[inline]
    pub fn settings_mut(&mut self) -> &mut Settings {
        match self {
            Environment::Test(settings) | Environment::Development(settings) | Environment::Production(settings) => {
                settings
            }
        }
    }

    #[inline]
    pub fn base_directory(&self) -> &Path {
        &self.settings().base_directory
    }

    #[inline]
    pub fn deployment_directory(&self) -> &Path {
        &self.settings().deployment_directory
    }

    /// Returns the validity of newly issued grants.
    pub fn grant_validity(&self) -> Duration {
        self.settings().grant_validity
    }

    #[inline]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.settings().retry_policy
    }

    #[inline]
    pub fn verbosity(&self) -> Level {
        self.settings().verbosity
    }

    #[inline]
    pub fn toolchain(&self) -> &Toolchain {
        &self.settings().toolchain
    }

    #[inline]
    pub fn public_base_url(&self) -> Option<&Url> {
        self.settings().public_base_url.as_ref()
    }

    #[inline]
    pub fn signing_secret(&self) -> &str {
        &self.settings().signing_secret
    }
}

impl FromStr for Environment {
    type Err = CeremonyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(Environment::test("./transcript/test")),
            "development" => Ok(Environment::development()),
            "production" => Ok(Environment::production()),
            _ => Err(CeremonyError::Configuration(format!(
                "unknown environment {:?}, expected test, development or production",
                s
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Test(_) => "test",
            Environment::Development(_) => "development",
            Environment::Production(_) => "production",
        };
        write!(f, "{}", name)
    }
}

/// Recursively overlays the keys of `overrides` onto `base`.
fn merge(base: &mut serde_json::Value, overrides: serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overrides) => *base = overrides,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;

    #[test]
    fn test_presets() {
        assert!(matches!("test".parse::<Environment>().unwrap(), Environment::Test(_)));
        assert!(matches!(
            "development".parse::<Environment>().unwrap(),
            Environment::Development(_)
        ));
        assert!("staging".parse::<Environment>().is_err());

        let production = Environment::production();
        assert_eq!(production.grant_validity(), Duration::from_secs(604_800));
        assert_eq!(production.retry_policy(), &RetryPolicy::default());
        assert_eq!(production.to_string(), "production");
    }

    #[test]
    #[serial]
    fn test_overrides_from_file() {
        let directory = tempfile::tempdir().unwrap();
        let config = directory.path().join("coordinator.json");
        std::fs::write(
            &config,
            r#"{
                "base_directory": "/srv/ceremony",
                "verbosity": "trace",
                "retry_policy": {"max_attempts": 4},
                "toolchain": {"ptau": {"v1": "/srv/ptau/v1.ptau"}},
                "public_base_url": "https://storage.example.org/ceremony/"
            }"#,
        )
        .unwrap();

        let environment = Environment::load("development", Some(&config)).unwrap();
        assert_eq!(environment.base_directory(), Path::new("/srv/ceremony"));
        assert_eq!(environment.verbosity(), Level::TRACE);
        assert_eq!(environment.retry_policy().max_attempts, 4);
        assert_eq!(environment.retry_policy().max_delay, Duration::from_secs(60));
        assert_eq!(
            environment.toolchain().ptau.get(&Family::V1),
            Some(&PathBuf::from("/srv/ptau/v1.ptau"))
        );
        assert_eq!(environment.toolchain().setup_binary, PathBuf::from(DEFAULT_SETUP_BINARY));
        assert_eq!(
            environment.public_base_url().map(Url::as_str),
            Some("https://storage.example.org/ceremony/")
        );
    }

    #[test]
    #[serial]
    fn test_signing_secret_from_process_environment() {
        env::remove_var(SIGNING_SECRET_VARIABLE);
        assert!(matches!(
            Environment::load("production", None),
            Err(CeremonyError::Configuration(_))
        ));

        env::set_var(SIGNING_SECRET_VARIABLE, "from-the-environment");
        let environment = Environment::load("production", None).unwrap();
        assert_eq!(environment.signing_secret(), "from-the-environment");
        env::remove_var(SIGNING_SECRET_VARIABLE);
    }

    #[test]
    fn test_toolchain_check() {
        let directory = tempfile::tempdir().unwrap();
        let setup = directory.path().join("setup");
        std::fs::write(&setup, b"").unwrap();

        let toolchain = Toolchain {
            setup_binary: setup.clone(),
            prover_binary: directory.path().join("missing-prover"),
            ptau: BTreeMap::new(),
        };
        match toolchain.check() {
            Err(CeremonyError::Configuration(message)) => assert!(message.contains("missing-prover")),
            other => panic!("expected a configuration error, found {:?}", other),
        }
        assert!(resolve_program(&setup).is_ok());
        assert!(resolve_program(Path::new("surely-not-an-installed-program-name")).is_err());
        assert!(toolchain.ptau(Family::Batch).is_err());
    }
}
