use crate::environment::Environment;

use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub struct LogGuard;

pub(crate) static LOGGER: OnceCell<LogGuard> = OnceCell::new();

/// Initialize logger with the environment's verbosity, unless `RUST_LOG` says otherwise.
pub fn initialize_logger(environment: &Environment) {
    LOGGER.get_or_init(|| {
        let verbosity = environment.verbosity().to_string().to_lowercase();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity));

        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .finish();

        if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Failed to initialize logger: {}", error);
        }

        LogGuard {}
    });
}
