use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "info,hyper=off,reqwest=warn";

/// Logs to standard error, filtered by `RUST_LOG` when it is set.
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize logger: {}", error);
    }
}
