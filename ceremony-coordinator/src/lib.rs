pub mod commands;
pub mod coordinator;
pub mod environment;
pub mod errors;
pub mod logger;
pub mod storage;

pub use commands::{FinalizeReport, InitializationReport, CHECKSUM_FILE, LATEST_CONTRIBUTION};
pub use coordinator::*;
pub use errors::CoordinatorError;
pub use storage::Storage;
