pub mod attestation;
pub mod catalog;
pub mod chain;
pub mod errors;
pub mod grants;
pub mod naming;
pub mod prover;
pub mod reliability;
pub mod setup_binary;
pub mod structures;
pub mod utils;
pub mod verification;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use errors::CeremonyError;
