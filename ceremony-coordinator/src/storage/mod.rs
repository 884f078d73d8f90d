mod disk;
pub use disk::*;

#[allow(clippy::module_inception)]
mod storage;
pub use storage::*;
