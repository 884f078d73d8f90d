pub mod finalization;
pub use finalization::*;

pub mod grants;
pub use grants::*;

pub mod initialization;
pub use initialization::*;

pub mod verification;
pub use verification::*;
