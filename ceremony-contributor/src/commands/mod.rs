pub mod contribute;
pub use contribute::*;

pub mod verify;
pub use verify::*;
