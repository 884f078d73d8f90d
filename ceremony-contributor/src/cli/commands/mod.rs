pub mod contribute;
pub mod verify;
