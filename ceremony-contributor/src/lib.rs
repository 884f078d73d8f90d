pub mod cli;
pub mod commands;
pub mod logger;
pub mod transfer;

pub use commands::{Executor, RoundReport};
pub use transfer::Transport;
