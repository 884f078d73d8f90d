use ceremony_shared::catalog::FamilySelection;

use std::path::PathBuf;
use structopt::{clap::AppSettings, StructOpt};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "Verify",
    about = "Verify a local round against local round-zero files",
    rename_all = "kebab-case",
    setting(AppSettings::ColoredHelp),
    setting(AppSettings::DisableHelpSubcommand)
)]
pub struct VerifyOptions {
    /// The candidate round, with or without family subdirectories.
    #[structopt(long, parse(from_os_str))]
    pub workspace: PathBuf,

    /// The round-zero files.
    #[structopt(long, parse(from_os_str))]
    pub initial: PathBuf,

    #[structopt(long, default_value = "all")]
    pub family: FamilySelection,

    #[structopt(long, parse(from_os_str), default_value = "semaphore-mtb-setup")]
    pub setup_binary: PathBuf,
}
