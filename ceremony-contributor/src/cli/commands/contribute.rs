use crate::commands::DEFAULT_TRANSFER_CONCURRENCY;
use ceremony_shared::{
    catalog::FamilySelection,
    reliability::RetryPolicy,
    structures::ExchangeManifest,
    CeremonyError,
};

use std::path::PathBuf;
use structopt::{clap::AppSettings, StructOpt};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "Contribute",
    about = "Apply a contribution to every circuit of an exchange manifest",
    rename_all = "kebab-case",
    setting(AppSettings::ColoredHelp),
    setting(AppSettings::DisableHelpSubcommand)
)]
pub struct ContributeOptions {
    /// The exchange manifest issued by the coordinator.
    #[structopt(long, parse(from_os_str))]
    pub manifest: PathBuf,

    /// Contribute to these families only, `all` or a comma separated list.
    /// Defaults to every family the manifest carries.
    #[structopt(long)]
    pub family: Option<FamilySelection>,

    /// Holds downloads, outputs and the round log. Delete it before rerunning a failed round.
    #[structopt(long, parse(from_os_str), default_value = "ceremony-workdir")]
    pub workdir: PathBuf,

    #[structopt(long, parse(from_os_str), default_value = "semaphore-mtb-setup")]
    pub setup_binary: PathBuf,

    /// The number of attempts per transfer.
    #[structopt(long, default_value = "10")]
    pub max_attempts: u32,

    /// The number of concurrent downloads within a family.
    #[structopt(long, default_value = "4")]
    pub transfer_concurrency: usize,

    /// Hide the progress bar.
    #[structopt(long)]
    pub quiet: bool,
}

impl ContributeOptions {
    /// Returns the requested families, or the families of `manifest` when none were requested.
    pub fn selection(&self, manifest: &ExchangeManifest) -> Result<FamilySelection, CeremonyError> {
        match &self.family {
            Some(selection) => Ok(selection.clone()),
            None => manifest.selection(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        }
    }

    pub fn concurrency(&self) -> usize {
        match self.transfer_concurrency {
            0 => DEFAULT_TRANSFER_CONCURRENCY,
            concurrency => concurrency,
        }
    }
}
