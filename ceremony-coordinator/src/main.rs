use ceremony_coordinator::{environment::Environment, logger::initialize_logger, Coordinator, CoordinatorError};
use ceremony_shared::{
    catalog::FamilySelection,
    chain::{ContributionId, ContributorLabel},
    CeremonyError,
};

use anyhow::{Context, Result};
use std::{path::PathBuf, process};
use structopt::{clap::AppSettings, StructOpt};
use tracing::error;

#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab-case")]
enum Command {
    /// Create round zero: phase 1 inputs, constraint systems and initial commitments.
    Init {
        /// The families to initialize, `all` or a comma separated list.
        #[structopt(long, default_value = "all")]
        family: FamilySelection,
    },
    /// Issue the exchange manifest for the next contribution.
    IssueGrants {
        /// The label of the contributor.
        #[structopt(long)]
        contributor: ContributorLabel,
        /// The contribution to build on, or `latest`.
        #[structopt(long, default_value = "latest")]
        predecessor: String,
        #[structopt(long, default_value = "all")]
        family: FamilySelection,
        /// Write the manifest here instead of standard output.
        #[structopt(long, parse(from_os_str))]
        output: Option<PathBuf>,
    },
    /// Verify a stored contribution against round zero.
    Verify {
        contribution_id: ContributionId,
        /// Defaults to the families the contribution holds.
        #[structopt(long)]
        family: Option<FamilySelection>,
    },
    /// Extract, import and deploy the keys of the final contribution.
    Finalize {
        /// Defaults to the latest contribution.
        contribution_id: Option<ContributionId>,
        #[structopt(long, default_value = "all")]
        family: FamilySelection,
    },
    /// List the stored contributions in chain order.
    List,
}

#[derive(StructOpt, Debug)]
#[structopt(
    name = "Ceremony Coordinator",
    setting(AppSettings::ColoredHelp),
    setting(AppSettings::DisableHelpSubcommand),
    setting(AppSettings::SubcommandRequiredElseHelp)
)]
struct Options {
    /// A JSON file overriding the settings of the environment.
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// One of `test`, `development` or `production`.
    #[structopt(long, default_value = "development")]
    environment: String,

    #[structopt(subcommand)]
    command: Command,
}

/// Runs a command, returning `false` when it completed but did not succeed.
fn run(options: Options) -> Result<bool> {
    let environment = Environment::load(&options.environment, options.config.as_deref())
        .with_context(|| format!("Failed to load the {} environment", options.environment))?;
    initialize_logger(&environment);

    match options.command {
        Command::Init { family } => {
            let coordinator = Coordinator::from_environment(environment)?;
            let report = coordinator.initialize(&family)?;
            println!(
                "Initialized {}: {} created, {} already present",
                family, report.created, report.skipped
            );
            Ok(true)
        }
        Command::IssueGrants {
            contributor,
            predecessor,
            family,
            output,
        } => {
            let coordinator = Coordinator::load(environment)?;
            let manifest = coordinator.issue_grants(&contributor, &predecessor, &family)?;
            match output {
                Some(path) => {
                    manifest.store(&path)?;
                    println!(
                        "Issued {} for {} on top of {}: {}",
                        manifest.contribution_id,
                        manifest.contributor,
                        manifest.previous_contribution,
                        path.display()
                    );
                }
                None => println!("{}", manifest.to_json_pretty()?),
            }
            Ok(true)
        }
        Command::Verify {
            contribution_id,
            family,
        } => {
            let coordinator = Coordinator::from_environment(environment)?;
            let report = coordinator.verify(&contribution_id, family.as_ref())?;
            println!("{}", report);
            Ok(report.is_success())
        }
        Command::Finalize { contribution_id, family } => {
            let coordinator = Coordinator::from_environment(environment)?;
            let final_id = match contribution_id {
                Some(id) => id,
                None => coordinator.latest()?,
            };
            let report = coordinator.finalize(&final_id, &family)?;
            println!("{}", report);
            Ok(report.is_success())
        }
        Command::List => {
            let coordinator = Coordinator::load(environment)?;
            for id in coordinator.contributions()? {
                println!("{}", id);
            }
            Ok(true)
        }
    }
}

fn remediation(error: &anyhow::Error) -> Option<&'static str> {
    error
        .chain()
        .find_map(|cause| match cause.downcast_ref::<CoordinatorError>() {
            Some(error) => Some(error.remediation()),
            None => cause.downcast_ref::<CeremonyError>().map(CeremonyError::remediation),
        })
}

fn main() {
    let options = Options::from_args();

    match run(options) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(failure) => {
            error!("{:#}", failure);
            eprintln!("Error: {:#}", failure);
            if let Some(hint) = remediation(&failure) {
                eprintln!("Hint: {}", hint);
            }
            process::exit(1);
        }
    }
}
