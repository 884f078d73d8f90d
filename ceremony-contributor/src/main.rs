use ceremony_contributor::{
    cli::{
        commands::{contribute::ContributeOptions, verify::VerifyOptions},
        Command,
        Options,
    },
    commands::verify_workspace,
    logger::init_logger,
    Executor,
    Transport,
};
use ceremony_shared::{setup_binary::SetupCommand, structures::ExchangeManifest, CeremonyError};

use anyhow::{Context, Result};
use std::{process, sync::Arc};
use structopt::StructOpt;
use tracing::error;

async fn contribute(options: &ContributeOptions) -> Result<bool> {
    let manifest = ExchangeManifest::load(&options.manifest)
        .with_context(|| format!("Failed to read the manifest {}", options.manifest.display()))?;

    let executor = Executor::new(
        Arc::new(SetupCommand::new(&options.setup_binary)),
        Transport::new(options.retry_policy()),
        &options.workdir,
    )
    .with_concurrency(options.concurrency())
    .with_progress(!options.quiet);

    let selection = options.selection(&manifest)?;
    let report = executor.execute_round(&manifest, &selection).await?;

    println!("Contribution {} complete", manifest.contribution_id);
    print!("{}", report.attestation);
    println!("Round log: {}", report.log.display());
    println!("Round log sha256: {}", report.digest);
    println!("Uploaded {} files", report.uploaded.len());
    Ok(true)
}

fn verify(options: &VerifyOptions) -> Result<bool> {
    let setup = SetupCommand::new(&options.setup_binary);
    let report = verify_workspace(&setup, &options.workspace, &options.initial, &options.family)?;
    println!("{}", report);
    Ok(report.is_success())
}

#[tokio::main]
async fn main() {
    let options = Options::from_args();
    init_logger();

    let result = match &options.subcommand {
        Command::Contribute(options) => contribute(options).await,
        Command::Verify(options) => verify(options),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(failure) => {
            error!("{:#}", failure);
            eprintln!("Error: {:#}", failure);
            if let Some(error) = failure.chain().find_map(|cause| cause.downcast_ref::<CeremonyError>()) {
                eprintln!("Hint: {}", error.remediation());
            }
            process::exit(1);
        }
    }
}
