pub mod commands;

use structopt::{clap::AppSettings, StructOpt};

#[derive(StructOpt, Debug)]
pub enum Command {
    Contribute(commands::contribute::ContributeOptions),
    Verify(commands::verify::VerifyOptions),
}

#[derive(StructOpt, Debug)]
#[structopt(
    name = "Ceremony Contributor",
    setting(AppSettings::ColoredHelp),
    setting(AppSettings::DisableHelpSubcommand),
    setting(AppSettings::SubcommandRequiredElseHelp)
)]
pub struct Options {
    #[structopt(subcommand)]
    pub subcommand: Command,
}
