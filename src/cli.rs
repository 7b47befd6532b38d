use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand};
use clap_complete::Shell;
use renewal::resource::DATE_FORMAT;

#[derive(Parser)]
#[command(name = "relock")]
#[command(version)]
#[command(about = "Automated credential renewal against a secrets directory", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Renew the credentials of eligible resources
    Renew(RenewArgs),

    /// Manage configuration files
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
#[command(group(ArgGroup::new("scope").required(true)))]
pub struct RenewArgs {
    /// Renew the resources owned by the acting user and shared with nobody
    #[arg(long, group = "scope")]
    pub personal: bool,

    /// Renew the resources shared with this group (repeatable)
    #[arg(short, long = "group", value_name = "NAME", group = "scope")]
    pub groups: Vec<String>,

    /// Only renew resources last updated on or before this date (DD/MM/YYYY)
    #[arg(long, value_name = "DATE", value_parser = parse_date)]
    pub before: Option<NaiveDate>,

    /// Only renew resources last updated on or after this date (DD/MM/YYYY)
    #[arg(long, value_name = "DATE", value_parser = parse_date)]
    pub after: Option<NaiveDate>,

    /// Trim the selection to limit the run (0 renews everything eligible)
    #[arg(short, long, default_value_t = 0)]
    pub limit: usize,

    /// Go through the motions without changing any password
    #[arg(long)]
    pub dry_run: bool,

    /// Mail the report to this address in addition to printing it
    #[arg(long, value_name = "ADDRESS")]
    pub mail_report: Option<String>,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration and file locations
    Show,
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| format!("expected a DD/MM/YYYY date: {}", e))
}
