mod cli;
mod commands;
mod config;
mod mail;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands, ConfigCommand};
use std::io;

/// Global context for the application
pub struct Context {
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context { quiet: cli.quiet };

    match cli.command {
        Commands::Renew(args) => commands::renew::run(&ctx, args),
        Commands::Config(cmd) => match cmd {
            ConfigCommand::Show => commands::config::show(),
        },
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "relock", &mut io::stdout());
            Ok(())
        }
    }
}
