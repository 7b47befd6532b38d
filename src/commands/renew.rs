use crate::Context;
use crate::cli::RenewArgs;
use crate::config::Config;
use crate::mail;
use anyhow::{Context as _, Result, bail};
use log::{error, warn};
use renewal::connector::Registry;
use renewal::directory::http::HttpDirectory;
use renewal::keyring::gpg::GpgKeyring;
use renewal::{Orchestrator, RenewOptions, Scope};
use std::sync::atomic::Ordering;

/// Run a renewal pass and deliver the report.
pub fn run(ctx: &Context, args: RenewArgs) -> Result<()> {
    let config = Config::load()?;
    let keyring_dir = config.ensure_keyring_layout()?;

    let mut registry = Registry::builtin();
    for (alias, target) in &config.connectors {
        registry.alias(alias.clone(), target)?;
    }

    let options = RenewOptions {
        scope: if args.personal {
            Scope::Personal
        } else {
            Scope::Groups(args.groups.clone())
        },
        before: args.before,
        after: args.after,
        limit: args.limit,
        dry_run: args.dry_run,
        verify_cert: config.server.verify_cert,
    };

    let mut keyring = GpgKeyring::new(&keyring_dir);
    // The directory client gets its own handle on the same gpg home for
    // the login ceremony.
    let mut directory = HttpDirectory::new(
        &config.server.uri,
        &config.server.fingerprint,
        &config.user.fingerprint,
        config.server.verify_cert,
        Box::new(GpgKeyring::new(&keyring_dir)),
    );

    let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
    let cancel = orchestrator.cancel_flag();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, finishing the current resource ...");
        cancel.store(true, Ordering::SeqCst);
    })
    .context("Could not install the interrupt handler")?;

    let stats = orchestrator.run(&options)?;
    let report = stats.render();

    if !ctx.quiet {
        println!("{}", report);
    }

    if let Some(recipient) = &args.mail_report {
        match &config.mail {
            Some(mail_config) => {
                // A mail failure must not mask the run outcome.
                if let Err(e) = mail::send_report(
                    mail_config,
                    recipient,
                    "[relock] Credential renewal report",
                    &report,
                ) {
                    error!("Could not mail the report: {:#}", e);
                }
            }
            None => warn!("--mail-report given but the config has no [mail] section"),
        }
    }

    if stats.has_errors() {
        bail!(
            "{} resource(s) could not be rolled back and need manual intervention",
            stats.errors.len()
        );
    }
    Ok(())
}
