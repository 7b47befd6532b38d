use crate::config::{self, Config};
use anyhow::Result;

/// Show config file locations and the effective settings.
pub fn show() -> Result<()> {
    let dir = config::config_dir()?;
    println!("Config directory : {}", dir.display());
    println!("Config file      : {}", dir.join("config.toml").display());

    match Config::load() {
        Ok(config) => {
            println!("Server URI       : {}", config.server.uri);
            println!("Server key       : {}", config.server.fingerprint);
            println!("User key         : {}", config.user.fingerprint);
            println!("Verify TLS       : {}", config.server.verify_cert);
            println!("Keyring          : {}", config.keyring_dir()?.display());
            if !config.connectors.is_empty() {
                println!("Connector aliases:");
                let mut aliases: Vec<_> = config.connectors.iter().collect();
                aliases.sort();
                for (alias, target) in aliases {
                    println!("  {} -> {}", alias, target);
                }
            }
            if let Some(mail) = &config.mail {
                println!("Mail relay       : {}:{}", mail.server, mail.port);
                println!("Mail sender      : {}", mail.sender);
            }
        }
        Err(e) => println!("Config not loaded: {:#}", e),
    }
    Ok(())
}
