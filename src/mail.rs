use crate::config::MailConfig;
use anyhow::{Context, Result};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::info;

/// Mail the rendered renewal report through the configured STARTTLS relay.
pub fn send_report(config: &MailConfig, recipient: &str, subject: &str, body: &str) -> Result<()> {
    let from: Mailbox = config
        .sender
        .parse()
        .with_context(|| format!("Invalid sender address [{}]", config.sender))?;
    let to: Mailbox = recipient
        .parse()
        .with_context(|| format!("Invalid recipient address [{}]", recipient))?;

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .context("Could not build the report mail")?;

    let mut builder = SmtpTransport::starttls_relay(&config.server)
        .with_context(|| format!("Could not set up a relay to [{}]", config.server))?
        .port(config.port);
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
    }

    builder
        .build()
        .send(&message)
        .with_context(|| format!("Could not mail the report to [{}]", recipient))?;
    info!("Report mailed to [{}]", recipient);
    Ok(())
}
