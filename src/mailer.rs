use std::future::Future;
use std::time::Duration;

use lettre::message::MultiPart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::info;

use crate::config::{DeliveryContext, SmtpConfig};
use crate::digest::Digest;
use crate::error::Result;

/// SMTP connection timeout in seconds.
const SMTP_TIMEOUT_SECS: u64 = 30;

/// Assemble the outbound message: configured sender, one To per recipient,
/// and a multipart/alternative body with plain text and HTML parts.
///
/// No network side effects.
pub fn build_message(context: &DeliveryContext, digest: &Digest) -> Result<Message> {
    let mut builder = Message::builder()
        .from(context.config.email.sender.parse()?)
        .subject(digest.subject.clone());
    for recipient in &context.delivery.recipients {
        builder = builder.to(recipient.parse()?);
    }
    let message = builder.multipart(MultiPart::alternative_plain_html(
        digest.text.clone(),
        digest.html.clone(),
    ))?;
    Ok(message)
}

/// Transmits an assembled message. Seam for previewing and tests.
pub trait Sender {
    fn send(
        &self,
        smtp: &SmtpConfig,
        message: &Message,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Real SMTP dispatch: implicit TLS, STARTTLS, or plaintext per
/// configuration, authenticating only when both credentials are present.
///
/// The transport is built, used, and dropped per send; no retries.
pub struct SmtpSender;

impl Sender for SmtpSender {
    async fn send(&self, smtp: &SmtpConfig, message: &Message) -> Result<()> {
        let mut builder = if smtp.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?
        } else if smtp.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
        };
        builder = builder
            .port(smtp.port)
            .timeout(Some(Duration::from_secs(SMTP_TIMEOUT_SECS)));
        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        let transport = builder.build();
        info!("Sending email via {}:{}", smtp.host, smtp.port);
        transport.send(message.clone()).await?;
        Ok(())
    }
}
