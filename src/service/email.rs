use async_trait::async_trait;
use lettre::{
    message::{header, Mailbox, Message},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;

use crate::config::{Config, SmtpConfig};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address {address}: {reason}")]
    Address { address: String, reason: String },
    #[error("build message failed: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp send failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[async_trait]
pub trait MailService: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError>;
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn build_reset_password_email_html(reset_url: &str) -> String {
    format!(
        concat!(
            "<div style=\"font-family:ui-sans-serif,system-ui,-apple-system,Segoe UI,Roboto,Helvetica,Arial;line-height:1.5\">",
            "<h2 style=\"margin:0 0 12px\">Reset your password</h2>",
            "<p style=\"margin:0 0 12px\">Click this link within 10 minutes to choose a new password:</p>",
            "<p style=\"margin:0 0 12px\"><a href=\"{url}\">{url}</a></p>",
            "<p style=\"margin:18px 0 0;color:#666;font-size:12px\">If you did not request this, you can ignore this email.</p>",
            "</div>"
        ),
        url = escape_html(reset_url)
    )
}

pub fn build_reset_password_url(ui_link: &str, email: &str, token: &str) -> String {
    let separator = if ui_link.contains('?') { '&' } else { '?' };
    format!(
        "{}{}email={}&token={}",
        ui_link,
        separator,
        urlencoding::encode(email),
        urlencoding::encode(token)
    )
}

pub struct SmtpMailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    redirect_to: Option<String>,
}

impl SmtpMailService {
    pub fn new(smtp: &SmtpConfig, redirect_to: Option<String>) -> Result<Self, MailError> {
        let from = parse_mailbox(&smtp.mail)?;

        // 465 is implicit TLS, 587 upgrades with STARTTLS, anything else
        // (Mailpit and friends) speaks plain SMTP.
        let mut builder = match smtp.port {
            465 => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?,
            587 => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?,
            _ => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host),
        }
        .port(smtp.port)
        .timeout(Some(Duration::from_secs(10)));

        if let Some(password) = &smtp.password {
            builder = builder.credentials(Credentials::new(smtp.mail.clone(), password.clone()));
        }

        tracing::info!(
            host = %smtp.host,
            port = smtp.port,
            service = smtp.service.as_deref().unwrap_or("custom"),
            "smtp mailer configured"
        );
        Ok(Self {
            transport: builder.build(),
            from,
            redirect_to,
        })
    }
}

#[async_trait]
impl MailService for SmtpMailService {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        let recipient = self.redirect_to.as_deref().unwrap_or(&mail.to);
        if recipient != mail.to {
            tracing::debug!(to = %mail.to, redirect = %recipient, "redirecting outgoing mail");
        }

        let msg = Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(recipient)?)
            .subject(mail.subject)
            .header(header::ContentType::TEXT_HTML)
            .body(mail.html)?;

        self.transport.send(msg).await?;
        Ok(())
    }
}

/// Stands in when SMTP is not configured; mail is dropped with a warning.
pub struct DisabledMailService;

#[async_trait]
impl MailService for DisabledMailService {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        tracing::warn!(to = %mail.to, subject = %mail.subject, "smtp is not configured, dropping mail");
        Ok(())
    }
}

pub fn mailer_from_config(config: &Config) -> Result<Arc<dyn MailService>, MailError> {
    let Some(smtp) = &config.smtp else {
        return Ok(Arc::new(DisabledMailService));
    };
    let redirect_to = if config.is_production() {
        None
    } else {
        config.mail_to.clone()
    };
    Ok(Arc::new(SmtpMailService::new(smtp, redirect_to)?))
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|err: lettre::address::AddressError| MailError::Address {
        address: address.to_string(),
        reason: err.to_string(),
    })
}
