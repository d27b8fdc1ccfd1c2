use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use minijinja::{context, Environment};

use crate::{
    diff::StatusChange,
    error::{MailerError, MailerResult},
    mailer_config::NotificationSettings,
};

const TEMPLATE_NAME: &str = "notification.html";

/// Delivers one report covering every change found in a run.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, changes: &[StatusChange]) -> MailerResult<()>;
}

pub struct SmtpNotifier {
    settings: NotificationSettings,
}

impl SmtpNotifier {
    pub fn new(settings: NotificationSettings) -> Self {
        Self { settings }
    }

    async fn load_template(&self) -> anyhow::Result<String> {
        let path = &self.settings.template_path;
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Could not read template {}", path.display()))
    }

    fn build_message(&self, template: &str, changes: &[StatusChange]) -> anyhow::Result<Message> {
        let html = render_html(
            template,
            changes,
            &self.settings.link_visor,
            &self.settings.contacto,
        )
        .context("Could not render notification template")?;
        let plain = render_plain(changes, &self.settings.link_visor, &self.settings.contacto);

        let from: Mailbox = self
            .settings
            .from_email
            .parse()
            .with_context(|| format!("Invalid sender {}", self.settings.from_email))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(self.settings.smtp_subject.clone());
        for to in self.settings.recipients() {
            let mailbox: Mailbox = to
                .parse()
                .with_context(|| format!("Invalid recipient {to}"))?;
            builder = builder.to(mailbox);
        }

        let message = builder
            .multipart(MultiPart::alternative_plain_html(plain, html))
            .context("Could not build notification message")?;

        Ok(message)
    }

    async fn deliver(&self, message: Message) -> anyhow::Result<()> {
        let settings = &self.settings;
        let credentials =
            Credentials::new(settings.smtp_username.clone(), settings.smtp_password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_server)
            .with_context(|| format!("Invalid SMTP server {}", settings.smtp_server))?
            .port(settings.smtp_port)
            .credentials(credentials)
            .build();

        transport.send(message).await.with_context(|| {
            format!(
                "Could not submit message to {}:{}",
                settings.smtp_server, settings.smtp_port
            )
        })?;

        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, changes: &[StatusChange]) -> MailerResult<()> {
        tracing::info!("Sending notification for {} status changes", changes.len());

        let template = self
            .load_template()
            .await
            .map_err(MailerError::Notification)?;
        let message = self
            .build_message(&template, changes)
            .map_err(MailerError::Notification)?;
        self.deliver(message)
            .await
            .map_err(MailerError::Notification)?;

        tracing::info!("Notification sent to {}", self.settings.to_email);
        Ok(())
    }
}

/// Renders the HTML report. The template receives `rows`, `link_visor` and
/// `contacto`; values are HTML-escaped.
pub fn render_html(
    template: &str,
    changes: &[StatusChange],
    link_visor: &str,
    contacto: &str,
) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template(TEMPLATE_NAME, template)?;
    env.get_template(TEMPLATE_NAME)?.render(context! {
        rows => changes,
        link_visor => link_visor,
        contacto => contacto,
    })
}

pub fn render_plain(changes: &[StatusChange], link_visor: &str, contacto: &str) -> String {
    let rows = changes
        .iter()
        .map(|change| {
            format!(
                "- {} ({}): {} [causal: {}]",
                change.area_name, change.area_code, change.new_status, change.reason
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Se registraron cambios de estado en las siguientes areas:\n\n{rows}\n\nVisor: {link_visor}\nContacto: {contacto}"
    )
}
