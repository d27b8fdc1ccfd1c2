use config::{builder::DefaultState, Config, ConfigBuilder};
use serde::Deserialize;
use std::{
    env,
    path::{Path, PathBuf},
};
use url::Url;

use crate::error::{MailerError, MailerResult};

const DEFAULT_SSH_PORT: u16 = 22;
const ENV_PREFIX: &str = "MAILER";
const REDACTED: &str = "********";

/// Flat layout of `config.json`, kept key-for-key compatible with the files
/// already deployed next to the job.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    is_local_db: bool,
    db_host: String,
    db_port: u16,
    db_name: String,
    db_username: String,
    db_password: String,
    #[serde(default)]
    ssh_ip: Option<String>,
    #[serde(default)]
    ssh_port: Option<u16>,
    #[serde(default)]
    ssh_username: Option<String>,
    #[serde(default)]
    ssh_password: Option<String>,
    to_email: String,
    smtp_server: String,
    smtp_port: u16,
    smtp_username: String,
    smtp_password: String,
    smtp_subject: String,
    #[serde(default)]
    smtp_from: Option<String>,
    #[serde(alias = "template_path")]
    output_html: String,
    link_visor: String,
    contacto: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: String,
}

impl DatabaseSettings {
    /// Postgres URL for this database reached at `host:port`, which is the
    /// configured address for direct connections and the local end of the
    /// tunnel otherwise.
    pub fn url_for(&self, host: &str, port: u16) -> MailerResult<String> {
        let mut url = Url::parse("postgres://localhost")
            .map_err(|e| MailerError::Config(format!("Invalid database url: {e}")))?;
        url.set_host(Some(host))
            .map_err(|e| MailerError::Config(format!("Invalid database host {host}: {e}")))?;
        url.set_port(Some(port))
            .map_err(|_| MailerError::Config(format!("Invalid database port {port} for {host}")))?;
        url.set_username(&self.username).map_err(|_| {
            MailerError::Config(format!("Invalid database username {}", self.username))
        })?;
        url.set_password(Some(&self.password))
            .map_err(|_| MailerError::Config("Invalid database password".to_string()))?;
        url.set_path(&format!("/{}", self.name));
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionMode {
    /// The database is reachable from this machine.
    Local,
    /// The database is only reachable through an SSH bastion.
    Tunneled(SshSettings),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSettings {
    pub to_email: String,
    pub from_email: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_subject: String,
    pub template_path: PathBuf,
    pub link_visor: String,
    pub contacto: String,
}

impl NotificationSettings {
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to_email
            .split(',')
            .map(str::trim)
            .filter(|to| !to.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub database: DatabaseSettings,
    pub connection: ConnectionMode,
    pub notification: NotificationSettings,
}

impl MailerConfig {
    /// Directory holding `config.json` and the notification template.
    pub fn app_dir() -> PathBuf {
        env::var("APP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Reads `$MAILER_CONFIG`, or `$APP_DIR/config.json`, with `MAILER_*`
    /// environment overrides on top.
    pub fn load() -> MailerResult<Self> {
        let root = Self::app_dir();
        let path = env::var("MAILER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| root.join("config.json"));

        if !path.is_file() {
            return Err(MailerError::Config(format!(
                "{} is required",
                path.display()
            )));
        }

        Self::from_builder(
            &root,
            Config::builder()
                .add_source(config::File::from(path.as_path()))
                .add_source(config::Environment::with_prefix(ENV_PREFIX)),
        )
    }

    pub fn from_builder(root: &Path, builder: ConfigBuilder<DefaultState>) -> MailerResult<Self> {
        let file: ConfigFile = builder.build()?.try_deserialize()?;
        Self::validate(root, file)
    }

    fn validate(root: &Path, file: ConfigFile) -> MailerResult<Self> {
        let mut missing = vec![];
        let mut require = |name: &'static str, value: &str| {
            if value.trim().is_empty() {
                missing.push(name);
            }
        };

        require("db_host", &file.db_host);
        require("db_name", &file.db_name);
        require("db_username", &file.db_username);
        require("db_password", &file.db_password);
        require("to_email", &file.to_email);
        require("smtp_server", &file.smtp_server);
        require("smtp_username", &file.smtp_username);
        require("smtp_password", &file.smtp_password);
        require("smtp_subject", &file.smtp_subject);
        require("output_html", &file.output_html);

        let connection = if file.is_local_db {
            ConnectionMode::Local
        } else {
            let ssh_ip = file.ssh_ip.unwrap_or_default();
            let ssh_username = file.ssh_username.unwrap_or_default();
            let ssh_password = file.ssh_password.unwrap_or_default();
            require("ssh_ip", &ssh_ip);
            require("ssh_username", &ssh_username);
            require("ssh_password", &ssh_password);
            ConnectionMode::Tunneled(SshSettings {
                host: ssh_ip,
                port: file.ssh_port.unwrap_or(DEFAULT_SSH_PORT),
                username: ssh_username,
                password: ssh_password,
            })
        };

        if !missing.is_empty() {
            return Err(MailerError::Config(format!(
                "Missing or empty configuration values: {}",
                missing.join(", ")
            )));
        }

        let template_path = Path::new(&file.output_html);
        let template_path = if template_path.is_absolute() {
            template_path.to_path_buf()
        } else {
            root.join(template_path)
        };

        let from_email = file
            .smtp_from
            .filter(|from| !from.trim().is_empty())
            .unwrap_or_else(|| file.smtp_username.clone());

        Ok(MailerConfig {
            database: DatabaseSettings {
                host: file.db_host,
                port: file.db_port,
                name: file.db_name,
                username: file.db_username,
                password: file.db_password,
            },
            connection,
            notification: NotificationSettings {
                to_email: file.to_email,
                from_email,
                smtp_server: file.smtp_server,
                smtp_port: file.smtp_port,
                smtp_username: file.smtp_username,
                smtp_password: file.smtp_password,
                smtp_subject: file.smtp_subject,
                template_path,
                link_visor: file.link_visor,
                contacto: file.contacto,
            },
        })
    }
}

impl std::fmt::Display for MailerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let db = &self.database;
        let mail = &self.notification;
        let connection = match &self.connection {
            ConnectionMode::Local => "direct".to_string(),
            ConnectionMode::Tunneled(ssh) => format!(
                "ssh tunnel via {}@{}:{} (password {REDACTED})",
                ssh.username, ssh.host, ssh.port
            ),
        };
        write!(
            f,
            "Mailer Config:\nDatabase: {}@{}:{}/{} (password {REDACTED})\nConnection: {}\nSMTP: {}@{}:{} (password {REDACTED})\nTo: {}\nSubject: {}\nTemplate: {}",
            db.username,
            db.host,
            db.port,
            db.name,
            connection,
            mail.smtp_username,
            mail.smtp_server,
            mail.smtp_port,
            mail.to_email,
            mail.smtp_subject,
            mail.template_path.display(),
        )
    }
}
