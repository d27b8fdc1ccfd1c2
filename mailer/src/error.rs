use sea_orm::DbErr;

pub type MailerResult<T> = Result<T, MailerError>;

/// Process exit status for a configuration that could not be read or validated.
pub const EXIT_CONFIG: u8 = 1;
/// Process exit status for every other failed run.
pub const EXIT_FAILURE: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum MailerError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Connectivity error: {0:#}")]
    Connectivity(anyhow::Error),
    #[error("Query error: {0}")]
    Query(#[from] DbErr),
    #[error("Notification error: {0:#}")]
    Notification(anyhow::Error),
    #[error("Run cancelled by {0}")]
    Cancelled(&'static str),
}

impl MailerError {
    pub fn exit_code(&self) -> u8 {
        match self {
            MailerError::Config(_) => EXIT_CONFIG,
            MailerError::Connectivity(_)
            | MailerError::Query(_)
            | MailerError::Notification(_)
            | MailerError::Cancelled(_) => EXIT_FAILURE,
        }
    }
}

impl From<config::ConfigError> for MailerError {
    fn from(error: config::ConfigError) -> Self {
        MailerError::Config(error.to_string())
    }
}
