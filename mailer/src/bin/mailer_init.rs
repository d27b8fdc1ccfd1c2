use std::process::ExitCode;

use mailer::{
    connectivity::Connectivity, error::EXIT_CONFIG, mailer_config::MailerConfig, observability,
    run,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    if let Err(e) = observability::init_tracing() {
        eprintln!("{e:#}");
        return ExitCode::from(EXIT_CONFIG);
    }

    tracing::info!("Preparing the notification state table");

    let config = match MailerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Could not read the configuration: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    let mut connectivity = Connectivity::from_config(&config);
    match run::init_schema(&mut connectivity).await {
        Ok(()) => {
            tracing::info!("Schema 'notificaciones' is ready");
            ExitCode::SUCCESS
        }
        Err(e) => ExitCode::from(run::exit_status(&e)),
    }
}
