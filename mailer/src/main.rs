use std::process::ExitCode;

use mailer::{
    connectivity::Connectivity,
    error::EXIT_CONFIG,
    mailer_config::MailerConfig,
    notify::SmtpNotifier,
    observability,
    run::{self, RunOutcome},
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    if let Err(e) = observability::init_tracing() {
        eprintln!("{e:#}");
        return ExitCode::from(EXIT_CONFIG);
    }

    tracing::info!("Starting toxicity status check");

    let config = match MailerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Could not read the configuration: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };
    tracing::info!("{}", config);

    let mut connectivity = Connectivity::from_config(&config);
    let notifier = SmtpNotifier::new(config.notification.clone());

    match run::check_and_notify(&mut connectivity, &notifier).await {
        Ok(RunOutcome::NoChanges) => {
            tracing::info!("Run finished without changes");
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Notified { changes }) => {
            tracing::info!("Run finished, {} changes notified", changes);
            ExitCode::SUCCESS
        }
        Err(e) => ExitCode::from(run::exit_status(&e)),
    }
}
