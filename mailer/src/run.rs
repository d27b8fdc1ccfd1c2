use derive_more::derive::Display;

use crate::{
    connectivity::{with_connection, ConnectionProvider},
    diff::{diff_and_persist, DiffReport},
    error::{MailerError, MailerResult},
    notify::Notifier,
    store::AreaStateStore,
};

/// Stages of a run, in the order they execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    #[display("connect")]
    Connect,
    #[display("ensure_schema")]
    EnsureSchema,
    #[display("read_areas")]
    ReadAreas,
    #[display("diff_and_persist")]
    DiffAndPersist,
    #[display("notify")]
    Notify,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    NoChanges,
    Notified { changes: usize },
}

fn in_stage<T>(stage: Stage, result: MailerResult<T>) -> MailerResult<T> {
    if let Err(e) = &result {
        tracing::error!(%stage, "Run failed: {}", e);
    }
    result
}

/// One scheduled run: diff the area snapshot against the recorded states and
/// mail the changes, if any.
///
/// The connection is released before the notification is sent, and a run
/// sends at most one notification.
pub async fn check_and_notify<P, N>(provider: &mut P, notifier: &N) -> MailerResult<RunOutcome>
where
    P: ConnectionProvider,
    P::Connection: AreaStateStore,
    N: Notifier + ?Sized,
{
    tracing::debug!(stage = %Stage::Connect, "Connecting");
    let report = with_connection(provider, |store| {
        Box::pin(async move {
            in_stage(Stage::EnsureSchema, store.ensure_schema().await)?;
            let areas = in_stage(Stage::ReadAreas, store.read_monitored_areas().await)?;
            in_stage(
                Stage::DiffAndPersist,
                diff_and_persist(store, areas).await,
            )
        })
    })
    .await?;

    log_report(&report);

    if report.changes.is_empty() {
        tracing::info!("No status changes in any area");
        return Ok(RunOutcome::NoChanges);
    }

    in_stage(Stage::Notify, notifier.notify(&report.changes).await)?;

    Ok(RunOutcome::Notified {
        changes: report.changes.len(),
    })
}

/// Creates the state schema and table without looking at any area.
pub async fn init_schema<P>(provider: &mut P) -> MailerResult<()>
where
    P: ConnectionProvider,
    P::Connection: AreaStateStore,
{
    with_connection(provider, |store| {
        Box::pin(async move { in_stage(Stage::EnsureSchema, store.ensure_schema().await) })
    })
    .await
}

/// Process exit status for a failed run. The failure itself is already
/// logged with its stage, so only the status is reported here.
pub fn exit_status(error: &MailerError) -> u8 {
    let status = error.exit_code();
    tracing::error!("Exiting with status {}", status);
    status
}

fn log_report(report: &DiffReport) {
    tracing::info!(
        "Finished looking for status changes: {} changed, {} unchanged, {} first seen, {} duplicates skipped",
        report.changes.len(),
        report.unchanged,
        report.seeded,
        report.skipped_duplicates
    );
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use crate::testing::{area, CountingProvider, MemoryStateStore, RecordingNotifier};

    use super::*;

    #[tokio::test]
    async fn first_run_seeds_and_stays_quiet() {
        let store = MemoryStateStore::with_areas(vec![
            area(1, "abierto", None),
            area(2, "alerta", None),
        ]);
        let mut provider = CountingProvider::new(store.clone());
        let notifier = RecordingNotifier::default();

        let outcome = check_and_notify(&mut provider, &notifier)
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::NoChanges);
        assert!(store.schema_ready());
        assert_eq!(store.rows().len(), 2);
        assert!(notifier.deliveries().is_empty());
        assert_eq!(provider.released, 1);
    }

    #[tokio::test]
    async fn sends_one_notification_with_every_change() {
        let store = MemoryStateStore::with_areas(vec![
            area(1, "alerta", None),
            area(2, "abierto", None),
            area(3, "prohibido", Some("Toxina paralizante")),
        ]);
        store.seed_state(1, "abierto");
        store.seed_state(2, "abierto");
        store.seed_state(3, "alerta");
        let mut provider = CountingProvider::new(store.clone());
        let notifier = RecordingNotifier::default();

        let outcome = check_and_notify(&mut provider, &notifier)
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Notified { changes: 2 });
        let deliveries = notifier.deliveries();
        assert_eq!(deliveries.len(), 1);
        let codes = deliveries[0]
            .iter()
            .map(|change| change.area_code)
            .collect::<Vec<_>>();
        assert_eq!(codes, vec![1, 3]);
        assert_eq!(deliveries[0][1].reason, "Toxina paralizante");
    }

    #[tokio::test]
    async fn rerun_without_changes_does_not_notify() {
        let store = MemoryStateStore::with_areas(vec![area(5, "prohibido", None)]);
        store.seed_state(5, "alerta");
        let notifier = RecordingNotifier::default();

        let mut provider = CountingProvider::new(store.clone());
        let first = check_and_notify(&mut provider, &notifier)
            .await
            .unwrap();
        let second = check_and_notify(&mut provider, &notifier)
            .await
            .unwrap();

        assert_eq!(first, RunOutcome::Notified { changes: 1 });
        assert_eq!(second, RunOutcome::NoChanges);
        assert_eq!(notifier.deliveries().len(), 1);
        assert_eq!((provider.acquired, provider.released), (2, 2));
    }

    #[tokio::test]
    async fn failed_write_releases_once_and_skips_notification() {
        let store = MemoryStateStore::with_areas(vec![
            area(1, "alerta", None),
            area(2, "alerta", None),
        ]);
        store.seed_state(1, "abierto");
        store.seed_state(2, "abierto");
        store.fail_updates_for(2);
        let mut provider = CountingProvider::new(store.clone());
        let notifier = RecordingNotifier::default();

        let err = check_and_notify(&mut provider, &notifier)
            .await
            .unwrap_err();

        assert!(matches!(err, MailerError::Query(_)));
        assert_eq!(err.exit_code(), 2);
        assert_eq!((provider.acquired, provider.released), (1, 1));
        assert!(notifier.deliveries().is_empty());
        assert_eq!(store.state_of(1), Some("alerta".to_string()));
    }

    #[tokio::test]
    async fn connection_failure_is_fatal() {
        let mut provider = CountingProvider::refusing();
        let notifier = RecordingNotifier::default();

        let err = check_and_notify(&mut provider, &notifier)
            .await
            .unwrap_err();

        assert!(matches!(err, MailerError::Connectivity(_)));
        assert_eq!(provider.released, 0);
        assert!(notifier.deliveries().is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_fails_the_run_after_persisting() {
        let store = MemoryStateStore::with_areas(vec![area(9, "prohibido", None)]);
        store.seed_state(9, "abierto");
        let mut provider = CountingProvider::new(store.clone());
        let notifier = RecordingNotifier::failing();

        let err = check_and_notify(&mut provider, &notifier)
            .await
            .unwrap_err();

        assert!(matches!(err, MailerError::Notification(_)));
        assert_eq!(notifier.deliveries().len(), 1);
        assert_eq!(store.state_of(9), Some("prohibido".to_string()));
        assert_eq!(provider.released, 1);
    }

    #[tokio::test]
    async fn init_only_creates_the_schema() {
        let store = MemoryStateStore::with_areas(vec![area(1, "alerta", None)]);
        let mut provider = CountingProvider::new(store.clone());

        init_schema(&mut provider).await.unwrap();

        assert!(store.schema_ready());
        assert!(store.rows().is_empty());
        assert_eq!(provider.released, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn stage_failure_is_logged_once() {
        let store = MemoryStateStore::with_areas(vec![area(4, "prohibido", None)]);
        store.seed_state(4, "abierto");
        store.fail_updates_for(4);
        let mut provider = CountingProvider::new(store);
        let notifier = RecordingNotifier::default();

        let err = check_and_notify(&mut provider, &notifier)
            .await
            .unwrap_err();

        assert_eq!(exit_status(&err), 2);
        assert!(logs_contain("stage=diff_and_persist"));
        assert!(logs_contain("Exiting with status 2"));
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|line| line.contains("Run failed")).count() {
                1 => Ok(()),
                n => Err(format!("expected one failure line, found {n}")),
            }
        });
    }

    #[test]
    fn stages_display_like_the_state_machine() {
        assert_eq!(Stage::DiffAndPersist.to_string(), "diff_and_persist");
        assert_eq!(Stage::Connect.to_string(), "connect");
    }
}
