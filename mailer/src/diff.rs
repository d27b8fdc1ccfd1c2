use std::collections::HashSet;

use serde::Serialize;

use crate::{error::MailerResult, model::monitored_area::MonitoredArea, store::AreaStateStore};

/// Reason shown for a change whose reference row has no `causal`.
pub const MISSING_REASON: &str = "-";

/// An area whose status moved away from the last recorded one.
///
/// Serialized with the field names the notification templates use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub area_name: String,
    pub area_code: i64,
    #[serde(rename = "value")]
    pub new_status: String,
    #[serde(rename = "causal")]
    pub reason: String,
}

impl StatusChange {
    fn from_area(area: MonitoredArea) -> Self {
        Self {
            area_name: area.area_name,
            area_code: area.area_code,
            new_status: area.current_status,
            reason: area
                .status_reason
                .unwrap_or_else(|| MISSING_REASON.to_string()),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DiffReport {
    /// Ordered by area code.
    pub changes: Vec<StatusChange>,
    /// Areas seen for the first time. Their status is stored but not reported.
    pub seeded: usize,
    pub unchanged: usize,
    pub skipped_duplicates: usize,
}

/// Compares every monitored area with its recorded status, persisting the
/// new status per area as it goes.
///
/// Areas are visited in ascending area code order. A code repeated in the
/// snapshot is only processed the first time it appears.
pub async fn diff_and_persist<S>(
    store: &S,
    mut areas: Vec<MonitoredArea>,
) -> MailerResult<DiffReport>
where
    S: AreaStateStore + ?Sized,
{
    areas.sort_by_key(|area| area.area_code);

    let mut report = DiffReport::default();
    let mut visited = HashSet::with_capacity(areas.len());

    for area in areas {
        if !visited.insert(area.area_code) {
            tracing::warn!(
                "Area {} appears more than once in the snapshot, ignoring status {:?}",
                area.area_code,
                area.current_status
            );
            report.skipped_duplicates += 1;
            continue;
        }

        match store.read_last_state(area.area_code).await? {
            None => {
                tracing::debug!(
                    "First sighting of area {} with status {:?}",
                    area.area_code,
                    area.current_status
                );
                store
                    .insert_initial_state(area.area_code, &area.current_status)
                    .await?;
                report.seeded += 1;
            }
            Some(state) if state.last_status != area.current_status => {
                tracing::info!(
                    "Area {} ({}) changed from {:?} to {:?}",
                    area.area_code,
                    area.area_name,
                    state.last_status,
                    area.current_status
                );
                store
                    .update_state(area.area_code, &area.current_status)
                    .await?;
                report.changes.push(StatusChange::from_area(area));
            }
            Some(_) => report.unchanged += 1,
        }
    }

    Ok(report)
}
