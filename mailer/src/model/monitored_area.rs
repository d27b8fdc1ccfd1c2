use indoc::indoc;

use crate::db_core::prelude::*;

/// Columns are cast so the reference table may use INTEGER/VARCHAR or
/// BIGINT/TEXT without changing how rows decode.
const SELECT_AREAS_SQL: &str = indoc! {r#"
    SELECT codigoarea::bigint AS area_code,
           COALESCE(nombrearea::text, '') AS area_name,
           COALESCE(accion::text, '') AS current_status,
           causal::text AS status_reason
    FROM capas_estaticas.areas_contingencia
"#};

/// One row of `capas_estaticas.areas_contingencia`.
#[derive(Debug, Clone, PartialEq, Eq, FromQueryResult)]
pub struct MonitoredArea {
    pub area_code: i64,
    pub area_name: String,
    pub current_status: String,
    pub status_reason: Option<String>,
}

pub struct MonitoredAreaCtrl;

impl MonitoredAreaCtrl {
    pub async fn all(conn: &DatabaseConnection) -> Result<Vec<MonitoredArea>, DbErr> {
        MonitoredArea::find_by_statement(Statement::from_string(
            DbBackend::Postgres,
            SELECT_AREAS_SQL,
        ))
        .all(conn)
        .await
    }
}
