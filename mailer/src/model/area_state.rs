use indoc::indoc;

use crate::db_core::prelude::*;

const CREATE_SCHEMA_SQL: &str = "CREATE SCHEMA IF NOT EXISTS notificaciones";

const CREATE_TABLE_SQL: &str = indoc! {r#"
    CREATE TABLE IF NOT EXISTS notificaciones.estados (
        id serial PRIMARY KEY,
        codigoarea BIGINT,
        ultimo_estado VARCHAR(80)
    )
"#};

/// Last status recorded for an area, as stored in `notificaciones.estados`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaState {
    pub area_code: i64,
    pub last_status: String,
}

pub struct AreaStateCtrl;

impl AreaStateCtrl {
    pub async fn ensure_schema(conn: &DatabaseConnection) -> Result<(), DbErr> {
        conn.execute_unprepared(CREATE_SCHEMA_SQL).await?;
        conn.execute_unprepared(CREATE_TABLE_SQL).await?;
        Ok(())
    }

    pub async fn find_by_area_code(
        conn: &DatabaseConnection,
        area_code: i64,
    ) -> Result<Option<AreaState>, DbErr> {
        let row = Estados::find()
            .filter(estados::Column::Codigoarea.eq(area_code))
            .order_by_asc(estados::Column::Id)
            .one(conn)
            .await?;

        Ok(row.map(|row| AreaState {
            area_code,
            last_status: row.ultimo_estado.unwrap_or_default(),
        }))
    }

    /// Each write is its own statement outside of any transaction, so it is
    /// committed as soon as it returns.
    pub async fn insert(
        conn: &DatabaseConnection,
        area_code: i64,
        status: &str,
    ) -> Result<(), DbErr> {
        let active_model = estados::ActiveModel {
            codigoarea: Set(Some(area_code)),
            ultimo_estado: Set(Some(status.to_string())),
            ..Default::default()
        };

        Estados::insert(active_model)
            .exec_without_returning(conn)
            .await?;

        Ok(())
    }

    pub async fn update_status(
        conn: &DatabaseConnection,
        area_code: i64,
        status: &str,
    ) -> Result<(), DbErr> {
        let result = Estados::update_many()
            .col_expr(
                estados::Column::UltimoEstado,
                Expr::value(status.to_string()),
            )
            .filter(estados::Column::Codigoarea.eq(area_code))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(DbErr::RecordNotUpdated);
        }

        Ok(())
    }
}
