pub mod prelude {
    pub use entity::{estados, prelude::*};
    pub use sea_orm::{
        entity::*, query::*, sea_query::Expr, ConnectionTrait, DatabaseConnection, DbBackend,
        DbErr, FromQueryResult, Statement,
    };
}
