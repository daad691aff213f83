//! Database models and queries

pub mod busqueda;
pub mod clasificaciones;
pub mod entradas;
pub mod graneles;
pub mod init;
pub mod migrations;
pub mod models;
pub mod pesajes;
pub mod presupuesto;
pub mod salidas;
pub mod schema_sync;
pub mod table_schemas;
pub mod users;

pub use init::*;
pub use migrations::{get_schema_version, run_migrations, CURRENT_SCHEMA_VERSION};
pub use models::*;
pub use schema_sync::*;
pub use table_schemas::*;
