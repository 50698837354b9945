// Postgres storage layer with sqlx

pub mod models;
pub mod repositories;
pub mod workflow_store;

pub use models::*;
pub use repositories::Database;
