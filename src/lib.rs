// Promotion engine service
// Multi-tenant promotion evaluation and application over a pluggable store.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod persistence;
pub mod promotions;
pub mod routes;

pub use config::AppConfig;
pub use routes::{create_router, ApiDoc, AppState};
