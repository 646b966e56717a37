//! Beacon API crate - axum control surface for the automation engine.
//!
//! Rule CRUD, dry-run testing, execution log queries, aggregate stats and
//! event ingestion.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
