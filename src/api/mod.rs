//! Read-only query surface: REST routes plus the /ws subscription endpoint.

pub mod middleware;
pub mod routes;
pub mod ws;

pub use routes::{create_router, AppState};
