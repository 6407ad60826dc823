//! REST and SSE surface.

pub mod routes;

pub use routes::{create_router, AppState};
