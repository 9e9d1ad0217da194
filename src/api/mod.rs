//! HTTP API layer

mod routes;

pub use routes::{create_api_router, ApiState};
