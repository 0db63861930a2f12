//! # Control API
//!
//! Small HTTP surface for operators: backend health, per-credential status,
//! and forcing a rotation or creation.

pub mod error;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use routes::{build_router, ApiState};
pub use server::start_api_server;
