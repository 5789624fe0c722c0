mod error;
mod routes;
mod sse;

pub use error::ApiError;
pub use routes::{router, serve_http};
