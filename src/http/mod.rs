//! HTTP boundary: middleware and server.

mod middleware;
mod server;

pub use middleware::{
    admission_middleware, rate_limit_exceeded_response, ErrorBody, RATE_LIMIT_EXCEEDED_MESSAGE,
};
pub use server::{router, with_admission, HealthResponse, HttpServer, SystemInfo};
