//! Ambient HTTP middleware for the A2A server surface: request tracing and
//! CORS, mirroring the reference service's `api::middleware` layout.

pub mod cors;
pub mod logging;
