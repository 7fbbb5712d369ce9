//! REST API module
//!
//! This module provides the HTTP server and REST API endpoints including:
//! - API routing and request handling
//! - Rate limiting, security headers and request tracing
//! - Request/response models with validation

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use middleware::{trace_id_middleware, TraceId, TRACE_ID_HEADER};
pub use server::{build_router, ApiServer};
