//! HTTP request handlers
//!
//! - `api` - Health check endpoint
//! - `connection_details` - Per-attempt LiveKit credentials for session clients

pub mod api;
pub mod connection_details;

pub use connection_details::connection_details;
