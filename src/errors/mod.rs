//! Error types for the HTTP surface.

pub mod app_error;

pub use app_error::{AppError, AppResult};
