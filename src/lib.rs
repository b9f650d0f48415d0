// Social backend - cache-coherent repositories, concurrent fetches and
// notification fan-out over a document store

// Infrastructure - store, cache, broker and their seams
pub mod infrastructure;

// Domain entities
pub mod models;

// Core components
pub mod notifications;
pub mod orchestrator;
pub mod repository;

// Operations and HTTP surface
pub mod http;
pub mod services;

// Common utilities
pub mod app_state;
pub mod config;
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
