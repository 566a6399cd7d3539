//! HTTP API handlers for qbank-staging

pub mod batches;
pub mod duplicates;
pub mod health;

pub use batches::staging_routes;
pub use duplicates::duplicate_routes;
pub use health::health_routes;
