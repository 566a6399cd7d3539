//! Database schema and domain models

pub mod init;
pub mod models;

pub use init::{init_database, init_memory};
