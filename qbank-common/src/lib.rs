//! # QBank Common Library
//!
//! Shared code for the QBank staging pipeline:
//! - Database schema and pool initialization
//! - Domain models and status enums
//! - Configuration loading
//! - Common error types

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
