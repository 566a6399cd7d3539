//! Business logic services

pub mod detection;
pub mod identifier;
pub mod importer;
pub mod review;
pub mod similarity;
pub mod staging;

pub use detection::{DetectionOutcome, DuplicateDetector};
pub use importer::{ImportOutcome, Importer};
pub use review::{ReviewCoordinator, ReviewOutcome};
pub use staging::{NewBatch, NewStagedRecord, StagingService};
