//! Batch conversion of proprietary encrypted audio files.
//!
//! The pipeline: a [`scanner::DirectoryScanner`] (or any caller) supplies
//! candidates, [`catalog::FileCatalog`] dedups and tracks them, and the
//! [`orchestrator::ConversionOrchestrator`] fans out concurrent per-file
//! conversions — staging each input through [`staging::StagingManager`],
//! invoking the external engine through [`engine::EngineClient`], and
//! recording terminal outcomes back into the catalog. Observers consume
//! immutable [`catalog::CatalogSnapshot`]s only.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod orchestrator;
pub mod scanner;
pub mod source;
pub mod staging;
