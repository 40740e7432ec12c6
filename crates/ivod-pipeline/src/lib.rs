//! IVOD ingestion pipeline
//!
//! This crate drives each record through fetch, parse, dual-transcript
//! resolution, upsert and index alignment:
//! - [`fetcher`] talks to the catalog API and the legacy speech page
//! - [`assembler`] turns raw documents into canonical records
//! - [`batch`] buffers writes into transactional batches
//! - [`workflows`] implements the Full, Incremental, Retry and Fix runs
//! - [`aligner`] keeps the search index eventually consistent
//! - [`backup`] dumps and restores the table as a portable JSON file

pub mod aligner;
pub mod assembler;
pub mod backup;
pub mod batch;
pub mod config;
pub mod fetcher;
pub mod ledger;
pub mod speech;
pub mod workflows;

pub use config::{Config, ConfigError, Environment};
