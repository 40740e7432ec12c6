//! Core domain types for the IVOD transcript store

mod dates;
mod error;
mod models;

pub use dates::date_range;
pub use error::CrawlerError;
pub use models::*;
