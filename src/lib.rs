//! Ingestion, caching and anomaly detection for an environmental sensor feed.
//!
//! The pipeline:
//! - [`parser`] turns the logger's delimited feed into [`models::WeatherRecord`]s
//! - [`fetcher`] retrieves the feed behind a freshness-bounded, single-flight
//!   cache and falls back to the chunked mirror in [`storage`]
//! - [`window`] selects and thins records for a [`models::RangeTag`]
//! - [`anomaly`] flags implausible readings
//!
//! [`pipeline::WeatherPipeline`] ties these together; [`routes`] exposes it
//! over HTTP.

pub mod anomaly;
pub mod battery;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod routes;
pub mod storage;
pub mod window;

pub use config::Config;
pub use error::{FetchError, ParseError, StorageError};
pub use models::{Anomaly, AnomalyKind, FieldValue, RangeTag, Severity, WeatherRecord};
pub use pipeline::WeatherPipeline;
