//! # tabwatch - tabular anomaly reports
//!
//! tabwatch takes an uploaded table (CSV, XLSX or XLS), cleans it, flags
//! statistically unusual rows with an isolation forest and produces a run
//! summary plus chart data describing the result.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tabwatch::analyser::logic::AnalysisPipeline;
//! use tabwatch::artifacts::MemoryArtifactStore;
//! use tabwatch::config::PipelineConfig;
//!
//! # fn example() -> tabwatch::error::Result<()> {
//! let pipeline = AnalysisPipeline::new(
//!     PipelineConfig::default(),
//!     Arc::new(MemoryArtifactStore::new()),
//!     Arc::new(MemoryArtifactStore::new()),
//! );
//!
//! let bytes = std::fs::read("sales.csv")?;
//! let response = pipeline.run("sales.csv", &bytes)?;
//! println!(
//!     "{} of {} rows flagged ({}%)",
//!     response.insights.total_anomalies,
//!     response.insights.total_records,
//!     response.insights.anomaly_percentage,
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Modules
//!
//! - [`analyser`]: the run stages
//!   - [`analyser::logic::io`]: loading uploads into a [`Dataset`](analyser::logic::Dataset)
//!   - [`analyser::logic::cleaning`]: deduplication, timestamp coercion, scaling
//!   - [`analyser::logic::ml`]: isolation forest outlier detection
//!   - [`analyser::logic::health`]: run summary and health status
//!   - [`analyser::logic::charts`]: chart data selection
//!   - [`analyser::logic::flows`]: the pipeline that ties them together
//! - [`artifacts`]: where summaries and chart images are stored, and cleanup
//! - [`config`]: JSON configuration
//! - [`error`]: error types
//! - [`logging`]: tracing setup

#![warn(clippy::all, rust_2018_idioms)]

pub mod analyser;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod logging;
