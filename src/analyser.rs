//! Dataset analysis: loading, cleaning, outlier detection and reporting.

pub mod logic;
