//! Report rendering for the run's consumers

pub mod csv;

pub use csv::{render_csv, ReportData};
