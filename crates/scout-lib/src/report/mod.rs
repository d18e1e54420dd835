//! Rendering and delivery of pod averages

mod reporter;
mod table;

pub use reporter::{RenderMode, ReportSink, Reporter, ReporterOutcome, CLEAR_SCREEN};
pub use table::{format_percent, render_table, ReportRow};
