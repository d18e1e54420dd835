//! Table rendering for pod averages

use crate::models::EntityReport;
use tabled::{settings::Style, Table, Tabled};

/// One rendered row of the averages table
#[derive(Debug, Clone, PartialEq, Tabled)]
pub struct ReportRow {
    #[tabled(rename = "Pod")]
    pub pod: String,
    #[tabled(rename = "CPU AVG%")]
    pub cpu: String,
    #[tabled(rename = "MEM AVG%")]
    pub memory: String,
}

impl From<&EntityReport> for ReportRow {
    fn from(report: &EntityReport) -> Self {
        Self {
            pod: report.entity.name.clone(),
            cpu: format_percent(report.cpu_average),
            memory: format_percent(report.memory_average),
        }
    }
}

/// Two decimal places with a trailing `%`
pub fn format_percent(value: f64) -> String {
    format!("{:.2}%", value)
}

/// Render reports in the given order as a bordered table
pub fn render_table(reports: &[EntityReport]) -> String {
    let rows: Vec<ReportRow> = reports.iter().map(ReportRow::from).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}
