//! Report sinks. They read a finished [`FleetReport`] and never change it.

use crate::health::{FleetReport, Status};
use anyhow::Context;
use std::fmt;
use std::io::Write as _;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReportFormat {
    /// Human-readable summary
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
    Yaml,
}

/// Consumes a finished report.
pub trait ReportSink {
    fn publish(&self, report: &FleetReport) -> anyhow::Result<()>;
}

pub fn render(report: &FleetReport, format: ReportFormat) -> anyhow::Result<String> {
    match format {
        ReportFormat::Text => Ok(TextReport(report).to_string()),
        ReportFormat::Json => {
            serde_json::to_string_pretty(report).context("Failed to serialize report as JSON")
        }
        ReportFormat::Yaml => serde_yaml::to_string(report).context("Failed to serialize report as YAML"),
    }
}

fn label(status: Status) -> &'static str {
    match status {
        Status::Healthy => "HEALTHY ",
        Status::Warning => "WARNING ",
        Status::Critical => "CRITICAL",
    }
}

/// Plain-text layout: one block per category, then category errors and the summary line.
struct TextReport<'a>(&'a FleetReport);

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let summary = report.summary();
        writeln!(f, "Fleet health run {}", report.run_id())?;
        writeln!(
            f,
            "Started {} finished {} ({})",
            report.started_at().format("%Y-%m-%d %H:%M:%S UTC"),
            report.finished_at().format("%Y-%m-%d %H:%M:%S UTC"),
            report.outcome()
        )?;

        let width = report
            .results()
            .iter()
            .map(|result| result.target.len())
            .max()
            .unwrap_or(0);

        let mut current: Option<&str> = None;
        for result in report.results() {
            if current != Some(result.category.as_str()) {
                let counts = summary.by_category.get(&result.category).copied().unwrap_or_default();
                writeln!(
                    f,
                    "\n{} ({}/{} healthy)",
                    result.category, counts.healthy, counts.total
                )?;
                current = Some(result.category.as_str());
            }
            writeln!(
                f,
                "  [{}] {:width$}  {}",
                label(result.status),
                result.target,
                result.message,
            )?;
            if let Some(remediation) = &result.remediation {
                writeln!(f, "  {:>10} {:width$}  fix: {}", "", "", remediation)?;
            }
        }

        if !report.category_errors().is_empty() {
            writeln!(f, "\nCategory errors")?;
            for error in report.category_errors() {
                write!(f, "  {error}")?;
                if error.affected_targets > 0 {
                    write!(f, " ({} targets unchecked)", error.affected_targets)?;
                }
                writeln!(f)?;
            }
        }

        let totals = summary.totals;
        writeln!(
            f,
            "\nSummary: {} checks, {} healthy, {} warning, {} critical, {} unknown; worst status {}",
            totals.total, totals.healthy, totals.warning, totals.critical, summary.unknown, summary.worst_status
        )
    }
}

pub struct StdoutSink {
    format: ReportFormat,
}

impl StdoutSink {
    pub fn new(format: ReportFormat) -> Self {
        Self { format }
    }
}

impl ReportSink for StdoutSink {
    fn publish(&self, report: &FleetReport) -> anyhow::Result<()> {
        let rendered = render(report, self.format)?;
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(rendered.as_bytes())
            .context("Failed to write report to stdout")?;
        stdout.flush()?;
        Ok(())
    }
}

pub struct FileSink {
    path: PathBuf,
    format: ReportFormat,
}

impl FileSink {
    pub fn new<P: Into<PathBuf>>(path: P, format: ReportFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

impl ReportSink for FileSink {
    fn publish(&self, report: &FleetReport) -> anyhow::Result<()> {
        let rendered = render(report, self.format)?;
        std::fs::write(&self.path, rendered)
            .with_context(|| format!("Failed to write report to {}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), "Report written");
        Ok(())
    }
}
