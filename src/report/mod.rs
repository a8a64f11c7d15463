//! JSON rendering of a [`ScanReport`].
//!
//! The document is a flat `findings` array grouped by category in check
//! registration order. Field order follows the struct declarations below, so
//! the same report always serializes to the same bytes.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::{Category, HostInfo, ScanReport, Severity};

#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub schema_version: &'a str,
    pub tool_version: &'a str,
    pub timestamp: &'a str,
    pub host: &'a HostInfo,
    pub findings: Vec<JsonFinding<'a>>,
}

#[derive(Debug, Serialize)]
pub struct JsonFinding<'a> {
    pub id: &'a str,
    pub check: &'a str,
    pub category: Category,
    pub severity: Severity,
    pub title: &'a str,
    pub description: &'a str,
    pub remediation: Option<&'a str>,
    pub command: Option<&'a str>,
    pub output: Option<&'a str>,
    pub timestamp: &'a str,
}

impl<'a> JsonReport<'a> {
    pub fn from_report(report: &'a ScanReport) -> Self {
        let findings = report
            .findings()
            .map(|f| JsonFinding {
                id: &f.id,
                check: &f.check,
                category: f.category,
                severity: f.severity,
                title: &f.title,
                description: &f.description,
                remediation: f.remediation.as_deref(),
                command: f.command.as_deref(),
                output: f.raw_output.as_deref(),
                timestamp: &f.timestamp,
            })
            .collect();

        Self {
            schema_version: &report.schema_version,
            tool_version: &report.tool_version,
            timestamp: &report.timestamp,
            host: &report.host,
            findings,
        }
    }
}

pub fn write_json(out: &mut dyn Write, report: &ScanReport) -> Result<()> {
    let doc = JsonReport::from_report(report);
    serde_json::to_writer_pretty(&mut *out, &doc).context("failed to serialize JSON report")?;
    writeln!(out).context("failed to write JSON report")?;
    Ok(())
}
