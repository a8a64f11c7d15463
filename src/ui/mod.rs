use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::checks::Check;
use crate::core::{Finding, ScanReport, Severity};

/// Raw output lines shown per finding unless `verbose` is set.
const OUTPUT_PREVIEW_LINES: usize = 8;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "caused by:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "next:");
    let _ = writeln!(stderr, "  - re-run with `--verbose` for diagnostic logs");
    let _ = writeln!(stderr, "  - see `nsenso --help` for the available options");
}

pub fn write_text_report(
    out: &mut dyn Write,
    report: &ScanReport,
    cfg: &UiConfig,
) -> io::Result<()> {
    let host = &report.host;
    writeln!(out, "{}", bold("=== nSenso Security Scan Report ===", cfg.color))?;
    writeln!(out, "Scan started at: {}", report.timestamp)?;
    writeln!(
        out,
        "Host: {} ({}, kernel {})",
        host.hostname, host.os_name, host.kernel_release
    )?;
    if !host.is_root {
        writeln!(
            out,
            "Note: running without root (euid={}); privileged inspections degrade to INFO findings.",
            host.euid
        )?;
    }

    for result in &report.results {
        writeln!(out)?;
        writeln!(
            out,
            "{} [{}]",
            bold(&result.title, cfg.color),
            result.category
        )?;
        if result.findings.is_empty() {
            writeln!(out, "  No findings.")?;
            continue;
        }
        for finding in &result.findings {
            write_finding(out, finding, cfg)?;
        }
    }

    writeln!(out)?;
    write_summary(out, report, cfg.color)
}

fn write_finding(out: &mut dyn Write, finding: &Finding, cfg: &UiConfig) -> io::Result<()> {
    let label = pad_end_ansi(&format_severity(finding.severity, cfg.color), 8);
    writeln!(out, "  {label}  {}", finding.title)?;
    if finding.description != finding.title {
        writeln!(out, "            Description: {}", finding.description)?;
    }
    if let Some(remediation) = &finding.remediation {
        writeln!(out, "            Remediation: {remediation}")?;
    }
    if let Some(command) = &finding.command {
        writeln!(out, "            Command: {command}")?;
    }
    if let Some(output) = &finding.raw_output {
        let max_lines = if cfg.verbose {
            usize::MAX
        } else {
            OUTPUT_PREVIEW_LINES
        };
        write_output_excerpt(out, output, max_lines)?;
    }
    Ok(())
}

fn write_output_excerpt(out: &mut dyn Write, output: &str, max_lines: usize) -> io::Result<()> {
    writeln!(out, "            Output:")?;

    let lines: Vec<&str> = output
        .lines()
        .map(|l| l.trim_end())
        .filter(|l| !l.trim().is_empty())
        .collect();
    for line in lines.iter().take(max_lines.max(1)) {
        writeln!(out, "              {line}")?;
    }
    if lines.len() > max_lines {
        writeln!(
            out,
            "              ... ({} more lines, use --verbose or --format json)",
            lines.len() - max_lines
        )?;
    }
    Ok(())
}

fn write_summary(out: &mut dyn Write, report: &ScanReport, color: bool) -> io::Result<()> {
    let label_severity = "Severity";
    let label_count = "Count";
    let total = report.findings().count();

    let sev_w = Severity::ALL
        .iter()
        .map(|s| s.label().len())
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_severity))
        .max(visible_width_ansi("Total"));
    let count_w = visible_width_ansi(label_count).max(total.to_string().len());

    writeln!(out, "Summary:")?;
    writeln!(
        out,
        "{}  {}",
        pad_end_display(label_severity, sev_w),
        pad_start_display(label_count, count_w)
    )?;
    writeln!(out, "{}  {}", "-".repeat(sev_w), "-".repeat(count_w))?;
    for severity in Severity::ALL {
        let label = pad_end_ansi(&format_severity(severity, color), sev_w);
        let count = pad_start_display(&report.count(severity).to_string(), count_w);
        writeln!(out, "{label}  {count}")?;
    }
    writeln!(
        out,
        "{}  {}",
        pad_end_display("Total", sev_w),
        pad_start_display(&total.to_string(), count_w)
    )
}

pub fn write_check_list(out: &mut dyn Write, checks: &[Box<dyn Check>]) -> io::Result<()> {
    let id_w = checks.iter().map(|c| c.id().len()).max().unwrap_or(0);
    for check in checks {
        writeln!(
            out,
            "{}  {:<16}  {}",
            pad_end_display(check.id(), id_w),
            check.category().as_str(),
            check.title()
        )?;
    }
    Ok(())
}

fn format_severity(severity: Severity, color: bool) -> String {
    let s = severity.label();
    if !color {
        return s.to_string();
    }

    let code = match severity {
        Severity::Info => "34",
        Severity::Warning => "33",
        Severity::Critical => "1;31",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn bold(s: &str, color: bool) -> String {
    if color {
        format!("\x1b[1m{s}\x1b[0m")
    } else {
        s.to_string()
    }
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_end_display(s: &str, width: usize) -> String {
    pad_end_ansi(s, width)
}

fn pad_start_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{}{}", " ".repeat(width - w), s)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}
