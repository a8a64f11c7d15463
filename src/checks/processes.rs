use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::checks::{Check, CheckContext, command_failed_finding};
use crate::core::{Category, Finding, Severity};
use crate::platform;

const CHECK_ID: &str = "processes";
const PS_CMDLINE: &str = "ps -eo user=,pid=,ppid=,comm=";

pub struct ProcessesCheck;

impl Check for ProcessesCheck {
    fn id(&self) -> &'static str {
        CHECK_ID
    }

    fn title(&self) -> &'static str {
        "Process and service security"
    }

    fn category(&self) -> Category {
        Category::Processes
    }

    fn run(&self, ctx: &CheckContext) -> Result<Vec<Finding>> {
        let own_pid = std::process::id();
        let (source, names) = match root_processes_from_ps(ctx.command_timeout(), own_pid) {
            Ok(names) => (PS_CMDLINE.to_string(), names),
            Err(ps_err) => {
                let proc_dir = ctx.host_path("/proc");
                match root_processes_from_proc(&proc_dir, own_pid) {
                    Ok(names) => (format!("read {}/*/status", proc_dir.display()), names),
                    Err(proc_err) => {
                        return Ok(vec![command_failed_finding(
                            CHECK_ID,
                            Category::Processes,
                            "process-list-unavailable",
                            PS_CMDLINE,
                            format!("{ps_err:#}; fallback failed: {proc_err:#}"),
                        )]);
                    }
                }
            }
        };

        if names.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![
            Finding::new(
                CHECK_ID,
                Category::Processes,
                Severity::Warning,
                "root-processes",
                "Processes running as root",
            )
            .with_description(format!(
                "{} processes ({} distinct commands) are running as root",
                names.len(),
                summarize(&names).len()
            ))
            .with_remediation(
                "Review root processes and run services under dedicated unprivileged accounts",
            )
            .with_command(source)
            .with_output(summarize(&names).join("\n")),
        ])
    }
}

fn root_processes_from_ps(timeout: Duration, own_pid: u32) -> Result<Vec<String>> {
    if timeout == Duration::from_secs(0) {
        return Err(anyhow!("time budget exhausted"));
    }
    let output = platform::run_command("ps", &["-eo", "user=,pid=,ppid=,comm="], timeout)?;
    if output.exit_code != 0 {
        return Err(anyhow!(
            "{PS_CMDLINE} exited with {}: {}",
            output.exit_code,
            output.stderr.trim()
        ));
    }
    Ok(parse_ps_root(&output.stdout, own_pid))
}

/// Command names of root-owned lines in `ps -eo user=,pid=,ppid=,comm=`
/// output. Children of `own_pid` (our `sudo -n -l` and `ps` invocations) are
/// left out so the snapshot does not depend on which checks run alongside.
pub(crate) fn parse_ps_root(stdout: &str, own_pid: u32) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let user = parts.next()?;
            let _pid = parts.next()?;
            let ppid: u32 = parts.next()?.parse().ok()?;
            let comm: Vec<&str> = parts.collect();
            if user != "root" || comm.is_empty() || ppid == own_pid {
                return None;
            }
            Some(comm.join(" "))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProcStatus {
    pub name: String,
    pub euid: u32,
    pub ppid: u32,
}

/// Reads `Name:`, the effective uid and `PPid:` from every `<proc>/<pid>/status`.
pub(crate) fn root_processes_from_proc(proc_dir: &Path, own_pid: u32) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(proc_dir)
        .with_context(|| format!("read_dir: {}", proc_dir.display()))?;

    let mut names = Vec::new();
    let mut seen_any = false;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(pid) = file_name.to_str() else {
            continue;
        };
        if !pid.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        // Processes can exit between read_dir and read.
        let Ok(status) = std::fs::read_to_string(entry.path().join("status")) else {
            continue;
        };
        seen_any = true;
        if let Some(status) = parse_proc_status(&status) {
            if status.euid == 0 && status.ppid != own_pid {
                names.push(status.name);
            }
        }
    }

    if !seen_any {
        return Err(anyhow!("no process entries under {}", proc_dir.display()));
    }
    Ok(names)
}

pub(crate) fn parse_proc_status(status: &str) -> Option<ProcStatus> {
    let mut name = None;
    let mut euid = None;
    let mut ppid = None;
    for line in status.lines() {
        if let Some(v) = line.strip_prefix("Name:") {
            name = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("Uid:") {
            euid = v.split_whitespace().nth(1).and_then(|s| s.parse().ok());
        } else if let Some(v) = line.strip_prefix("PPid:") {
            ppid = v.trim().parse().ok();
        }
    }
    Some(ProcStatus {
        name: name?,
        euid: euid?,
        ppid: ppid.unwrap_or(0),
    })
}

/// Sorted `name xN` lines so repeated scans render identically.
fn summarize(names: &[String]) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for name in names {
        *counts.entry(name.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(name, n)| if n == 1 { name.to_string() } else { format!("{name} x{n}") })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testutil::{context, temp_sysroot, write_file};
    use std::time::Instant;

    #[test]
    fn parse_ps_keeps_root_lines_only() {
        let stdout =
            "root 1 0 systemd\n  www-data 812 1 nginx\nroot 22 2 kworker/0:1 events\nroot\n";
        assert_eq!(
            parse_ps_root(stdout, 4242),
            vec!["systemd".to_string(), "kworker/0:1 events".to_string()]
        );
    }

    #[test]
    fn parse_ps_skips_our_own_children() {
        let stdout = "root 1 0 systemd\nroot 4300 4242 sudo\nroot 4301 4242 ps\nroot 900 1 sudo\n";
        assert_eq!(
            parse_ps_root(stdout, 4242),
            vec!["systemd".to_string(), "sudo".to_string()]
        );
    }

    #[test]
    fn parse_proc_status_uses_effective_uid() {
        let status = "Name:\tsshd\nState:\tS (sleeping)\nPPid:\t1\nUid:\t1000\t0\t0\t0\n";
        assert_eq!(
            parse_proc_status(status),
            Some(ProcStatus {
                name: "sshd".to_string(),
                euid: 0,
                ppid: 1,
            })
        );
        assert_eq!(parse_proc_status("Name:\tx\n"), None);
    }

    #[test]
    fn proc_fallback_reads_status_files() {
        let root = temp_sysroot("proc");
        write_file(&root.join("proc/1/status"), "Name:\tinit\nPPid:\t0\nUid:\t0\t0\t0\t0\n");
        write_file(
            &root.join("proc/42/status"),
            "Name:\tbash\nPPid:\t1\nUid:\t1000\t1000\t1000\t1000\n",
        );
        write_file(
            &root.join("proc/77/status"),
            "Name:\tsudo\nPPid:\t4242\nUid:\t1000\t0\t0\t0\n",
        );
        write_file(&root.join("proc/self/status"), "Name:\tignored\nUid:\t0\t0\t0\t0\n");

        let names = root_processes_from_proc(&root.join("proc"), 4242).expect("proc scan");
        assert_eq!(names, vec!["init".to_string()]);

        assert!(root_processes_from_proc(&root.join("missing"), 4242).is_err());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn spent_budget_without_proc_degrades_to_info() {
        let root = temp_sysroot("noproc");
        let ctx = context(&root).with_deadline(Instant::now());

        let findings = ProcessesCheck.run(&ctx).expect("run");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].id, "process-list-unavailable");
        assert_eq!(findings[0].severity, Severity::Info);
        assert_eq!(findings[0].command.as_deref(), Some(PS_CMDLINE));
        assert!(findings[0].description.contains("time budget exhausted"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn summarize_counts_duplicates_in_name_order() {
        let names: Vec<String> = ["sshd", "cron", "sshd"].iter().map(|s| s.to_string()).collect();
        assert_eq!(summarize(&names), vec!["cron".to_string(), "sshd x2".to_string()]);
    }
}
