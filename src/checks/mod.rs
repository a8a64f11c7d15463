use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use globset::GlobSet;

use crate::core::{Category, Finding, Severity};
use crate::platform;
use crate::scan::WalkResult;

mod kernel;
mod processes;
mod sudo;
mod users;
mod world_writable;

pub use kernel::KernelCheck;
pub use processes::ProcessesCheck;
pub use sudo::SudoCheck;
pub use users::UsersCheck;
pub use world_writable::WorldWritableCheck;

/// Read-only inputs shared by every check of one scan.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub sysroot: PathBuf,
    pub roots: Vec<PathBuf>,
    pub excludes: GlobSet,
    pub timeout: Duration,
    pub deadline: Option<Instant>,
    pub max_paths: usize,
}

impl CheckContext {
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn command_timeout(&self) -> Duration {
        let Some(deadline) = self.deadline else {
            return self.timeout;
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::cmp::min(self.timeout, remaining)
    }

    pub fn walk_end(&self) -> Instant {
        self.deadline.unwrap_or_else(|| Instant::now() + self.timeout)
    }

    pub fn host_path(&self, absolute: &str) -> PathBuf {
        platform::host_path(&self.sysroot, absolute)
    }
}

pub trait Check: Send + Sync {
    fn id(&self) -> &'static str;
    fn title(&self) -> &'static str;
    fn category(&self) -> Category;
    fn run(&self, ctx: &CheckContext) -> Result<Vec<Finding>>;
}

pub fn registry() -> Vec<Box<dyn Check>> {
    vec![
        Box::new(SudoCheck),
        Box::new(WorldWritableCheck),
        Box::new(UsersCheck),
        Box::new(ProcessesCheck),
        Box::new(KernelCheck),
    ]
}

/// Registry minus the ids in `disabled`, keeping registration order.
pub fn select_checks(disabled: &[String]) -> Result<Vec<Box<dyn Check>>> {
    let all = registry();
    for id in disabled {
        if !all.iter().any(|c| c.id() == id.trim()) {
            let known: Vec<&str> = all.iter().map(|c| c.id()).collect();
            return Err(anyhow!(
                "unknown check: {id} (known checks: {})",
                known.join(", ")
            ));
        }
    }
    Ok(all
        .into_iter()
        .filter(|c| !disabled.iter().any(|d| d.trim() == c.id()))
        .collect())
}

pub(crate) fn read_host_file(path: &Path) -> io::Result<String> {
    std::fs::read_to_string(path)
}

/// Info finding for a host file the check could not read.
pub(crate) fn unreadable_finding(
    check: &str,
    category: Category,
    id: impl Into<String>,
    path: &Path,
    err: &io::Error,
) -> Finding {
    let (title, remediation) = match err.kind() {
        io::ErrorKind::PermissionDenied => (
            format!("Cannot read {} (requires elevated privileges)", path.display()),
            "Re-run nsenso as root to include this inspection",
        ),
        io::ErrorKind::NotFound => (
            format!("{} does not exist", path.display()),
            "Verify the sysroot points at a Linux root filesystem",
        ),
        _ => (
            format!("Cannot read {}", path.display()),
            "Check the file and re-run the scan",
        ),
    };
    Finding::new(check, category, Severity::Info, id, title)
        .with_description(format!("{}: {err}", path.display()))
        .with_remediation(remediation)
        .with_command(read_command(path))
}

pub(crate) fn read_command(path: &Path) -> String {
    format!("read {}", path.display())
}

/// `find` line equivalent to a walk of the context roots.
pub(crate) fn find_command(ctx: &CheckContext, predicate: &str) -> String {
    let roots: Vec<String> = ctx.roots.iter().map(|r| r.display().to_string()).collect();
    format!("find {} {predicate}", roots.join(" "))
}

/// Info finding for an external command that could not be used.
pub(crate) fn command_failed_finding(
    check: &str,
    category: Category,
    id: impl Into<String>,
    cmdline: &str,
    reason: impl Into<String>,
) -> Finding {
    Finding::new(
        check,
        category,
        Severity::Info,
        id,
        format!("Could not run `{cmdline}`"),
    )
    .with_description(reason.into())
    .with_remediation("Install the tool or re-run with sufficient privileges")
    .with_command(cmdline)
}

/// Info finding describing a walk that stopped early or skipped entries.
pub(crate) fn walk_incomplete_finding(
    check: &str,
    category: Category,
    id: impl Into<String>,
    what: &str,
    command: String,
    result: &WalkResult,
) -> Option<Finding> {
    if !result.truncated && result.error_count == 0 {
        return None;
    }
    let title = if result.truncated {
        format!("{what} stopped at the time budget")
    } else {
        format!("{what} skipped unreadable paths")
    };
    Some(
        Finding::new(check, category, Severity::Info, id, title)
            .with_description(format!(
                "Results are a lower bound ({})",
                result.stat_line()
            ))
            .with_remediation("Re-run as root or raise --timeout for a complete scan")
            .with_command(command),
    )
}

/// Resolves uids to names once per check.
#[derive(Debug, Default)]
pub(crate) struct OwnerNames {
    cache: HashMap<u32, String>,
}

impl OwnerNames {
    pub fn name(&mut self, uid: u32) -> String {
        self.cache
            .entry(uid)
            .or_insert_with(|| platform::username_for_uid(uid).unwrap_or_else(|| uid.to_string()))
            .clone()
    }
}

/// Renders at most `max` lines and notes how many were left out.
pub(crate) fn capped_lines(lines: &[String], max: usize) -> String {
    let max = max.max(1);
    let mut out: Vec<String> = lines.iter().take(max).cloned().collect();
    if lines.len() > max {
        out.push(format!("... and {} more", lines.len() - max));
    }
    out.join("\n")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_order_is_fixed() {
        let ids: Vec<&str> = registry().iter().map(|c| c.id()).collect();
        assert_eq!(
            ids,
            vec!["sudo", "world-writable", "users", "processes", "kernel"]
        );
    }

    #[test]
    fn select_checks_drops_disabled_and_rejects_unknown() {
        let ids: Vec<&str> = select_checks(&["processes".to_string()])
            .expect("select")
            .iter()
            .map(|c| c.id())
            .collect();
        assert_eq!(ids, vec!["sudo", "world-writable", "users", "kernel"]);

        assert!(select_checks(&["firewall".to_string()]).is_err());
    }

    #[test]
    fn command_timeout_is_capped_by_deadline() {
        let root = testutil::temp_sysroot("ctx");
        let ctx = testutil::context(&root)
            .with_deadline(Instant::now() - Duration::from_secs(1));
        assert_eq!(ctx.command_timeout(), Duration::from_secs(0));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn capped_lines_reports_overflow() {
        let lines: Vec<String> = (0..5).map(|i| format!("l{i}")).collect();
        assert_eq!(capped_lines(&lines, 2), "l0\nl1\n... and 3 more");
        assert_eq!(capped_lines(&lines[..1], 2), "l0");
    }
}
