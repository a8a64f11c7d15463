use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, warn};

use crate::checks::{Check, CheckContext};
use crate::core::{CheckResult, Finding, ScanReport, Severity, now_rfc3339};
use crate::platform;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Wall-clock budget for each check.
    pub check_budget: Duration,
    pub parallel: bool,
    pub show_progress: bool,
}

pub struct Engine {
    opts: EngineOptions,
    ctx: CheckContext,
}

impl Engine {
    pub fn new(opts: EngineOptions, ctx: CheckContext) -> Result<Self> {
        if !platform::has_readable_state(&ctx.sysroot) {
            return Err(crate::exit::scan_failed(format!(
                "no system state is readable under {}",
                ctx.sysroot.display()
            )));
        }
        Ok(Self { opts, ctx })
    }

    /// Runs every check once and returns one result per check in the order
    /// given, whatever order they finish in.
    pub fn run(&self, checks: &[Box<dyn Check>]) -> ScanReport {
        let timestamp = now_rfc3339();
        debug!(checks = checks.len(), parallel = self.opts.parallel, "scan running");

        use std::io::IsTerminal;
        let pb = if self.opts.show_progress && std::io::stderr().is_terminal() {
            let pb = indicatif::ProgressBar::new(checks.len() as u64);
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            if let Ok(style) = indicatif::ProgressStyle::with_template(
                "{spinner:.cyan} Running security checks [{bar:30.cyan/blue}] {pos}/{len} {msg}",
            ) {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        let results = if self.opts.parallel {
            self.run_parallel(checks, pb.as_ref())
        } else {
            checks
                .iter()
                .map(|check| {
                    if let Some(pb) = &pb {
                        pb.set_message(check.title());
                    }
                    let result = self.run_one(check.as_ref());
                    if let Some(pb) = &pb {
                        pb.inc(1);
                    }
                    result
                })
                .collect()
        };

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        ScanReport {
            schema_version: "1.0".to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp,
            host: platform::host_info(&self.ctx.sysroot),
            results,
        }
    }

    fn run_parallel(
        &self,
        checks: &[Box<dyn Check>],
        pb: Option<&indicatif::ProgressBar>,
    ) -> Vec<CheckResult> {
        let slots: Mutex<Vec<Option<CheckResult>>> = Mutex::new(vec![None; checks.len()]);

        std::thread::scope(|s| {
            for (idx, check) in checks.iter().enumerate() {
                let slots = &slots;
                s.spawn(move || {
                    let result = self.run_one(check.as_ref());
                    if let Some(pb) = pb {
                        pb.set_message(check.title());
                        pb.inc(1);
                    }
                    let mut guard = slots.lock().unwrap_or_else(|e| e.into_inner());
                    guard[idx] = Some(result);
                });
            }
        });

        slots
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .into_iter()
            .flatten()
            .collect()
    }

    fn run_one(&self, check: &dyn Check) -> CheckResult {
        let started = Instant::now();
        let ctx = self.ctx.with_deadline(started + self.opts.check_budget);
        debug!(check = check.id(), "check started");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| check.run(&ctx)));
        let findings = match outcome {
            Ok(Ok(findings)) => findings,
            Ok(Err(err)) => {
                let reason = format!("{err:#}");
                warn!(check = check.id(), error = %reason, "check failed");
                vec![failure_finding(check, reason)]
            }
            Err(payload) => {
                let reason = format!("panicked: {}", panic_message(payload.as_ref()));
                warn!(check = check.id(), error = %reason, "check panicked");
                vec![failure_finding(check, reason)]
            }
        };

        debug!(
            check = check.id(),
            findings = findings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "check finished"
        );

        CheckResult {
            check: check.id().to_string(),
            title: check.title().to_string(),
            category: check.category(),
            findings,
        }
    }
}

fn failure_finding(check: &dyn Check, reason: String) -> Finding {
    Finding::new(
        check.id(),
        check.category(),
        Severity::Info,
        format!("check-failed:{}", check.id()),
        format!("Check '{}' failed", check.id()),
    )
    .with_description(format!("{}: {reason}", check.title()))
    .with_remediation("Re-run with --verbose for details; the remaining checks were not affected")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}
