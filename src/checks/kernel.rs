use anyhow::Result;

use crate::checks::{Check, CheckContext, read_command, read_host_file};
use crate::core::{Category, Finding, Severity};

const CHECK_ID: &str = "kernel";

#[derive(Debug, Clone, Copy)]
enum Expect {
    Equals(i64),
    AtLeast(i64),
}

impl Expect {
    fn accepts(self, value: i64) -> bool {
        match self {
            Expect::Equals(v) => value == v,
            Expect::AtLeast(v) => value >= v,
        }
    }

    fn recommended(self) -> i64 {
        match self {
            Expect::Equals(v) | Expect::AtLeast(v) => v,
        }
    }

    fn describe(self) -> String {
        match self {
            Expect::Equals(v) => format!("{v}"),
            Expect::AtLeast(v) => format!(">= {v}"),
        }
    }
}

struct KernelParam {
    key: &'static str,
    expect: Expect,
    why: &'static str,
}

const PARAMS: &[KernelParam] = &[
    KernelParam {
        key: "kernel.randomize_va_space",
        expect: Expect::Equals(2),
        why: "address space layout randomization",
    },
    KernelParam {
        key: "kernel.kptr_restrict",
        expect: Expect::AtLeast(1),
        why: "hides kernel pointers from unprivileged users",
    },
    KernelParam {
        key: "kernel.dmesg_restrict",
        expect: Expect::Equals(1),
        why: "restricts the kernel log to privileged users",
    },
    KernelParam {
        key: "kernel.yama.ptrace_scope",
        expect: Expect::AtLeast(1),
        why: "limits ptrace to parent processes",
    },
    KernelParam {
        key: "kernel.unprivileged_bpf_disabled",
        expect: Expect::AtLeast(1),
        why: "blocks unprivileged eBPF programs",
    },
    KernelParam {
        key: "fs.protected_symlinks",
        expect: Expect::Equals(1),
        why: "prevents symlink attacks in sticky directories",
    },
    KernelParam {
        key: "fs.protected_hardlinks",
        expect: Expect::Equals(1),
        why: "prevents hardlinks to files the user cannot access",
    },
    KernelParam {
        key: "fs.suid_dumpable",
        expect: Expect::Equals(0),
        why: "keeps SUID processes from writing core dumps",
    },
];

pub struct KernelCheck;

impl Check for KernelCheck {
    fn id(&self) -> &'static str {
        CHECK_ID
    }

    fn title(&self) -> &'static str {
        "Kernel hardening"
    }

    fn category(&self) -> Category {
        Category::Kernel
    }

    fn run(&self, ctx: &CheckContext) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        let mut observed = Vec::new();

        for param in PARAMS {
            let path = ctx.host_path(&sysctl_path(param.key));
            let value = read_host_file(&path)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok());

            let Some(value) = value else {
                observed.push(format!("{} = unavailable", param.key));
                continue;
            };
            observed.push(format!("{} = {value}", param.key));

            if param.expect.accepts(value) {
                continue;
            }
            findings.push(
                Finding::new(
                    CHECK_ID,
                    Category::Kernel,
                    severity_for(param.key, value),
                    format!("sysctl:{}", param.key),
                    format!(
                        "{} = {value} (expected {})",
                        param.key,
                        param.expect.describe()
                    ),
                )
                .with_description(format!("{}: {}", param.key, param.why))
                .with_remediation(format!(
                    "sysctl -w {key}={v} and persist it in /etc/sysctl.d/99-hardening.conf",
                    key = param.key,
                    v = param.expect.recommended()
                ))
                .with_command(read_command(&path)),
            );
        }

        findings.push(
            Finding::new(
                CHECK_ID,
                Category::Kernel,
                Severity::Info,
                "kernel-parameters",
                "Current kernel parameters",
            )
            .with_description(format!(
                "{} of {} hardening parameters could be read",
                observed.iter().filter(|l| !l.ends_with("unavailable")).count(),
                PARAMS.len()
            ))
            .with_remediation("Review and adjust kernel parameters for security")
            .with_command(read_command(&ctx.host_path("/proc/sys")))
            .with_output(observed.join("\n")),
        );

        Ok(findings)
    }
}

fn sysctl_path(key: &str) -> String {
    format!("/proc/sys/{}", key.replace('.', "/"))
}

fn severity_for(key: &str, value: i64) -> Severity {
    if key == "kernel.randomize_va_space" && value == 0 {
        Severity::Critical
    } else {
        Severity::Warning
    }
}
