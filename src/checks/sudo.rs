use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use crate::checks::{
    Check, CheckContext, OwnerNames, capped_lines, command_failed_finding, find_command,
    read_command, read_host_file, unreadable_finding, walk_incomplete_finding,
};
use crate::core::{Category, Finding, Severity};
use crate::platform;
use crate::scan;

const CHECK_ID: &str = "sudo";
const SUDO_LIST_CMDLINE: &str = "sudo -n -l";
const SUID_PREDICATE: &str = "-type f -perm /6000";

pub struct SudoCheck;

impl Check for SudoCheck {
    fn id(&self) -> &'static str {
        CHECK_ID
    }

    fn title(&self) -> &'static str {
        "Sudo configuration and SUID binaries"
    }

    fn category(&self) -> Category {
        Category::Sudo
    }

    fn run(&self, ctx: &CheckContext) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        findings.extend(sudo_list(ctx));
        findings.extend(sudoers_rules(ctx));
        findings.extend(suid_binaries(ctx));
        Ok(findings)
    }
}

fn sudo_list(ctx: &CheckContext) -> Option<Finding> {
    let cmdline = SUDO_LIST_CMDLINE;
    let timeout = ctx.command_timeout();
    if timeout == Duration::from_secs(0) {
        return Some(command_failed_finding(
            CHECK_ID,
            Category::Sudo,
            "sudo-list-unavailable",
            cmdline,
            "time budget exhausted before the command could run",
        ));
    }

    match platform::run_command("sudo", &["-n", "-l"], timeout) {
        Ok(output) if output.stdout.contains("NOPASSWD") => Some(
            Finding::new(
                CHECK_ID,
                Category::Sudo,
                Severity::Critical,
                "sudo-nopasswd",
                "NOPASSWD sudo access detected",
            )
            .with_description(
                "The invoking user can run commands through sudo without entering a password",
            )
            .with_remediation("Review and restrict sudo access in /etc/sudoers (visudo)")
            .with_command(cmdline)
            .with_output(output.stdout),
        ),
        Ok(output) if output.exit_code == 0 => None,
        Ok(output) => {
            if sudo_denied_normally(&output.stderr) {
                return None;
            }
            Some(
                command_failed_finding(
                    CHECK_ID,
                    Category::Sudo,
                    "sudo-list-unavailable",
                    cmdline,
                    format!("exit_code={}", output.exit_code),
                )
                .with_output(output.stderr),
            )
        }
        Err(err) => Some(command_failed_finding(
            CHECK_ID,
            Category::Sudo,
            "sudo-list-unavailable",
            cmdline,
            format!("{err:#}"),
        )),
    }
}

/// Non-zero exits that only mean "this user has no passwordless sudo".
fn sudo_denied_normally(stderr: &str) -> bool {
    stderr.contains("a password is required") || stderr.contains("may not run sudo")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SudoRule {
    pub principal: String,
    pub source: String,
    /// Some command in the rule runs without a password.
    pub nopasswd: bool,
    pub all_commands: bool,
    /// `ALL` is granted with NOPASSWD in effect.
    pub nopasswd_all: bool,
    pub line: String,
}

impl SudoRule {
    fn is_group(&self) -> bool {
        self.principal.starts_with('%')
    }
}

pub(crate) fn parse_sudoers(content: &str, source: &str) -> Vec<SudoRule> {
    let mut rules = Vec::new();
    let mut pending = String::new();

    for line in content.lines() {
        // Backslash continues a rule on the next line.
        if let Some(head) = line.strip_suffix('\\') {
            pending.push_str(head);
            pending.push(' ');
            continue;
        }
        pending.push_str(line);
        let logical = std::mem::take(&mut pending);
        let trimmed = logical.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('@') {
            continue;
        }
        if ["Defaults", "User_Alias", "Runas_Alias", "Host_Alias", "Cmnd_Alias"]
            .iter()
            .any(|kw| trimmed.starts_with(kw))
        {
            continue;
        }

        let Some(rule) = parse_rule(trimmed, source) else {
            continue;
        };
        rules.push(rule);
    }

    rules
}

fn parse_rule(line: &str, source: &str) -> Option<SudoRule> {
    let (principal, rest) = line.split_once(char::is_whitespace)?;
    let (_hosts, spec) = rest.split_once('=')?;

    let mut tagged_nopasswd = false;
    let mut nopasswd = false;
    let mut all_commands = false;
    let mut nopasswd_all = false;

    for entry in split_top_level(spec) {
        let mut command = entry.trim();
        if command.starts_with('(') {
            let close = command.find(')')?;
            command = command[close + 1..].trim();
        }

        // Tags look like `NOPASSWD: SETENV: /usr/bin/foo` and stay in effect
        // for the following commands until another tag overrides them.
        while let Some((tag, tail)) = command.split_once(':') {
            let tag = tag.trim();
            if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
                break;
            }
            match tag {
                "NOPASSWD" => tagged_nopasswd = true,
                "PASSWD" => tagged_nopasswd = false,
                _ => {}
            }
            command = tail.trim();
        }

        if command.is_empty() {
            continue;
        }
        nopasswd |= tagged_nopasswd;
        if command == "ALL" {
            all_commands = true;
            nopasswd_all |= tagged_nopasswd;
        }
    }

    Some(SudoRule {
        principal: principal.to_string(),
        source: source.to_string(),
        nopasswd,
        all_commands,
        nopasswd_all,
        line: line.to_string(),
    })
}

/// Splits a command list on commas outside `(runas)` groups.
fn split_top_level(spec: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in spec.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&spec[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&spec[start..]);
    parts
}

fn sudoers_rules(ctx: &CheckContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut rules = Vec::new();

    let main = ctx.host_path("/etc/sudoers");
    match read_host_file(&main) {
        Ok(content) => rules.extend(parse_sudoers(&content, "/etc/sudoers")),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return findings,
        Err(err) => {
            findings.push(unreadable_finding(
                CHECK_ID,
                Category::Sudo,
                "sudoers-unreadable",
                &main,
                &err,
            ));
            return findings;
        }
    }

    let dropin_dir = ctx.host_path("/etc/sudoers.d");
    match std::fs::read_dir(&dropin_dir) {
        Ok(entries) => {
            let mut paths: Vec<_> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| is_sudoers_dropin(p))
                .collect();
            paths.sort();
            for path in paths {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                match read_host_file(&path) {
                    Ok(content) => {
                        rules.extend(parse_sudoers(&content, &format!("/etc/sudoers.d/{name}")))
                    }
                    Err(err) => findings.push(unreadable_finding(
                        CHECK_ID,
                        Category::Sudo,
                        format!("sudoers-unreadable:{name}"),
                        &path,
                        &err,
                    )),
                }
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => findings.push(unreadable_finding(
            CHECK_ID,
            Category::Sudo,
            "sudoers-d-unreadable",
            &dropin_dir,
            &err,
        )),
    }

    for rule in rules.iter().filter(|r| r.nopasswd) {
        let severity = match (rule.nopasswd_all, rule.is_group()) {
            (true, false) => Severity::Critical,
            (true, true) => Severity::Warning,
            (false, _) => Severity::Info,
        };
        let scope = if rule.nopasswd_all {
            "ALL commands"
        } else {
            "a restricted command list"
        };
        findings.push(
            Finding::new(
                CHECK_ID,
                Category::Sudo,
                severity,
                format!("sudoers-nopasswd:{}:{}", rule.source, rule.principal),
                format!("'{}' has passwordless sudo for {scope}", rule.principal),
            )
            .with_description(format!("Rule in {}: {}", rule.source, rule.line))
            .with_remediation(
                "Remove NOPASSWD from the rule or narrow it to specific commands (visudo)",
            )
            .with_command(read_command(&ctx.host_path(&rule.source)))
            .with_output(rule.line.clone()),
        );
    }

    findings
}

/// sudo skips drop-ins containing a dot or ending in `~`.
fn is_sudoers_dropin(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    path.is_file() && !name.contains('.') && !name.ends_with('~')
}

fn suid_binaries(ctx: &CheckContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    let result = scan::walk_matching(&ctx.roots, &ctx.excludes, ctx.walk_end(), |h| {
        !h.is_dir && h.mode & 0o6000 != 0
    });

    if !result.hits.is_empty() {
        let mut owners = OwnerNames::default();
        let lines: Vec<String> = result
            .hits
            .iter()
            .map(|h| {
                let kind = if h.mode & 0o4000 != 0 { "suid" } else { "sgid" };
                format!("{kind} {:04o} {} {}", h.mode, owners.name(h.uid), h.path.display())
            })
            .collect();
        let suid = result.hits.iter().filter(|h| h.mode & 0o4000 != 0).count();
        findings.push(
            Finding::new(
                CHECK_ID,
                Category::Sudo,
                Severity::Warning,
                "suid-binaries",
                "SUID/SGID binaries present",
            )
            .with_description(format!(
                "Found {} SUID and {} SGID-only binaries",
                suid,
                result.hits.len() - suid
            ))
            .with_remediation("Review and remove unnecessary SUID permissions (chmod u-s <file>)")
            .with_command(find_command(ctx, SUID_PREDICATE))
            .with_output(capped_lines(&lines, ctx.max_paths)),
        );
    }

    findings.extend(walk_incomplete_finding(
        CHECK_ID,
        Category::Sudo,
        "suid-scan-incomplete",
        "SUID scan",
        find_command(ctx, SUID_PREDICATE),
        &result,
    ));
    findings
}
