use std::collections::BTreeSet;

use anyhow::Result;

use crate::checks::{Check, CheckContext, read_command, read_host_file, unreadable_finding};
use crate::core::{Category, Finding, Severity};

const CHECK_ID: &str = "users";

pub struct UsersCheck;

impl Check for UsersCheck {
    fn id(&self) -> &'static str {
        CHECK_ID
    }

    fn title(&self) -> &'static str {
        "User and credential audit"
    }

    fn category(&self) -> Category {
        Category::Users
    }

    fn run(&self, ctx: &CheckContext) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        let mut empty_reported = BTreeSet::new();

        let passwd_path = ctx.host_path("/etc/passwd");
        match read_host_file(&passwd_path) {
            Ok(content) => {
                let accounts = parse_passwd(&content);
                for account in &accounts {
                    if account.uid == 0 && account.name != "root" {
                        findings.push(
                            Finding::new(
                                CHECK_ID,
                                Category::Users,
                                Severity::Critical,
                                format!("uid0:{}", account.name),
                                format!("Account '{}' has UID 0", account.name),
                            )
                            .with_description(format!(
                                "'{}' is a root-equivalent account (shell {})",
                                account.name, account.shell
                            ))
                            .with_remediation(
                                "Remove the account or give it a non-zero UID; only root should hold UID 0",
                            )
                            .with_command(read_command(&passwd_path)),
                        );
                    }

                    match classify_password(&account.password) {
                        PasswordField::Empty => {
                            empty_reported.insert(account.name.clone());
                            findings.push(
                                empty_password_finding(&account.name, "/etc/passwd")
                                    .with_command(read_command(&passwd_path)),
                            );
                        }
                        PasswordField::Hash => findings.push(
                            Finding::new(
                                CHECK_ID,
                                Category::Users,
                                Severity::Warning,
                                format!("passwd-hash:{}", account.name),
                                format!(
                                    "Password hash for '{}' stored in /etc/passwd",
                                    account.name
                                ),
                            )
                            .with_description(
                                "/etc/passwd is world-readable, so the hash can be cracked offline",
                            )
                            .with_remediation("Run pwconv to move password hashes into /etc/shadow")
                            .with_command(read_command(&passwd_path)),
                        ),
                        PasswordField::Shadowed | PasswordField::Locked => {}
                    }
                }
            }
            Err(err) => findings.push(unreadable_finding(
                CHECK_ID,
                Category::Users,
                "passwd-unreadable",
                &passwd_path,
                &err,
            )),
        }

        let shadow_path = ctx.host_path("/etc/shadow");
        match read_host_file(&shadow_path) {
            Ok(content) => {
                for entry in parse_shadow(&content) {
                    if classify_password(&entry.password) != PasswordField::Empty {
                        continue;
                    }
                    if empty_reported.insert(entry.name.clone()) {
                        findings.push(
                            empty_password_finding(&entry.name, "/etc/shadow")
                                .with_command(read_command(&shadow_path)),
                        );
                    }
                }
            }
            Err(err) => findings.push(unreadable_finding(
                CHECK_ID,
                Category::Users,
                "shadow-unreadable",
                &shadow_path,
                &err,
            )),
        }

        Ok(findings)
    }
}

fn empty_password_finding(name: &str, source: &str) -> Finding {
    Finding::new(
        CHECK_ID,
        Category::Users,
        Severity::Critical,
        format!("empty-password:{name}"),
        format!("Account '{name}' has an empty password"),
    )
    .with_description(format!(
        "The password field for '{name}' in {source} is empty; anyone can log in as this user"
    ))
    .with_remediation(format!(
        "Set a strong password (passwd {name}) or lock the account (passwd -l {name})"
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PasswdEntry {
    pub name: String,
    pub password: String,
    pub uid: u32,
    pub shell: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ShadowEntry {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PasswordField {
    Empty,
    Shadowed,
    Locked,
    Hash,
}

pub(crate) fn classify_password(field: &str) -> PasswordField {
    match field {
        "" => PasswordField::Empty,
        "x" => PasswordField::Shadowed,
        f if f.starts_with('!') || f.starts_with('*') => PasswordField::Locked,
        _ => PasswordField::Hash,
    }
}

pub(crate) fn parse_passwd(content: &str) -> Vec<PasswdEntry> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 7 {
                return None;
            }
            Some(PasswdEntry {
                name: fields[0].to_string(),
                password: fields[1].to_string(),
                uid: fields[2].trim().parse().ok()?,
                shell: fields[6].to_string(),
            })
        })
        .collect()
}

pub(crate) fn parse_shadow(content: &str) -> Vec<ShadowEntry> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?.to_string();
            let password = fields.next()?.to_string();
            Some(ShadowEntry { name, password })
        })
        .collect()
}
