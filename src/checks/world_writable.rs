use anyhow::Result;

use crate::checks::{Check, CheckContext, OwnerNames, find_command, walk_incomplete_finding};
use crate::core::{Category, Finding, Severity};
use crate::scan::{self, WalkHit};

const CHECK_ID: &str = "world-writable";
const WW_PREDICATE: &str = "-perm -o+w";

pub struct WorldWritableCheck;

impl Check for WorldWritableCheck {
    fn id(&self) -> &'static str {
        CHECK_ID
    }

    fn title(&self) -> &'static str {
        "World-writable files and directories"
    }

    fn category(&self) -> Category {
        Category::FilePermissions
    }

    fn run(&self, ctx: &CheckContext) -> Result<Vec<Finding>> {
        let result = scan::walk_matching(&ctx.roots, &ctx.excludes, ctx.walk_end(), is_flagged);

        let mut owners = OwnerNames::default();
        let mut findings: Vec<Finding> = result
            .hits
            .iter()
            .take(ctx.max_paths.max(1))
            .map(|hit| {
                hit_finding(hit, &owners.name(hit.uid))
                    .with_command(find_command(ctx, WW_PREDICATE))
            })
            .collect();

        let omitted = result.hits.len().saturating_sub(findings.len());
        if omitted > 0 {
            findings.push(
                Finding::new(
                    CHECK_ID,
                    Category::FilePermissions,
                    Severity::Info,
                    "world-writable-omitted",
                    format!("{omitted} more world-writable paths not listed"),
                )
                .with_description(format!(
                    "{} world-writable paths found; only the first {} are reported individually",
                    result.hits.len(),
                    findings.len()
                ))
                .with_remediation("Raise scan.max_paths or narrow --root to see every path")
                .with_command(find_command(ctx, WW_PREDICATE)),
            );
        }

        findings.extend(walk_incomplete_finding(
            CHECK_ID,
            Category::FilePermissions,
            "world-writable-scan-incomplete",
            "World-writable scan",
            find_command(ctx, WW_PREDICATE),
            &result,
        ));
        Ok(findings)
    }
}

/// World-writable files, and world-writable directories lacking the sticky bit.
fn is_flagged(hit: &WalkHit) -> bool {
    if hit.mode & 0o002 == 0 {
        return false;
    }
    !hit.is_dir || hit.mode & 0o1000 == 0
}

fn hit_finding(hit: &WalkHit, owner: &str) -> Finding {
    let path = hit.path.display().to_string();
    if hit.is_dir {
        return Finding::new(
            CHECK_ID,
            Category::FilePermissions,
            Severity::Warning,
            format!("world-writable-dir:{path}"),
            format!("World-writable directory without sticky bit: {path}"),
        )
        .with_description(format!(
            "{path} (mode {:04o}, owner {owner}) lets any local user delete or replace entries",
            hit.mode
        ))
        .with_remediation(format!(
            "chmod o-w {path} (or chmod +t {path} for a shared scratch directory)"
        ));
    }

    let privileged = hit.mode & 0o6000 != 0;
    let severity = if privileged {
        Severity::Critical
    } else {
        Severity::Warning
    };
    let detail = if privileged {
        " and carries the SUID/SGID bit"
    } else {
        ""
    };
    Finding::new(
        CHECK_ID,
        Category::FilePermissions,
        severity,
        format!("world-writable-file:{path}"),
        format!("World-writable file: {path}"),
    )
    .with_description(format!(
        "{path} (mode {:04o}, owner {owner}) can be modified by any local user{detail}",
        hit.mode
    ))
    .with_remediation(format!("chmod o-w {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testutil::{context, temp_sysroot, write_file};
    use std::os::unix::fs::PermissionsExt;

    fn chmod(path: &std::path::Path, mode: u32) {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).expect("chmod");
    }

    #[test]
    fn mode_777_file_is_reported_until_fixed() {
        let root = temp_sysroot("ww");
        let test = root.join("tmp/test");
        write_file(&test, "x");
        chmod(&test, 0o777);
        let ctx = context(&root);

        let findings = WorldWritableCheck.run(&ctx).expect("run");
        let hit = findings
            .iter()
            .find(|f| f.id == format!("world-writable-file:{}", test.display()))
            .expect("finding for test file");
        assert_eq!(hit.severity, Severity::Warning);
        assert!(hit.title.contains(&test.display().to_string()));
        assert_eq!(
            hit.command.as_deref(),
            Some(format!("find {} -perm -o+w", root.display()).as_str())
        );

        chmod(&test, 0o775);
        let findings = WorldWritableCheck.run(&ctx).expect("rerun");
        assert!(
            findings
                .iter()
                .all(|f| !f.title.contains(&test.display().to_string())),
            "{findings:?}"
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn sticky_directories_are_accepted() {
        let root = temp_sysroot("sticky");
        let shared = root.join("shared");
        let open = root.join("open");
        std::fs::create_dir_all(&shared).expect("mkdir");
        std::fs::create_dir_all(&open).expect("mkdir");
        chmod(&shared, 0o1777);
        chmod(&open, 0o777);

        let findings = WorldWritableCheck.run(&context(&root)).expect("run");
        let ids: Vec<&str> = findings.iter().map(|f| f.id.as_str()).collect();
        assert!(ids.contains(&format!("world-writable-dir:{}", open.display()).as_str()));
        assert!(!ids.contains(&format!("world-writable-dir:{}", shared.display()).as_str()));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn setuid_world_writable_file_is_critical() {
        let hit = WalkHit {
            path: "/usr/local/bin/tool".into(),
            mode: 0o4777,
            uid: 0,
            is_dir: false,
        };
        assert!(is_flagged(&hit));
        assert_eq!(hit_finding(&hit, "root").severity, Severity::Critical);
    }

    #[test]
    fn walk_past_deadline_is_reported_incomplete() {
        let root = temp_sysroot("ww-budget");
        let p = root.join("tmp/open");
        write_file(&p, "x");
        chmod(&p, 0o666);
        let ctx = context(&root).with_deadline(std::time::Instant::now());

        let findings = WorldWritableCheck.run(&ctx).expect("run");
        let ids: Vec<&str> = findings.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["world-writable-scan-incomplete"]);
        assert_eq!(findings[0].severity, Severity::Info);
        assert!(findings[0].description.contains("truncated=true"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn overflow_is_summarised() {
        let root = temp_sysroot("wwcap");
        for i in 0..4 {
            let p = root.join(format!("f{i}"));
            write_file(&p, "x");
            chmod(&p, 0o666);
        }
        let mut ctx = context(&root);
        ctx.max_paths = 2;

        let findings = WorldWritableCheck.run(&ctx).expect("run");
        let files = findings
            .iter()
            .filter(|f| f.id.starts_with("world-writable-file:"))
            .count();
        assert_eq!(files, 2);
        let omitted = findings
            .iter()
            .find(|f| f.id == "world-writable-omitted")
            .expect("omitted summary");
        assert_eq!(omitted.severity, Severity::Info);
        assert!(omitted.title.starts_with("2 more"));

        let _ = std::fs::remove_dir_all(&root);
    }
}
