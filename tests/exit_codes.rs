use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static SEQ: AtomicU64 = AtomicU64::new(0);

const NSENSO_VARS: &[&str] = &[
    "NSENSO_CONFIG",
    "NSENSO_LOG",
    "NSENSO_UI_COLOR",
    "NSENSO_SCAN_PARALLEL",
    "NSENSO_SCAN_TIMEOUT_SECS",
    "NSENSO_SCAN_ROOTS",
    "NSENSO_SCAN_EXCLUDE",
    "NSENSO_SCAN_DISABLE",
    "NSENSO_SCAN_MAX_PATHS",
];

fn make_temp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "nsenso-test-{tag}-{}-{nanos}-{seq}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_nsenso"));
    cmd.env("HOME", home);
    for var in NSENSO_VARS {
        cmd.env_remove(var);
    }
    cmd
}

const ALL_CHECKS: &[&str] = &["sudo", "world-writable", "users", "processes", "kernel"];

fn skip_all(cmd: &mut Command) {
    for id in ALL_CHECKS {
        cmd.args(["--skip", id]);
    }
}

#[test]
fn unknown_format_exits_2() {
    let home = make_temp_dir("home");
    let status = cmd(&home)
        .args(["--format", "yaml"])
        .status()
        .expect("run nsenso");
    assert_eq!(status.code(), Some(2));
}

#[test]
fn unknown_check_id_exits_2() {
    let home = make_temp_dir("home");
    let out = cmd(&home)
        .args(["--skip", "nosuch", "--format", "json"])
        .output()
        .expect("run nsenso");
    assert_eq!(out.status.code(), Some(2));
    assert!(out.stdout.is_empty(), "nothing is scanned on invalid args");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("nosuch"), "stderr: {stderr}");
}

#[test]
fn invalid_exclude_glob_exits_2() {
    let home = make_temp_dir("home");
    let status = cmd(&home)
        .args(["--exclude", "[", "--format", "json"])
        .status()
        .expect("run nsenso");
    assert_eq!(status.code(), Some(2));
}

#[test]
fn zero_timeout_exits_2() {
    let home = make_temp_dir("home");
    let status = cmd(&home)
        .args(["--timeout", "0"])
        .status()
        .expect("run nsenso");
    assert_eq!(status.code(), Some(2));
}

#[test]
fn unreadable_sysroot_exits_10() {
    let home = make_temp_dir("home");
    let missing = make_temp_dir("sysroot").join("does-not-exist");
    let out = cmd(&home)
        .args(["--format", "json", "--sysroot"])
        .arg(&missing)
        .output()
        .expect("run nsenso");
    assert_eq!(out.status.code(), Some(10));
    assert!(out.stdout.is_empty());
}

#[test]
fn json_with_every_check_skipped_has_empty_findings() {
    let home = make_temp_dir("home");
    let sysroot = make_temp_dir("sysroot");
    std::fs::create_dir_all(sysroot.join("etc")).expect("mkdir etc");
    std::fs::write(sysroot.join("etc/passwd"), "root:x:0:0:root:/root:/bin/sh\n")
        .expect("write passwd");

    let mut c = cmd(&home);
    c.args(["--format", "json", "--sysroot"]).arg(&sysroot);
    skip_all(&mut c);
    let out = c.output().expect("run nsenso");

    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json on stdout");
    assert_eq!(v["findings"], serde_json::json!([]));
    assert!(v["timestamp"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(v.get("host").is_some());
}

#[test]
fn list_checks_prints_registry_in_order() {
    let home = make_temp_dir("home");
    let out = cmd(&home).arg("--list-checks").output().expect("run nsenso");
    assert_eq!(out.status.code(), Some(0));

    let stdout = String::from_utf8_lossy(&out.stdout);
    let ids: Vec<&str> = stdout
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .collect();
    assert_eq!(ids, ALL_CHECKS);
}
