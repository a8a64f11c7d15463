use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use wait_timeout::ChildExt;

use crate::core::HostInfo;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `cmd` with a C locale so that parsers see untranslated output.
pub fn run_command(cmd: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    let mut command = Command::new(cmd);
    command
        .args(args)
        .env("LC_ALL", "C")
        .env("LANG", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start process: {cmd}"))?;

    // Drain both pipes while waiting, otherwise a chatty child blocks on a
    // full pipe and looks like a timeout.
    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let status = match child
        .wait_timeout(timeout)
        .with_context(|| format!("failed to wait for process: {cmd}"))?
    {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("timed out after {timeout:?}: {cmd}"));
        }
    };

    let stdout = stdout_reader
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default();
    let stderr = stderr_reader
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default();

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
}

#[cfg(unix)]
pub fn effective_uid() -> u32 {
    unsafe { libc::geteuid() as u32 }
}

#[cfg(not(unix))]
pub fn effective_uid() -> u32 {
    u32::MAX
}

#[cfg(unix)]
pub fn username_for_uid(uid: u32) -> Option<String> {
    use std::ffi::CStr;

    unsafe {
        let bufsize = libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX);
        let bufsize = if bufsize <= 0 {
            16 * 1024
        } else {
            bufsize as usize
        };
        let mut buf = vec![0u8; bufsize];
        let mut pwd: libc::passwd = std::mem::zeroed();
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        let rc = libc::getpwuid_r(
            uid as libc::uid_t,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        );
        if rc != 0 || result.is_null() || pwd.pw_name.is_null() {
            return None;
        }

        let name = CStr::from_ptr(pwd.pw_name).to_string_lossy().to_string();
        if name.trim().is_empty() {
            return None;
        }
        Some(name)
    }
}

#[cfg(not(unix))]
pub fn username_for_uid(_uid: u32) -> Option<String> {
    None
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    let mut buf = vec![0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
    if name.is_empty() { None } else { Some(name) }
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    None
}

/// Joins an absolute host path such as `/etc/shadow` onto `sysroot`.
pub fn host_path(sysroot: &Path, absolute: &str) -> PathBuf {
    sysroot.join(absolute.trim_start_matches('/'))
}

pub fn host_info(sysroot: &Path) -> HostInfo {
    let euid = effective_uid();
    let kernel_release = std::fs::read_to_string(host_path(sysroot, "/proc/sys/kernel/osrelease"))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let os_name = std::fs::read_to_string(host_path(sysroot, "/etc/os-release"))
        .ok()
        .and_then(|s| parse_os_release_name(&s))
        .unwrap_or_else(|| "unknown".to_string());

    HostInfo {
        hostname: hostname().unwrap_or_else(|| "unknown".to_string()),
        os_name,
        kernel_release,
        euid,
        is_root: euid == 0,
    }
}

fn parse_os_release_name(contents: &str) -> Option<String> {
    let mut name = None;
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "PRETTY_NAME" => return Some(value),
            "NAME" => name = Some(value),
            _ => {}
        }
    }
    name
}

/// True when at least one of the files the checks depend on is readable.
pub fn has_readable_state(sysroot: &Path) -> bool {
    ["/etc/passwd", "/proc/sys/kernel", "/etc"]
        .iter()
        .any(|p| std::fs::metadata(host_path(sysroot, p)).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_path_stays_under_sysroot() {
        let p = host_path(Path::new("/mnt/image"), "/etc/shadow");
        assert_eq!(p, PathBuf::from("/mnt/image/etc/shadow"));
        assert_eq!(host_path(Path::new("/"), "/etc"), PathBuf::from("/etc"));
    }

    #[test]
    fn os_release_prefers_pretty_name() {
        let s = "NAME=\"Debian GNU/Linux\"\nPRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\n";
        assert_eq!(
            parse_os_release_name(s).as_deref(),
            Some("Debian GNU/Linux 12 (bookworm)")
        );
        assert_eq!(parse_os_release_name("NAME=Alpine\n").as_deref(), Some("Alpine"));
        assert_eq!(parse_os_release_name(""), None);
    }

    #[cfg(unix)]
    #[test]
    fn run_command_reports_timeout() {
        let err = run_command("sleep", &["5"], Duration::from_millis(100)).unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn run_command_collects_stdout_and_exit_code() {
        let out = run_command("sh", &["-c", "echo hello; exit 3"], Duration::from_secs(5))
            .expect("run sh");
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn run_command_forces_c_locale() {
        let out = run_command("sh", &["-c", "echo \"$LC_ALL/$LANG\""], Duration::from_secs(5))
            .expect("run sh");
        assert_eq!(out.stdout.trim(), "C/C");
    }

    #[test]
    fn missing_binary_is_an_error() {
        assert!(run_command("nsenso-no-such-binary", &[], Duration::from_secs(1)).is_err());
    }
}
