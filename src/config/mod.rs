use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub ui: UiConfig,
    pub scan: ScanConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanConfig {
    pub parallel: bool,
    pub timeout_secs: u64,
    pub roots: Vec<String>,
    pub exclude: Vec<String>,
    pub disabled_checks: Vec<String>,
    pub max_paths: usize,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            ui: UiConfig { color: true },
            scan: ScanConfig {
                parallel: false,
                timeout_secs: 30,
                roots: Vec::new(),
                exclude: Vec::new(),
                disabled_checks: Vec::new(),
                max_paths: 200,
            },
            config_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    scan: Option<RawScanConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUiConfig {
    color: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawScanConfig {
    parallel: Option<bool>,
    timeout_secs: Option<u64>,
    roots: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    disabled_checks: Option<Vec<String>>,
    max_paths: Option<usize>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/nsenso/config.toml")
}

/// Defaults, then the TOML file (if present), then `NSENSO_*` variables.
pub fn load(config_path: Option<&Path>, home_dir: Option<&Path>) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .or_else(|| home_dir.map(default_config_path));

    if let Some(path) = path {
        if config_path.is_some() || path.exists() {
            let s = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            let raw: RawConfig = toml::from_str(&s).with_context(|| {
                format!("failed to parse config file (TOML): {}", path.display())
            })?;
            apply_raw_config(&mut cfg, raw);
            cfg.config_path = Some(path.display().to_string());
        }
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
    }

    if let Some(scan) = raw.scan {
        if let Some(parallel) = scan.parallel {
            cfg.scan.parallel = parallel;
        }
        if let Some(timeout_secs) = scan.timeout_secs {
            cfg.scan.timeout_secs = timeout_secs;
        }
        if let Some(roots) = scan.roots {
            cfg.scan.roots = roots;
        }
        if let Some(exclude) = scan.exclude {
            cfg.scan.exclude = exclude;
        }
        if let Some(disabled_checks) = scan.disabled_checks {
            cfg.scan.disabled_checks = disabled_checks;
        }
        if let Some(max_paths) = scan.max_paths {
            cfg.scan.max_paths = max_paths;
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("NSENSO_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "NSENSO_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("NSENSO_SCAN_PARALLEL") {
        cfg.scan.parallel = parse_bool(&v).with_context(|| "NSENSO_SCAN_PARALLEL")?;
    }
    if let Ok(v) = std::env::var("NSENSO_SCAN_TIMEOUT_SECS") {
        cfg.scan.timeout_secs = v
            .trim()
            .parse::<u64>()
            .with_context(|| "NSENSO_SCAN_TIMEOUT_SECS")?;
    }
    if let Ok(v) = std::env::var("NSENSO_SCAN_MAX_PATHS") {
        cfg.scan.max_paths = v
            .trim()
            .parse::<usize>()
            .with_context(|| "NSENSO_SCAN_MAX_PATHS")?;
    }
    if let Ok(v) = std::env::var("NSENSO_SCAN_ROOTS") {
        let parts = split_list(&v);
        if !parts.is_empty() {
            cfg.scan.roots = parts;
        }
    }
    if let Ok(v) = std::env::var("NSENSO_SCAN_EXCLUDE") {
        let parts = split_list(&v);
        if !parts.is_empty() {
            cfg.scan.exclude = parts;
        }
    }
    if let Ok(v) = std::env::var("NSENSO_SCAN_DISABLE") {
        cfg.scan.disabled_checks = split_list(&v);
    }

    Ok(())
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "invalid boolean: {s} (expected true|false|1|0|yes|no|on|off)"
        )),
    }
}
