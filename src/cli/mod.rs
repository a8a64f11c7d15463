use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use crate::checks::{self, CheckContext};
use crate::engine::{Engine, EngineOptions};
use crate::logging::LogConfig;
use crate::ui::UiConfig;

/// Upper bound for a single external command inside a check.
const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "nsenso",
    version,
    about = "Linux security scanner: sudo/SUID, world-writable files, accounts, root processes and kernel hardening"
)]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Time budget per check, in seconds.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
    #[arg(long)]
    pub parallel: bool,
    /// Inspect a mounted root filesystem instead of `/` (file-based checks).
    #[arg(long, default_value = "/")]
    pub sysroot: PathBuf,
    /// Walk root for the SUID and world-writable scans; repeatable.
    #[arg(long = "root")]
    pub roots: Vec<PathBuf>,
    #[arg(long)]
    pub exclude: Vec<String>,
    /// Disable a check by id; repeatable.
    #[arg(long)]
    pub skip: Vec<String>,
    #[arg(long)]
    pub list_checks: bool,
    #[arg(long)]
    pub show_config: bool,
    #[arg(long = "no-color")]
    pub no_color: bool,
    #[arg(long = "no-progress")]
    pub no_progress: bool,
    #[arg(long)]
    pub verbose: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::logging::init_logging(&LogConfig::verbose(cli.verbose));

    let home_dir = crate::platform::home_dir();
    let env_config_path = std::env::var_os("NSENSO_CONFIG").map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        home_dir.as_deref(),
    )
    .map_err(crate::exit::invalid_args_err)?;

    if cli.show_config {
        let s = toml::to_string_pretty(&cfg).context("failed to render config")?;
        print!("{s}");
        return Ok(());
    }

    if cli.list_checks {
        let mut out = io::stdout().lock();
        crate::ui::write_check_list(&mut out, &checks::registry())
            .context("failed to write check list")?;
        return Ok(());
    }

    let mut disabled = cfg.scan.disabled_checks.clone();
    disabled.extend(cli.skip.iter().cloned());
    disabled.sort();
    disabled.dedup();
    let selected = checks::select_checks(&disabled).map_err(crate::exit::invalid_args_err)?;

    let roots: Vec<PathBuf> = if !cli.roots.is_empty() {
        cli.roots.clone()
    } else if !cfg.scan.roots.is_empty() {
        cfg.scan.roots.iter().map(PathBuf::from).collect()
    } else {
        vec![cli.sysroot.clone()]
    };

    let mut exclude = cfg.scan.exclude.clone();
    exclude.extend(cli.exclude.iter().cloned());
    exclude.sort();
    exclude.dedup();
    let excludes = crate::scan::build_exclude_set(&cli.sysroot, &roots, &exclude)
        .map_err(crate::exit::invalid_args_err)?;

    let timeout_secs = cli.timeout.unwrap_or(cfg.scan.timeout_secs);
    if timeout_secs == 0 {
        return Err(crate::exit::invalid_args("scan.timeout_secs must be greater than 0"));
    }
    let check_budget = Duration::from_secs(timeout_secs);

    let ctx = CheckContext {
        sysroot: cli.sysroot.clone(),
        roots,
        excludes,
        timeout: std::cmp::min(check_budget, MAX_COMMAND_TIMEOUT),
        deadline: None,
        max_paths: cfg.scan.max_paths,
    };

    let engine = Engine::new(
        EngineOptions {
            check_budget,
            parallel: cli.parallel || cfg.scan.parallel,
            show_progress: !cli.no_progress && cli.format == OutputFormat::Text,
        },
        ctx,
    )?;

    info!(
        checks = selected.len(),
        sysroot = %cli.sysroot.display(),
        "starting scan"
    );
    let report = engine.run(&selected);

    let mut out = io::stdout().lock();
    match cli.format {
        OutputFormat::Json => {
            crate::report::write_json(&mut out, &report).map_err(crate::exit::report_failed_err)?;
        }
        OutputFormat::Text => {
            let ui_cfg = UiConfig {
                color: io::stdout().is_terminal() && cfg.ui.color && !cli.no_color,
                verbose: cli.verbose,
            };
            crate::ui::write_text_report(&mut out, &report, &ui_cfg)
                .context("failed to write text report")
                .map_err(crate::exit::report_failed_err)?;
        }
    }
    out.flush()
        .context("failed to flush report")
        .map_err(crate::exit::report_failed_err)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn format_defaults_to_text_and_rejects_unknown() {
        let cli = Cli::try_parse_from(["nsenso"]).expect("parse");
        assert_eq!(cli.format, OutputFormat::Text);

        let cli = Cli::try_parse_from(["nsenso", "--format", "json"]).expect("parse");
        assert_eq!(cli.format, OutputFormat::Json);

        assert!(Cli::try_parse_from(["nsenso", "--format", "yaml"]).is_err());
        assert!(Cli::try_parse_from(["nsenso", "--timeout", "0"]).is_err());
    }
}
