use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use attendance_core_types::{RunMode, Strategy};
use cdp_adapter::{ChromiumLauncher, DriverLocator};
use clap::{Args, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::context::CliContext;
use crate::cli::credentials::resolve_credentials;
use crate::config::{parse_interval, RunConfig};
use crate::errors::CycleError;
use crate::monitor::Monitor;
use crate::reporter::{ConsoleReporter, FanoutReporter, ReportEvent, Reporter, SnapshotExporter};
use crate::session::{BrowserAutomationStrategy, LightweightStrategy, SessionStrategy};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ModeArg {
    /// A single check, then exit
    Once,
    /// Check repeatedly on an interval
    Monitor,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Once => RunMode::Once,
            ModeArg::Monitor => RunMode::Monitor,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StrategyArg {
    /// Cookie-jar HTTP session
    Lightweight,
    /// Real browser over the DevTools protocol
    Browser,
}

impl From<StrategyArg> for Strategy {
    fn from(strategy: StrategyArg) -> Self {
        match strategy {
            StrategyArg::Lightweight => Strategy::Lightweight,
            StrategyArg::Browser => Strategy::Browser,
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Run a single check or keep monitoring
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Time between checks in monitor mode (seconds, or e.g. 5m)
    #[arg(long, value_name = "SECS", value_parser = interval_arg)]
    pub interval: Option<u64>,

    /// Stop after this many checks in monitor mode
    #[arg(long, value_name = "N")]
    pub max_checks: Option<u32>,

    /// How to log in and fetch the attendance page
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Browser executable used by the browser strategy
    #[arg(long, value_name = "PATH")]
    pub driver_path: Option<PathBuf>,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub show_browser: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Write a CSV file for every reported snapshot into this directory
    #[arg(long, value_name = "DIR")]
    pub export_dir: Option<PathBuf>,
}

fn interval_arg(raw: &str) -> Result<u64, String> {
    parse_interval(raw).map_err(|err| err.to_string())
}

impl RunArgs {
    /// Command-line flags win over file values.
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if let Some(interval) = self.interval {
            config.interval_secs = interval;
        }
        if self.max_checks.is_some() {
            config.max_checks = self.max_checks;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy.into();
        }
        if self.driver_path.is_some() {
            config.driver_path = self.driver_path.clone();
        }
        if self.export_dir.is_some() {
            config.report.export_dir = self.export_dir.clone();
        }
        config.show_browser |= self.show_browser;
        config.verbose |= self.verbose;
    }
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<i32> {
    let mut config = ctx.config().clone();
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let mut reporter = build_reporter(&config, ctx);

    let strategy: Arc<dyn SessionStrategy> = match config.strategy {
        Strategy::Lightweight => Arc::new(LightweightStrategy::new(&config)?),
        Strategy::Browser => {
            let driver = match DriverLocator::system()
                .locate(Strategy::Browser, config.driver_path.as_deref())
            {
                Ok(Some(driver)) => driver,
                Ok(None) => bail!("no browser driver resolved"),
                Err(err) => {
                    let err = CycleError::from(err);
                    error!(kind = err.kind(), %err, "driver lookup failed");
                    let event = ReportEvent::Failure {
                        cycle: 0,
                        error: err,
                        fatal: true,
                    };
                    reporter.report(&event)?;
                    return Ok(2);
                }
            };
            info!(path = %driver.path.display(), "using browser driver");
            let launcher = Arc::new(ChromiumLauncher::new(config.cdp_config()));
            Arc::new(BrowserAutomationStrategy::new(launcher, driver, &config)?)
        }
    };

    let credentials = resolve_credentials()?;
    let mut monitor = Monitor::new(&config, strategy, Box::new(reporter), credentials)?;
    spawn_signal_listener(monitor.shutdown_token());

    let outcome = monitor.run().await;
    Ok(outcome.exit_code())
}

fn build_reporter(config: &RunConfig, ctx: &CliContext) -> FanoutReporter {
    let mut reporter =
        FanoutReporter::new().with(Box::new(ConsoleReporter::stdout(ctx.output().into())));
    if let Some(dir) = &config.report.export_dir {
        reporter = reporter.with(Box::new(SnapshotExporter::new(dir.clone())));
    }
    reporter
}

/// Cancels `token` on Ctrl-C, or SIGTERM on unix.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "SIGTERM handler unavailable");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("shutdown requested");
        token.cancel();
    });
}
