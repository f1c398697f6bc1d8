use std::path::PathBuf;

use anyhow::Result;
use attendance_core_types::{DriverInfo, Strategy};
use cdp_adapter::{BrowserLauncher, ChromiumLauncher, DriverError, DriverLocator};
use clap::Args;
use serde::Serialize;
use tracing::warn;

use crate::cli::context::CliContext;
use crate::cli::output::{print_structured, OutputFormat};
use crate::cli::run::StrategyArg;
use crate::errors::{auth_from_adapter, CycleError};

#[derive(Args, Clone, Debug)]
pub struct DoctorArgs {
    /// Strategy to check (defaults to browser)
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Browser executable to check instead of searching
    #[arg(long, value_name = "PATH")]
    pub driver_path: Option<PathBuf>,

    /// Launch the browser once to read its version
    #[arg(long)]
    pub handshake: bool,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    version: &'static str,
    build_date: &'static str,
    git_hash: &'static str,
    strategy: Strategy,
    driver: Option<DriverInfo>,
    expected_major: Option<u32>,
    problem: Option<Problem>,
}

#[derive(Debug, Serialize)]
struct Problem {
    kind: &'static str,
    message: String,
    hint: Option<&'static str>,
}

impl From<&CycleError> for Problem {
    fn from(err: &CycleError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            hint: err.hint(),
        }
    }
}

pub async fn cmd_doctor(args: DoctorArgs, ctx: &CliContext) -> Result<i32> {
    let config = ctx.config();
    let strategy: Strategy = args.strategy.unwrap_or(StrategyArg::Browser).into();
    let driver_path = args.driver_path.or_else(|| config.driver_path.clone());

    let mut report = DoctorReport {
        version: env!("CARGO_PKG_VERSION"),
        build_date: env!("BUILD_DATE"),
        git_hash: env!("GIT_HASH"),
        strategy,
        driver: None,
        expected_major: config.browser.expected_major,
        problem: None,
    };

    match DriverLocator::system().locate(strategy, driver_path.as_deref()) {
        Ok(driver) => report.driver = driver,
        Err(err) => report.problem = Some(Problem::from(&CycleError::from(err))),
    }

    if args.handshake {
        if let Some(driver) = report.driver.take() {
            match handshake(&driver, ctx).await {
                Ok(found) => {
                    if let (Some(expected), Some(major)) = (config.browser.expected_major, found.major_version()) {
                        if expected != major {
                            let err = CycleError::from(DriverError::VersionMismatch {
                                found: found.version.clone().unwrap_or_default(),
                                expected: expected.to_string(),
                            });
                            report.problem = Some(Problem::from(&err));
                        }
                    }
                    report.driver = Some(found);
                }
                Err(err) => {
                    report.problem = Some(Problem::from(&err));
                    report.driver = Some(driver);
                }
            }
        }
    }

    match ctx.output() {
        OutputFormat::Human => print_human(&report),
        format => print_structured(&report, format)?,
    }

    Ok(if report.problem.is_some() { 2 } else { 0 })
}

async fn handshake(driver: &DriverInfo, ctx: &CliContext) -> Result<DriverInfo, CycleError> {
    // Version checks happen here, not inside the launcher.
    let mut cdp = ctx.config().cdp_config();
    cdp.expected_major = None;
    let launcher = ChromiumLauncher::new(cdp);
    let mut page = launcher.launch(driver).await.map_err(auth_from_adapter)?;
    let version = page.browser_version().map(str::to_string);
    page.shutdown().await;
    match version {
        Some(version) => Ok(driver.clone().with_version(version)),
        None => {
            warn!("browser did not report a version");
            Ok(driver.clone())
        }
    }
}

fn print_human(report: &DoctorReport) {
    println!(
        "attendance-monitor {} (built {}, {})",
        report.version, report.build_date, report.git_hash
    );
    println!("strategy: {}", report.strategy);
    match &report.driver {
        Some(driver) => {
            println!("driver:   {}", driver.path.display());
            println!(
                "version:  {}",
                driver.version.as_deref().unwrap_or("unknown (use --handshake)")
            );
        }
        None if report.strategy == Strategy::Lightweight => {
            println!("driver:   not needed");
        }
        None => println!("driver:   not found"),
    }
    if let Some(expected) = report.expected_major {
        println!("expected: major {expected}");
    }
    if let Some(problem) = &report.problem {
        println!("problem:  {} ({})", problem.message, problem.kind);
        if let Some(hint) = problem.hint {
            println!("hint:     {hint}");
        }
    }
}
