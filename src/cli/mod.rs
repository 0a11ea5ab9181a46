//! Command-line interface.

mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use console::style;
use tracing::{error, warn};

use crate::browser::BrowserDriver;
use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::hour_window::HourWindow;
use crate::runner::{exit_code, Runner};
use crate::scratch::ScratchDir;
use crate::sites::{PortalSessions, SessionTimeouts};

/// Exit code for configuration problems, before anything ran.
const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "pricegrab")]
#[command(about = "Collect the hour's price, store and promotion files from retail price portals")]
#[command(version)]
pub struct Cli {
    /// Configuration file (JSON, TOML or YAML)
    #[arg(short, long, env = "PRICEGRAB_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output directory (overrides the config file)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only run these users
    #[arg(short, long, num_args = 1..)]
    user: Vec<String>,

    /// Only run these sites
    #[arg(short, long, num_args = 1..)]
    site: Vec<String>,

    /// Collect this hour instead of the clock's (YYYYMMDDHH)
    #[arg(long, value_parser = parse_hour)]
    hour: Option<HourWindow>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_hour(s: &str) -> Result<HourWindow, String> {
    HourWindow::from_stamp(s).map_err(|_| format!("expected YYYYMMDDHH, got {:?}", s))
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Parse arguments, run every selected user and report.
pub async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match Config::load_from_path(&cli.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", style("✗").red(), e);
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };
    if let Some(output) = cli.output {
        config.output_dir = output;
    }

    let sessions = PortalSessions::new(
        config.http_options(),
        SessionTimeouts {
            login: Duration::from_secs(config.login_timeout),
            download_wait: Duration::from_secs(config.download_wait),
            page: Duration::from_secs(config.browser.timeout),
        },
        ScratchDir::new(config.scratch_dir()),
        BrowserDriver::new(config.browser.clone(), config.scratch_dir()),
    );

    let mut runner = Runner::new(&config, Box::new(sessions))
        .only_users(cli.user)
        .only_sites(cli.site)
        .hour(cli.hour);

    let deadline = config.run_timeout.map(Duration::from_secs);
    let mut interrupted = false;
    tokio::select! {
        result = runner.run() => {
            if let Err(e) = result {
                error!("Run failed: {:#}", e);
                interrupted = true;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; cleaning up");
            interrupted = true;
        }
        _ = run_deadline(deadline) => {
            warn!("Run timeout reached; cleaning up");
            interrupted = true;
        }
    }
    runner.shutdown().await;

    let summaries = runner.summaries();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(summaries)?);
    } else {
        report::print_summaries(summaries);
    }

    let code = if interrupted { 1 } else { exit_code(summaries) };
    Ok(ExitCode::from(code))
}

async fn run_deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}
