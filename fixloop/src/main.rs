//! CI fix loop.
//!
//! Polls the build status of the current branch, hands failures to a
//! remediation agent, and publishes whatever the agent changed, until the
//! build is green or the time/attempt budget runs out.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use fixloop::check::check_once;
use fixloop::core::types::{BuildStatus, RunResult};
use fixloop::events::{ConsoleSink, EventSink, TracingSink};
use fixloop::exit_codes;
use fixloop::io::agent::CliAgent;
use fixloop::io::clock::SystemClock;
use fixloop::io::command::SystemCommandRunner;
use fixloop::io::config::{
    Config, DEFAULT_CONFIG_FILE, Overrides, default_config_template, load_config,
    write_config_text,
};
use fixloop::io::summary::write_summary;
use fixloop::logging;
use fixloop::orchestrator::{Orchestrator, RunConfig};

#[derive(Parser)]
#[command(
    name = "fixloop",
    version,
    about = "Poll CI, let an agent fix failures, publish the fix"
)]
struct Cli {
    /// Config file; relative paths resolve against --workdir.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Directory the configured commands and the agent run in.
    #[arg(long, global = true, default_value = ".")]
    workdir: PathBuf,
    /// Debug-level diagnostics on stderr (when RUST_LOG is unset).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a commented starter config.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Load and validate the config.
    Validate,
    /// Run the status check once and print the classification.
    Check,
    /// Run the fix loop until success, budget exhaustion, or the attempt cap.
    Run(RunArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Seconds between status checks.
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,
    /// Wall-clock budget in minutes.
    #[arg(long, value_name = "MINUTES")]
    timeout_minutes: Option<u64>,
    /// Maximum remediation attempts.
    #[arg(long, value_name = "N")]
    max_iterations: Option<u32>,
    /// Write the run result as JSON to this path.
    #[arg(long, value_name = "PATH")]
    summary: Option<PathBuf>,
    /// Suppress the per-cycle progress lines on stdout.
    #[arg(short, long)]
    quiet: bool,
}

impl RunArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            poll_interval_secs: self.poll_interval,
            timeout_minutes: self.timeout_minutes,
            max_work_iterations: self.max_iterations,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config_path = resolve(&cli.workdir, &cli.config);
    match cli.command {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Validate => cmd_validate(&config_path),
        Command::Check => cmd_check(&config_path, &cli.workdir),
        Command::Run(args) => cmd_run(&config_path, &cli.workdir, &args),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config_text(config_path, default_config_template())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(config_path: &Path) -> Result<i32> {
    load_config(config_path)?;
    println!("ok");
    Ok(exit_codes::OK)
}

fn cmd_check(config_path: &Path, workdir: &Path) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let runner = command_runner(&cfg, workdir);
    let outcome = check_once(&runner, &cfg.commands.check).context("status check failed")?;
    println!("{}", outcome.status);
    Ok(status_exit_code(outcome.status))
}

fn cmd_run(config_path: &Path, workdir: &Path, args: &RunArgs) -> Result<i32> {
    let cfg = load_config(config_path)?.with_overrides(&args.overrides())?;
    let mut run_config = cfg.run_config();
    if let Some(transcript) = run_config.work.transcript.take() {
        run_config.work.transcript = Some(resolve(workdir, &transcript));
    }

    let runner = command_runner(&cfg, workdir);
    let agent = CliAgent::new(workdir, cfg.output_limit_bytes);
    let result = if args.quiet {
        drive(&runner, &agent, &TracingSink, &run_config)?
    } else {
        drive(&runner, &agent, &(ConsoleSink, TracingSink), &run_config)?
    };

    if let Some(path) = &args.summary {
        write_summary(path, &result)?;
    }
    Ok(run_exit_code(&result))
}

fn drive<S: EventSink>(
    runner: &SystemCommandRunner,
    agent: &CliAgent,
    events: &S,
    config: &RunConfig,
) -> Result<RunResult> {
    let result = Orchestrator::new(runner, agent, &SystemClock, events).run(config)?;
    Ok(result)
}

fn command_runner(cfg: &Config, workdir: &Path) -> SystemCommandRunner {
    SystemCommandRunner::new(workdir, cfg.command_timeout(), cfg.output_limit_bytes)
}

fn resolve(workdir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workdir.join(path)
    }
}

fn status_exit_code(status: BuildStatus) -> i32 {
    if status == BuildStatus::Success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    }
}

/// Exit 0 only for a green build: success, or a budget run whose final check saw success.
fn run_exit_code(result: &RunResult) -> i32 {
    if result.is_success() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    }
}
