//! `fleetcheck` binary.
//!
//! ```text
//! fleetcheck run --target dc01.corp.example --target dc02.corp.example
//! fleetcheck run --format json --output report.json
//! fleetcheck validate --config fleetcheck.yaml
//! fleetcheck categories
//! ```
//!
//! Exit status: 0 healthy, 1 warning or category errors, 2 critical, 3 configuration error.

use clap::{Parser, Subcommand};
use fleetcheck::configuration::get_configuration;
use fleetcheck::error::ConfigError;
use fleetcheck::health::{builtin_categories, Orchestrator, Target};
use fleetcheck::probes::builtin_probe;
use fleetcheck::report::{FileSink, ReportFormat, ReportSink, StdoutSink};
use fleetcheck::telemetry::{get_subscriber, init_subscriber};
use std::path::PathBuf;

const CONFIG_ERROR_EXIT: i32 = 3;
const RUNTIME_ERROR_EXIT: i32 = 4;

#[derive(Parser, Debug)]
#[command(
    name = "fleetcheck",
    version,
    about = "Health checks for a fleet of directory servers",
    long_about = "Runs diagnostic categories (DNS, service ports, replication, time sync, \n\
        services, resources) against every server in the fleet and reports one \n\
        classified result per category and server."
)]
struct Cli {
    /// Path to the configuration file (default: ./fleetcheck.yaml when present)
    #[arg(long, short, global = true, value_name = "FILE", env = "FLEETCHECK_CONFIG")]
    config: Option<PathBuf>,
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, value_name = "FILTER", default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every configured category and print the fleet report
    Run {
        /// Server to check; repeat for several. Overrides targets from configuration
        #[arg(long = "target", short = 't', value_name = "HOST")]
        targets: Vec<String>,
        /// Report format
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
        /// Write the report to a file instead of stdout
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Load the configuration and build the run plan without running it
    Validate,
    /// List the built-in categories
    Categories,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let subscriber = get_subscriber("fleetcheck".into(), cli.log_level.clone(), std::io::stderr);
    init_subscriber(subscriber);

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            if err.downcast_ref::<ConfigError>().is_some() {
                CONFIG_ERROR_EXIT
            } else {
                RUNTIME_ERROR_EXIT
            }
        }
    };
    std::process::exit(code);
}

async fn execute(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Categories => {
            for category in builtin_categories() {
                let probe = if builtin_probe(&category.key, None).is_some() {
                    "built-in probe"
                } else {
                    "external probe required"
                };
                println!("{:<12} {:<24} {}", category.key, category.name, probe);
            }
            Ok(0)
        }
        Commands::Validate => {
            let settings = get_configuration(cli.config.as_deref())?;
            let orchestrator = settings.build_orchestrator()?;
            print_plan(&orchestrator);
            Ok(0)
        }
        Commands::Run {
            targets,
            format,
            output,
        } => {
            let settings = get_configuration(cli.config.as_deref())?;
            let orchestrator = settings.build_orchestrator()?;

            let targets = if targets.is_empty() {
                settings.explicit_targets()
            } else {
                Some(targets.into_iter().map(Target::from).collect())
            };
            let report = orchestrator.run_all(targets).await;

            let sink: Box<dyn ReportSink> = match output {
                Some(path) => Box::new(FileSink::new(path, format)),
                None => Box::new(StdoutSink::new(format)),
            };
            sink.publish(&report)?;
            Ok(report.exit_code())
        }
    }
}

fn print_plan(orchestrator: &Orchestrator) {
    let options = orchestrator.options();
    println!("Configuration is valid");
    println!(
        "  probe timeout {}s, max concurrency {}, deadline {}",
        options.probe_timeout.as_secs(),
        options.max_concurrency,
        options
            .deadline
            .map(|deadline| format!("{}s", deadline.as_secs()))
            .unwrap_or_else(|| "none".to_string())
    );
    for plan in orchestrator.plans() {
        let probe = if plan.has_probe() { "" } else { " (no probe registered)" };
        println!("\n{}{}", plan.name(), probe);
        for (metric, bounds) in plan.policy().metrics() {
            println!("  {metric}: {bounds}");
        }
        for (switch, enabled) in plan.policy().switches() {
            println!("  {switch}: {}", if enabled { "on" } else { "off" });
        }
    }
}
