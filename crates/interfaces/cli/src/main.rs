mod cycle_cmds;
mod tool_cmds;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lakeops_config::AppConfig;

#[derive(Debug, Parser)]
#[command(
    name = "lakeops",
    version,
    about = "Multi-agent operations automation for Lakebase databases"
)]
struct Cli {
    /// Configuration file; missing files fall back to built-in defaults.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one full automation cycle and print the results.
    Run {
        /// JSON or TOML file with cycle context keys.
        #[arg(long, value_name = "FILE")]
        context: Option<PathBuf>,
        #[arg(long, value_name = "ID")]
        project: Option<String>,
        /// Branch to sweep; repeat for several.
        #[arg(long = "branch", value_name = "BRANCH")]
        branches: Vec<String>,
        /// Print the full cycle report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run cycles back to back until interrupted.
    Watch {
        #[arg(long, value_name = "FILE")]
        context: Option<PathBuf>,
        /// Seconds between cycles; defaults to `schedule.cycle_interval_secs`.
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
    /// List every registered tool with its schedule, risk and approval flag.
    Tools {
        /// Only this agent's tools.
        #[arg(long)]
        agent: Option<String>,
    },
    /// Scheduled tools with their next fire times.
    Jobs {
        #[arg(long, default_value_t = 3)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            context,
            project,
            branches,
            json,
        } => {
            let overrides = cycle_cmds::Overrides { project, branches };
            cycle_cmds::run_once(&config, context.as_deref(), overrides, json).await?;
        }
        Commands::Watch { context, interval } => {
            cycle_cmds::watch(&config, context.as_deref(), interval).await?;
        }
        Commands::Tools { agent } => tool_cmds::list_tools(&config, agent.as_deref())?,
        Commands::Jobs { count } => tool_cmds::list_jobs(&config, count.max(1))?,
    }
    Ok(())
}
