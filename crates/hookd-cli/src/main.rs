use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use hookd_core::config::Config;
use hookd_core::runner::{self, Outcome};

#[derive(Parser)]
#[command(
    name = "hookd",
    about = "Webhook deployment dispatcher — map authenticated triggers to deployment procedures",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, env = "HOOKD_CONFIG", default_value = "hookd.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dispatcher
    Serve {
        /// Override the configured bind address
        #[arg(long)]
        listen: Option<String>,
    },

    /// Validate the configuration and print a summary
    Check,

    /// Run a procedure locally without going through HTTP
    Run {
        /// Procedure id to run
        id: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Serve { listen } => serve(&cli.config, listen),
        Commands::Check => check(&cli.config),
        Commands::Run { id } => run_procedure(&cli.config, &id),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("loading config from {}", path.display()))
}

fn serve(config_path: &PathBuf, listen: Option<String>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(listen) = listen {
        config.listen = listen;
        config.listen_addr()?;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(hookd_server::serve(config))
}

fn check(config_path: &PathBuf) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    println!("config ok: {}", config_path.display());
    println!("  listen: {}", config.listen);
    println!("  auth:   {}", config.auth.name());
    for def in &config.procedures {
        println!(
            "  procedure {}: {} step(s), timeout {}s, on_busy {:?}",
            def.id,
            def.steps.len(),
            def.timeout_secs,
            def.on_busy,
        );
    }
    Ok(())
}

fn run_procedure(config_path: &PathBuf, id: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let def = config
        .procedures
        .iter()
        .find(|d| d.id == id)
        .with_context(|| format!("unknown procedure: {id}"))?;

    let rt = tokio::runtime::Runtime::new()?;
    let record = rt.block_on(runner::run(def));

    println!("started: {}", record.started_at.to_rfc3339());
    for (i, step) in record.steps.iter().enumerate() {
        let code = step
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "killed".into());
        println!(
            "step {} [{}] ({:.1}s): {}",
            i + 1,
            code,
            step.duration.as_secs_f64(),
            step.command
        );
        if !step.output.is_empty() {
            for line in step.output.lines() {
                println!("    {line}");
            }
        }
    }

    match record.outcome {
        Outcome::Succeeded => {
            println!("outcome: succeeded");
            Ok(())
        }
        Outcome::FailedAtStep(n) => bail!("failed at step {}", n + 1),
        Outcome::TimedOut => bail!("timed out after {}s", def.timeout_secs),
    }
}
