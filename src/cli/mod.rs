use clap::{Parser, Subcommand};
use std::process::ExitCode;

use crate::infra::config::Config;

#[derive(Parser)]
#[command(name = "resilient-gateway")]
#[command(about = "Resilient Gateway - server and admin CLI")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP gateway (default)
    Serve,
    /// Health check the service
    Health {
        /// Service URL to check
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,
    },
    /// Print the service's error metrics snapshot
    Errors {
        /// Service URL to query
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,
    },
    /// Validate configuration
    Config {
        /// Validate config without starting service
        #[arg(long)]
        validate: bool,
    },
}

pub async fn run_commands(command: Commands) -> ExitCode {
    match command {
        Commands::Serve => match crate::infra::boot::run_server().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "server exited with error");
                ExitCode::FAILURE
            }
        },
        Commands::Health { url } => match health_check(&url).await {
            Ok(_) => {
                println!("✅ Service is healthy");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Health check failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Errors { url } => match show_errors(&url).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("❌ Error metrics unavailable: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Config { validate } => match load_config(validate) {
            Ok(cfg) => {
                println!("✅ Configuration is valid");
                println!("  Port: {}", cfg.port);
                println!("  Environment: {}", cfg.environment);
                if cfg.upstream.base_url.is_empty() {
                    println!("  Upstream: Not configured");
                } else {
                    println!("  Upstream: {}", cfg.upstream.base_url);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Configuration validation failed: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn health_check(url: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/healthz", url))
        .timeout(std::time::Duration::from_millis(500))
        .send()
        .await?;

    if response.status().is_success() {
        Ok(())
    } else {
        anyhow::bail!("HTTP {}", response.status())
    }
}

async fn show_errors(url: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/errors", url))
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    let snapshot: serde_json::Value = response.json().await?;

    println!("📊 Errors recorded: {}", snapshot["total"]);
    let entries = snapshot["entries"].as_array().cloned().unwrap_or_default();
    for entry in &entries {
        println!(
            "  {} x{} (last at {})",
            entry["key"].as_str().unwrap_or("?"),
            entry["count"],
            entry["last_occurrence"].as_str().unwrap_or("?")
        );
    }
    Ok(())
}

fn load_config(validate: bool) -> anyhow::Result<Config> {
    let cfg = Config::from_env_and_toml()?;
    if validate {
        cfg.validate()?;
    }
    Ok(cfg)
}
