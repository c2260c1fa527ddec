//! CLI argument definitions using clap.

use std::path::PathBuf;

use anyhow::{Context, Result};
use auditor_config::{AuditorConfig, ConfigLoader};
use auditor_telemetry::{init_tracing, shutdown_tracing};
use clap::{Parser, Subcommand};

use crate::commands;

/// AI Cost Auditor - LLM cost auditing proxy
#[derive(Parser, Debug)]
#[command(name = "ai-cost-auditor")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// YAML or TOML configuration file
    #[arg(short, long, env = "AUDITOR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    #[command(visible_alias = "run")]
    Serve,

    /// Apply pending database migrations
    Migrate,

    /// Create the admin user, default directory entries, and a sample key
    Seed(commands::seed::SeedArgs),

    /// Print the Argon2 hash of a password
    #[command(name = "hash-password")]
    HashPassword(commands::hash_password::HashPasswordArgs),
}

impl Cli {
    /// Load configuration from the file (if any) and the environment
    pub async fn load_config(&self) -> Result<AuditorConfig> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &self.config {
            loader = loader.with_file(path);
        }
        loader.load().await.context("Failed to load configuration")
    }

    /// Run the selected command
    pub async fn execute(self) -> Result<()> {
        if let Commands::HashPassword(args) = &self.command {
            return commands::hash_password::execute(args);
        }

        let config = self.load_config().await?;
        let provider = init_tracing(&config.telemetry)?;

        let result = match &self.command {
            Commands::Serve => commands::serve::execute(config).await,
            Commands::Migrate => commands::migrate::execute(config).await,
            Commands::Seed(args) => commands::seed::execute(config, args).await,
            Commands::HashPassword(args) => commands::hash_password::execute(args),
        };

        shutdown_tracing(provider);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_seed_defaults() {
        let cli = Cli::try_parse_from(["ai-cost-auditor", "seed"]).unwrap();
        match cli.command {
            Commands::Seed(args) => {
                assert_eq!(args.admin_email, "admin@local");
                assert!(!args.skip_sample_key);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_flag() {
        let cli = Cli::try_parse_from(["ai-cost-auditor", "serve", "--config", "auditor.yaml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("auditor.yaml")));
    }
}
