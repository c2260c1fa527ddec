//! # AI Cost Auditor
//!
//! LLM proxy and accounting backend: virtual keys with budgets, a usage
//! ledger, spend aggregation, and prompt-repetition waste detection.
//!
//! ## Usage
//!
//! ```bash
//! # Create the admin user and a sample key
//! ai-cost-auditor seed
//!
//! # Start with a config file
//! ai-cost-auditor --config auditor.yaml serve
//!
//! # Start with environment overrides
//! AUDITOR_PORT=9000 AUDITOR_OPENAI_API_KEY=sk-... ai-cost-auditor serve
//! ```

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    Cli::parse().execute().await
}
