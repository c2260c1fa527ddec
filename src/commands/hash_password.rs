//! Hash-password command - produce a stored password hash.

use anyhow::{bail, Result};
use clap::Args;

/// Arguments for the hash-password command.
#[derive(Args, Debug)]
pub struct HashPasswordArgs {
    /// Password to hash
    pub password: String,
}

/// Execute the hash-password command.
pub fn execute(args: &HashPasswordArgs) -> Result<()> {
    if args.password.is_empty() {
        bail!("password must not be empty");
    }
    let hash = auditor_server::hash_password(&args.password)?;
    println!("{hash}");
    Ok(())
}
