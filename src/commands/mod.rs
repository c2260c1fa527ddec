//! CLI commands module.

pub mod hash_password;
pub mod migrate;
pub mod seed;
pub mod serve;
