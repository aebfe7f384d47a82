//! Command-line interface
//!
//! ```bash
//! # List a prefix, all pages
//! s3v4 ls s3://bucket/photos/ --delimiter /
//!
//! # Buckets
//! s3v4 buckets
//! s3v4 mb s3://bucket --acl private
//! s3v4 rb s3://bucket
//! ```

pub mod args;
pub mod commands;

use crate::config;
use crate::s3::S3Client;
use anyhow::{Context, Result};
use tracing::debug;

pub use args::{Cli, Commands};

/// Run one CLI command to completion.
pub async fn run(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref(), cli.profile.as_deref())?;
    let profile = config
        .get_profile(cli.profile.as_deref())
        .ok_or_else(|| anyhow::anyhow!("No profile found in configuration"))?;
    debug!(?profile, "using profile");

    let client = S3Client::new(profile.credentials(), profile.endpoint())
        .context("Failed to build S3 client")?;

    match cli.command {
        Commands::Ls {
            path,
            delimiter,
            max_keys,
        } => commands::cmd_ls(&client, &path, delimiter, max_keys).await,
        Commands::Buckets => commands::cmd_buckets(&client).await,
        Commands::Mb { bucket, acl } => commands::cmd_mb(&client, &bucket, acl.as_deref()).await,
        Commands::Rb { bucket } => commands::cmd_rb(&client, &bucket).await,
    }
}
