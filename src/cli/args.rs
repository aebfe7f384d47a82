use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "s3v4")]
#[command(version, about = "SigV4-signed S3 bucket operations", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (YAML); environment variables are used when absent
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Profile to use from config
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List every object under a prefix, following pagination
    Ls {
        /// S3 path (s3://bucket/prefix)
        path: String,

        /// Group keys by this delimiter
        #[arg(long)]
        delimiter: Option<String>,

        /// Page size requested from the server
        #[arg(long)]
        max_keys: Option<u32>,
    },

    /// List buckets
    Buckets,

    /// Make bucket
    Mb {
        /// Bucket name (s3://bucket)
        bucket: String,

        /// Canned ACL (private, public-read, ...)
        #[arg(long)]
        acl: Option<String>,
    },

    /// Remove an empty bucket
    Rb {
        /// Bucket name (s3://bucket)
        bucket: String,
    },
}

/// Split `s3://bucket/key` (or mc-style `s3/bucket/key`) into bucket and key.
pub fn parse_s3_path(path: &str) -> anyhow::Result<(String, Option<String>)> {
    let path = path.trim();

    let stripped = if let Some(p) = path.strip_prefix("s3://") {
        p
    } else if let Some(p) = path.strip_prefix("s3/") {
        p
    } else {
        anyhow::bail!("Invalid S3 path format. Expected: s3://bucket/key");
    };

    let (bucket, key) = match stripped.split_once('/') {
        Some((bucket, key)) => (bucket, key),
        None => (stripped, ""),
    };

    if bucket.is_empty() {
        anyhow::bail!("Bucket name cannot be empty");
    }

    let key = if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    };

    Ok((bucket.to_string(), key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_path() {
        assert_eq!(
            parse_s3_path("s3://mybucket").unwrap(),
            ("mybucket".to_string(), None)
        );
        assert_eq!(
            parse_s3_path("s3://mybucket/path/to/object.txt").unwrap(),
            ("mybucket".to_string(), Some("path/to/object.txt".to_string()))
        );
        assert_eq!(
            parse_s3_path("s3/mybucket/").unwrap(),
            ("mybucket".to_string(), None)
        );

        assert!(parse_s3_path("mybucket").is_err());
        assert!(parse_s3_path("s3://").is_err());
        assert!(parse_s3_path("http://mybucket").is_err());
    }

    #[test]
    fn test_cli_parses_ls() {
        let cli = Cli::parse_from(["s3v4", "ls", "s3://b/p", "--delimiter", "/", "--max-keys", "10"]);
        match cli.command {
            Commands::Ls {
                path,
                delimiter,
                max_keys,
            } => {
                assert_eq!(path, "s3://b/p");
                assert_eq!(delimiter.as_deref(), Some("/"));
                assert_eq!(max_keys, Some(10));
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.log_level, "info");
    }
}
