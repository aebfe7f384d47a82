use crate::cli::args::parse_s3_path;
use crate::s3::{CannedAcl, HttpTransport, ListParams, S3Client};
use anyhow::{Context, Result};
use std::io::Write;
use tracing::info;

/// Format bytes in human readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exponent = (bytes_f64.ln() / 1024_f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);

    let value = bytes_f64 / 1024_f64.powi(exponent as i32);

    if exponent == 0 {
        format!("{} {}", bytes, UNITS[exponent])
    } else {
        format!("{:.2} {}", value, UNITS[exponent])
    }
}

/// List every object under `s3://bucket/prefix`.
pub async fn cmd_ls<T: HttpTransport>(
    client: &S3Client<T>,
    path: &str,
    delimiter: Option<String>,
    max_keys: Option<u32>,
) -> Result<()> {
    let (bucket, prefix) = parse_s3_path(path)?;

    let params = ListParams {
        prefix,
        delimiter,
        marker: None,
        max_keys,
    };

    let listing = client
        .list_bucket_all(&bucket, &params)
        .await
        .context(format!("Failed to list s3://{}", bucket))?;

    // Buffer stdout to avoid per-line flush syscalls
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::with_capacity(64 * 1024, stdout.lock());

    for prefix in &listing.common_prefixes {
        writeln!(out, "{:>28} {:>12} {}", "", "PRE", prefix)?;
    }

    let mut total: u64 = 0;
    for obj in &listing.contents {
        total += obj.size;
        writeln!(
            out,
            "{:>28} {:>12} {}",
            obj.last_modified.as_deref().unwrap_or("-"),
            format_bytes(obj.size),
            obj.key
        )?;
    }
    out.flush()?;

    info!(
        bucket = %bucket,
        objects = listing.contents.len(),
        prefixes = listing.common_prefixes.len(),
        total = %format_bytes(total),
        "listing complete"
    );
    Ok(())
}

pub async fn cmd_buckets<T: HttpTransport>(client: &S3Client<T>) -> Result<()> {
    let listing = client
        .list_buckets()
        .await
        .context("Failed to list buckets")?;

    for bucket in &listing.buckets {
        println!(
            "{:>28} s3://{}",
            bucket.creation_date.as_deref().unwrap_or("-"),
            bucket.name
        );
    }
    Ok(())
}

pub async fn cmd_mb<T: HttpTransport>(
    client: &S3Client<T>,
    bucket: &str,
    acl: Option<&str>,
) -> Result<()> {
    let (bucket_name, _) = parse_s3_path(bucket)?;
    let acl = acl.map(str::parse::<CannedAcl>).transpose()?;

    client
        .create_bucket(&bucket_name, acl)
        .await
        .context(format!("Failed to create s3://{}", bucket_name))?;

    println!("Bucket created: s3://{}", bucket_name);
    Ok(())
}

pub async fn cmd_rb<T: HttpTransport>(client: &S3Client<T>, bucket: &str) -> Result<()> {
    let (bucket_name, _) = parse_s3_path(bucket)?;

    client
        .delete_bucket(&bucket_name)
        .await
        .context(format!("Failed to remove s3://{}", bucket_name))?;

    println!("Bucket removed: s3://{}", bucket_name);
    Ok(())
}
