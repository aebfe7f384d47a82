//! s3v4 - AWS Signature Version 4 signing and S3 REST transport

pub mod cli;
pub mod config;
pub mod s3;

pub use config::Config;
pub use s3::{Credentials, EndpointConfig, S3Client, S3Error};
