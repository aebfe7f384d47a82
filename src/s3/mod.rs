//! S3 client module with AWS SigV4 signing
//!
//! This module provides:
//! - Path-style / virtual-hosted addressing
//! - SigV4 canonical requests and signatures
//! - Request dispatch over a pluggable HTTP transport
//! - Typed listings and error documents

pub mod addressing;
pub mod canonical;
pub mod client;
pub mod error;
pub mod request;
pub mod response;
pub mod signer;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use addressing::{Addressing, EndpointConfig};
pub use canonical::CanonicalForm;
pub use client::{PreparedRequest, S3Client, S3Response, Target};
pub use error::{Result, S3Error};
pub use request::{Body, CannedAcl, PayloadHashing, RequestSpec, StreamedBody};
pub use response::ErrorInfo;
pub use signer::{Credentials, RequestDiagnostics, S3SignerV4, SigningContext};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, HyperTransport, RequestBody};
pub use types::{BucketEntry, BucketListing, ListParams, ListingResult, ObjectEntry, Owner};
