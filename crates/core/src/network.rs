//! The seam between the engine and the origin.

use async_trait::async_trait;

use crate::Error;
use crate::http::{Request, Response};

/// Something that can carry a request to the origin.
///
/// An `Err` means no response was obtained at all (connection refused, DNS
/// failure, timeout). HTTP error statuses come back as `Ok` responses; the
/// strategies decide what a non-success status means for them.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, Error>;
}
