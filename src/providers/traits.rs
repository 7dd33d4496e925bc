//! Provider adapter trait.
//!
//! Every backend implements one small trait rather than one trait per
//! capability: [`ProviderAdapter::supports()`] declares which operation
//! kinds it can serve and [`ProviderAdapter::invoke()`] performs the call.
//! The router never sees backend-specific types.
//!
//! # Error contract
//!
//! Adapters normalize failures into [`HuginnError`](crate::HuginnError):
//! - transient (`Http`, `Timeout`, `RateLimited`, `Api` 5xx, `EmptyResponse`)
//!   and `AuthenticationFailed` move the router to the next credential
//! - `ProviderRejected` and `PayloadTooLarge` abort the whole resolution
//!
//! # Example
//!
//! ```ignore
//! #[async_trait]
//! impl ProviderAdapter for EchoAdapter {
//!     fn name(&self) -> &str { "echo" }
//!     fn supports(&self, op: OperationKind) -> bool { op == OperationKind::Complete }
//!     async fn invoke(&self, request: &Request) -> Result<ProviderResponse> {
//!         Ok(ProviderResponse::new(request.normalized_text().unwrap_or_default()))
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::Result;
use crate::types::{OperationKind, ProviderResponse, Request};

/// Uniform interface to one backend AI service, bound to one credential.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name for logging/debugging (e.g. `"groq"`).
    fn name(&self) -> &str;

    /// Whether this backend can serve the operation kind.
    fn supports(&self, operation: OperationKind) -> bool;

    /// Perform the call.
    ///
    /// Must be cancel-safe: the router may drop the future on timeout,
    /// deadline or caller cancellation.
    async fn invoke(&self, request: &Request) -> Result<ProviderResponse>;
}
