//! Huginn - failover routing and reviewed response caching for AI providers
//!
//! A [`FailoverRouter`] answers a [`Request`] from the cache when a reviewed
//! answer exists, and otherwise tries interchangeable provider credentials
//! in priority order, skipping those in cooldown. Fresh answers are cached
//! as *pending* and only reused once accepted or edited through the
//! [`CacheEditor`](cache::CacheEditor).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use huginn::providers::{OpenAiCompatibleAdapter, ProviderCredential};
//! use huginn::{FailoverRouter, OperationKind, Request};
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let router = FailoverRouter::builder()
//!         .credential(ProviderCredential::new(
//!             "groq#1",
//!             Arc::new(OpenAiCompatibleAdapter::groq("gsk-your-key")),
//!         ))
//!         .credential(
//!             ProviderCredential::new(
//!                 "openrouter#1",
//!                 Arc::new(OpenAiCompatibleAdapter::openrouter("sk-or-your-key")),
//!             )
//!             .priority(1),
//!         )
//!         .build()?;
//!
//!     let request = Request::text(OperationKind::Complete, "What is the capital of France?");
//!     let resolution = router.resolve(&request).await?;
//!     println!("{} (from {})", resolution.payload.as_text().unwrap_or(""), resolution.source);
//!
//!     // Approve the answer so identical requests are served from the cache.
//!     router.editor().accept(&resolution.key)?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
#[cfg(feature = "cli")]
pub mod config;
pub mod error;
pub mod health;
pub mod providers;
pub mod router;
pub mod telemetry;
pub mod types;

// Re-export main types at crate root
pub use error::{AttemptFailure, FailureKind, FailureReason, HuginnError, Result};
pub use router::{FailoverRouter, ResolveOptions, RouterBuilder, RouterConfig};

pub use cache::{CacheEditor, CacheEntry, CacheStore, EntryState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use health::{HealthConfig, HealthRecord, HealthTracker};
pub use providers::{CredentialId, ProviderAdapter, ProviderCredential, RetryConfig};

// Re-export all types
pub use types::{
    CacheKey, OperationKind, Payload, ProviderResponse, Request, Resolution, ResponsePayload,
    Scalar, Source, Usage,
};
