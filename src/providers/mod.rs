//! Provider adapters and the credential registry.
//!
//! Every backend sits behind [`ProviderAdapter`]. A [`ProviderCredential`]
//! binds one adapter instance (one API key) to an id and a priority rank;
//! the [`CredentialRegistry`] keeps them in the order the router tries them.

pub mod registry;
pub(crate) mod retry;
pub(crate) mod routing;
pub mod traits;

#[cfg(feature = "huggingface")]
pub mod huggingface;
#[cfg(feature = "openai-compatible")]
pub mod openai_compat;

pub use registry::{CredentialId, CredentialRegistry, ProviderCredential};
pub use retry::RetryConfig;
pub use traits::ProviderAdapter;

#[cfg(feature = "huggingface")]
pub use huggingface::HuggingFaceAdapter;
#[cfg(feature = "openai-compatible")]
pub use openai_compat::OpenAiCompatibleAdapter;
