//! Configuration loading for the `huginn` command.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.huginn/config.toml` (user)
//! 3. `/etc/huginn/config.toml` (system)
//!
//! API keys never live in the file: each credential names the environment
//! variable that holds its key.
//!
//! ```toml
//! [router]
//! per_attempt_timeout_seconds = 20
//! provider_priority_order = ["groq#2", "groq#1"]
//!
//! [cache]
//! dir = "/var/lib/huginn"
//!
//! [[credentials]]
//! id = "groq#1"
//! adapter = "groq"
//! api_key_env = "GROQ_API_KEY"
//!
//! [[credentials]]
//! id = "hf#1"
//! adapter = "huggingface"
//! api_key_env = "HF_API_KEY"
//! model = "sdxl"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{CacheStore, FileBackend};
use crate::providers::{ProviderAdapter, ProviderCredential, RetryConfig};
use crate::router::{FailoverRouter, RouterConfig};
use crate::{HuginnError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

/// Cache storage location.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSection {
    /// Directory for entries and snapshots (default: `<data dir>/huginn`).
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Which adapter a credential drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    Groq,
    Openrouter,
    Mistral,
    /// Any other OpenAI-compatible endpoint; needs `base_url` and `model`.
    OpenaiCompatible,
    Huggingface,
}

/// One `[[credentials]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    pub id: String,
    pub adapter: AdapterKind,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Lower is tried first (default: 0).
    #[serde(default)]
    pub priority: u32,
    /// Overrides the router's per-attempt timeout.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Accept image inputs (OpenAI-compatible adapters only).
    #[serde(default)]
    pub vision: bool,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.huginn/config.toml`
    /// 3. `/etc/huginn/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_file(&path)
    }

    /// Like [`load()`](Self::load), but without an explicit path a missing
    /// config file yields the defaults. A file that exists must parse.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        match explicit_path {
            Some(path) => Self::load(Some(path)),
            None => Self::load_first(&Self::default_paths()),
        }
    }

    fn load_first(candidates: &[PathBuf]) -> Result<Self> {
        match candidates.iter().find(|path| path.exists()) {
            Some(path) => Self::load_file(path),
            None => Ok(Self::default()),
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::parse(&content).map_err(|e| match e {
            HuginnError::Configuration(msg) => {
                HuginnError::Configuration(format!("{msg} (in {path:?})"))
            }
            other => other,
        })
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| HuginnError::Configuration(format!("Failed to parse config: {e}")))
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(HuginnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(path) = Self::default_paths().into_iter().find(|path| path.exists()) {
            return Ok(path);
        }

        Err(HuginnError::Configuration(
            "No config file found. Create ~/.huginn/config.toml or /etc/huginn/config.toml"
                .to_string(),
        ))
    }

    /// User config first, then system config.
    fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".huginn").join("config.toml"));
        }
        paths.push(PathBuf::from("/etc/huginn/config.toml"));
        paths
    }

    /// Cache directory, falling back to the platform data directory.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        self.cache
            .dir
            .clone()
            .or_else(FileBackend::default_dir)
            .ok_or_else(|| {
                HuginnError::Configuration(
                    "No cache directory configured and no platform data directory".to_string(),
                )
            })
    }

    /// Build every credential, reading keys from the environment.
    pub fn build_credentials(&self) -> Result<Vec<ProviderCredential>> {
        self.credentials
            .iter()
            .map(|c| c.build(|var| std::env::var(var).ok()))
            .collect()
    }

    /// Open the on-disk cache and assemble a router.
    pub fn build_router(&self) -> Result<FailoverRouter> {
        let cache = Arc::new(CacheStore::open_dir(self.cache_dir()?)?);
        FailoverRouter::builder()
            .config(self.router.clone())
            .retry(self.retry.clone())
            .credentials(self.build_credentials()?)
            .cache(cache)
            .build()
    }
}

impl CredentialConfig {
    /// Build the credential, looking the key up through `lookup`.
    pub fn build(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<ProviderCredential> {
        let api_key = lookup(&self.api_key_env)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                HuginnError::Configuration(format!(
                    "credential '{}': environment variable {} is not set",
                    self.id, self.api_key_env
                ))
            })?;

        let mut credential = ProviderCredential::new(self.id.as_str(), self.adapter(api_key)?)
            .priority(self.priority);
        if let Some(secs) = self.timeout_seconds {
            credential = credential.timeout(Duration::from_secs(secs));
        }
        Ok(credential)
    }

    #[cfg(feature = "openai-compatible")]
    fn openai_compatible(&self, api_key: String) -> Result<Arc<dyn ProviderAdapter>> {
        use crate::providers::OpenAiCompatibleAdapter;

        let mut adapter = match self.adapter {
            AdapterKind::Groq => OpenAiCompatibleAdapter::groq(api_key),
            AdapterKind::Openrouter => OpenAiCompatibleAdapter::openrouter(api_key),
            AdapterKind::Mistral => OpenAiCompatibleAdapter::mistral(api_key),
            _ => {
                let (Some(base_url), Some(model)) = (&self.base_url, &self.model) else {
                    return Err(HuginnError::Configuration(format!(
                        "credential '{}': openai-compatible needs base_url and model",
                        self.id
                    )));
                };
                OpenAiCompatibleAdapter::new(self.id.as_str(), api_key, base_url, model)
            }
        };
        if let Some(base_url) = &self.base_url {
            adapter = adapter.with_base_url(base_url);
        }
        if let Some(model) = &self.model {
            adapter = adapter.with_model(model);
        }
        Ok(Arc::new(adapter.with_vision(self.vision)))
    }

    #[cfg(not(feature = "openai-compatible"))]
    fn openai_compatible(&self, _api_key: String) -> Result<Arc<dyn ProviderAdapter>> {
        Err(self.disabled("openai-compatible"))
    }

    #[cfg(feature = "huggingface")]
    fn huggingface(&self, api_key: String) -> Result<Arc<dyn ProviderAdapter>> {
        use crate::providers::HuggingFaceAdapter;

        let mut adapter = HuggingFaceAdapter::new(api_key);
        if let Some(base_url) = &self.base_url {
            adapter = adapter.with_base_url(base_url);
        }
        if let Some(model) = &self.model {
            adapter = adapter.with_model(model);
        }
        Ok(Arc::new(adapter))
    }

    #[cfg(not(feature = "huggingface"))]
    fn huggingface(&self, _api_key: String) -> Result<Arc<dyn ProviderAdapter>> {
        Err(self.disabled("huggingface"))
    }

    #[allow(dead_code)]
    fn disabled(&self, feature: &str) -> HuginnError {
        HuginnError::Configuration(format!(
            "credential '{}': built without the `{feature}` feature",
            self.id
        ))
    }

    fn adapter(&self, api_key: String) -> Result<Arc<dyn ProviderAdapter>> {
        match self.adapter {
            AdapterKind::Huggingface => self.huggingface(api_key),
            _ => self.openai_compatible(api_key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.router, RouterConfig::default());
        assert_eq!(config.retry.max_attempts, 1);
        assert!(config.credentials.is_empty());
        assert!(config.cache.dir.is_none());
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[test]
    fn missing_default_files_fall_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_first(&[dir.path().join("config.toml")]).unwrap();
        assert!(config.credentials.is_empty());
    }

    #[test]
    fn broken_default_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        let broken = dir.path().join("config.toml");
        fs::write(&broken, "[router\n").unwrap();

        let err = Config::load_first(&[missing, broken]).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn first_existing_default_file_wins() {
        let dir = tempfile::TempDir::new().unwrap();
        let user = dir.path().join("user.toml");
        let system = dir.path().join("system.toml");
        fs::write(&user, "[router]\nmax_consecutive_failures = 7\n").unwrap();
        fs::write(&system, "[router]\nmax_consecutive_failures = 9\n").unwrap();

        let config = Config::load_first(&[user, system]).unwrap();
        assert_eq!(config.router.max_consecutive_failures, 7);
    }

    #[test]
    fn unknown_adapter_kind_is_rejected() {
        let toml = r#"
            [[credentials]]
            id = "x"
            adapter = "telepathy"
            api_key_env = "X_KEY"
        "#;
        assert!(matches!(
            Config::parse(toml),
            Err(HuginnError::Configuration(_))
        ));
    }
}
