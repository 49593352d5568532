//! Configuration management for adox
//!
//! Settings live in `.adox/config.toml` in the working directory. Missing files
//! fall back to defaults; a few fields can be overridden from the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{AdoxError, Result};

pub const ORG_URL_ENV: &str = "AZURE_DEVOPS_ORG_URL";
pub const PROJECT_ENV: &str = "AZURE_DEVOPS_PROJECT";

/// Top-level adox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdoxConfig {
    /// Organization URL, e.g. `https://dev.azure.com/contoso`
    #[serde(default)]
    pub organization_url: Option<String>,

    /// Project used when an operation does not name one
    #[serde(default)]
    pub default_project: Option<String>,

    /// REST API version sent with every request
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Environment variable holding the personal access token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub paging: PagingConfig,

    #[serde(default)]
    pub fan_out: FanOutConfig,

    #[serde(default)]
    pub downloads: DownloadConfig,
}

/// Page size defaults for list operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagingConfig {
    /// Page size when the caller gives no limit
    #[serde(default = "default_page_limit")]
    pub default_limit: usize,

    /// Larger limits are clamped to this
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

/// Cross-scope lookup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutConfig {
    /// Per-scope lookups allowed in flight at once (1 = sequential)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Output directory used when the caller gives no path
    #[serde(default = "default_download_dir")]
    pub default_dir: PathBuf,
}

// Default value providers
fn default_api_version() -> String {
    "7.1".to_string()
}

fn default_token_env() -> String {
    "AZURE_DEVOPS_PAT".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_page_limit() -> usize {
    50
}

fn default_max_limit() -> usize {
    1000
}

fn default_max_concurrency() -> usize {
    8
}

fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}

impl AdoxConfig {
    /// Load configuration from `.adox/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        Self::load_from(&root.join(".adox/config.toml"))
    }

    /// Load configuration from an explicit file, falling back to defaults if absent
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            toml::from_str(&content).map_err(|e| {
                AdoxError::Config(format!(
                    "Failed to parse config file {}: {}",
                    config_path.display(),
                    e
                ))
            })?
        } else {
            tracing::debug!("No config at {}, using defaults", config_path.display());
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.adox/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(".adox");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| AdoxError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Apply `AZURE_DEVOPS_ORG_URL` / `AZURE_DEVOPS_PROJECT` overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ORG_URL_ENV) {
            if !url.trim().is_empty() {
                self.organization_url = Some(url);
            }
        }
        if let Ok(project) = std::env::var(PROJECT_ENV) {
            if !project.trim().is_empty() {
                self.default_project = Some(project);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.fan_out.max_concurrency == 0 {
            return Err(AdoxError::Config(
                "fan_out.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.paging.default_limit == 0 {
            return Err(AdoxError::Config(
                "paging.default_limit must be at least 1".to_string(),
            ));
        }
        if self.paging.default_limit > self.paging.max_limit {
            return Err(AdoxError::Config(format!(
                "paging.default_limit ({}) exceeds paging.max_limit ({})",
                self.paging.default_limit, self.paging.max_limit
            )));
        }
        Ok(())
    }

    /// Organization URL, or a configuration error naming how to set it
    pub fn require_organization_url(&self) -> Result<&str> {
        self.organization_url.as_deref().ok_or_else(|| {
            AdoxError::Config(format!(
                "No organization URL configured. Set {} or organization_url in .adox/config.toml",
                ORG_URL_ENV
            ))
        })
    }
}

impl Default for AdoxConfig {
    fn default() -> Self {
        Self {
            organization_url: None,
            default_project: None,
            api_version: default_api_version(),
            token_env: default_token_env(),
            request_timeout_secs: default_request_timeout_secs(),
            paging: PagingConfig::default(),
            fan_out: FanOutConfig::default(),
            downloads: DownloadConfig::default(),
        }
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_limit: default_page_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            default_dir: default_download_dir(),
        }
    }
}
