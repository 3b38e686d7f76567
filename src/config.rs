use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    /// Named backend targets. The key (e.g. "local", "production") is the
    /// host scope recorded on every file.
    pub hosts: BTreeMap<String, HostConfig>,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostConfig {
    /// Base URL for both boundary endpoints (`/upload`, `/process-uploads`).
    pub base_url: String,
    /// Directory scope sent with processing triggers.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
}

fn default_upload_dir() -> String {
    "uploads".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Maximum concurrent transfers per submission.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Automatic in-call retries per record before the record settles in
    /// a failed state. 0 means one attempt per explicit submission.
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_process_timeout")]
    pub process_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: 0,
            timeout_secs: default_upload_timeout(),
            process_timeout_secs: default_process_timeout(),
        }
    }
}

fn default_concurrency() -> usize {
    3
}
fn default_upload_timeout() -> u64 {
    300
}
fn default_process_timeout() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesConfig {
    /// Extension whitelist applied before registration.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_extensions() -> Vec<String> {
    [".pdf", ".docx", ".doc", ".txt", ".md"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IdentityConfig {
    /// Operator name stamped on records and upload metadata.
    /// Falls back to the `USER` environment variable.
    #[serde(default)]
    pub uploaded_by: Option<String>,
}

impl Config {
    pub fn host(&self, name: &str) -> Result<&HostConfig> {
        self.hosts.get(name).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown host '{}'. Configured: {}",
                name,
                self.hosts
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }

    pub fn uploaded_by(&self) -> String {
        self.identity
            .uploaded_by
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.hosts.is_empty() {
        anyhow::bail!("At least one [hosts.<name>] target must be configured");
    }

    for (name, host) in &config.hosts {
        if host.base_url.trim_end_matches('/').is_empty() {
            anyhow::bail!("hosts.{}.base_url must not be empty", name);
        }
    }

    if config.upload.concurrency == 0 {
        anyhow::bail!("upload.concurrency must be >= 1");
    }

    if config.files.extensions.is_empty() {
        anyhow::bail!("files.extensions must not be empty");
    }

    for ext in &config.files.extensions {
        if !ext.starts_with('.') {
            anyhow::bail!("files.extensions entries must start with '.', got '{}'", ext);
        }
    }

    Ok(config)
}
