use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Result};

use crate::storage::{BlobBackend, BlobStore, LocalStorage, MemoryStorage};
use crate::uploads::namespace_for;

pub const DEFAULT_CONFIG_FILE: &str = "blobstash.toml";
pub const DEPLOY_CONTEXT_ENV: &str = "BLOBSTASH_DEPLOY_CONTEXT";
pub const MAX_UPLOAD_SIZE: usize = 64 * 1024 * 1024; // 64MB

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    /// Lives only as long as the process; useful for `serve` in tests.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    pub data_directory: PathBuf,
    pub listen_address: String,
    pub store_prefix: String,
    pub deploy_context: String,
    pub backend: BackendKind,
    pub list_concurrency: usize,
    pub max_upload_size: usize,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("./data"),
            listen_address: "0.0.0.0:8787".to_string(),
            store_prefix: "uploads".to_string(),
            deploy_context: "dev".to_string(),
            backend: BackendKind::Local,
            list_concurrency: crate::storage::lister::DEFAULT_HYDRATE_CONCURRENCY,
            max_upload_size: MAX_UPLOAD_SIZE,
        }
    }
}

impl StashConfig {
    pub fn load_or_create(config_path: Option<&str>) -> Result<Self> {
        let config_file = config_path.unwrap_or(DEFAULT_CONFIG_FILE);

        let mut config = if std::path::Path::new(config_file).exists() {
            let content = std::fs::read_to_string(config_file)?;
            toml::from_str(&content)?
        } else {
            let config = Self::default();
            config.save(config_file)?;
            tracing::info!("Wrote default config to {}", config_file);
            config
        };

        config.apply_env();
        Ok(config)
    }

    pub fn save(&self, config_path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// The deployment environment decides the namespace, so it wins over
    /// whatever the file says.
    pub fn apply_env(&mut self) {
        if let Ok(context) = std::env::var(DEPLOY_CONTEXT_ENV) {
            if !context.trim().is_empty() {
                self.deploy_context = context.trim().to_string();
            }
        }
    }

    pub fn namespace(&self) -> String {
        namespace_for(&self.store_prefix, &self.deploy_context)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        if self.backend == BackendKind::Local && !self.data_directory.exists() {
            std::fs::create_dir_all(&self.data_directory)?;
            tracing::info!("Created data directory: {:?}", self.data_directory);
        }
        Ok(())
    }

    /// Fails for backends whose contents end with the process.
    pub fn require_persistent(&self) -> Result<()> {
        if self.backend == BackendKind::Memory {
            bail!("the memory backend only lives for one process; use `serve` or backend = \"local\"");
        }
        Ok(())
    }

    /// Opens the store for this process's namespace.
    pub fn open_store(&self) -> BlobStore {
        let namespace = self.namespace();
        let backend: Arc<dyn BlobBackend> = match self.backend {
            BackendKind::Local => Arc::new(LocalStorage::new(&self.data_directory, &namespace)),
            BackendKind::Memory => Arc::new(MemoryStorage::new()),
        };
        tracing::info!("Opened {:?} store for namespace {}", self.backend, namespace);
        BlobStore::from_arc(backend).with_list_concurrency(self.list_concurrency)
    }
}
