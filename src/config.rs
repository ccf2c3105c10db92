use std::{net::SocketAddr, path::Path};

use anyhow::{anyhow, Result};
use blob_store::BlobStorageConfig;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use vote_store::StoreConfig;

const ENV_PREFIX: &str = "GALLERY_";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// JSON log lines instead of the compact human format.
    #[serde(default)]
    pub structured_logging: bool,
    #[serde(default)]
    pub blob_storage: BlobStorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: default_listen_addr(),
            structured_logging: false,
            blob_storage: Default::default(),
            upload: Default::default(),
            store: Default::default(),
            telemetry: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    /// Largest accepted image, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    // Export spans over OTLP.
    #[serde(default)]
    pub enable_tracing: bool,
    // Export metrics over OTLP.
    #[serde(default)]
    pub enable_metrics: bool,
    // OpenTelemetry collector grpc endpoint for both traces and metrics.
    // Falls back to OTEL_EXPORTER_OTLP_ENDPOINT or localhost:4317.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    60
}

impl ServerConfig {
    /// Load the YAML file at `path`, if any, then apply `GALLERY_*`
    /// environment overrides (`GALLERY_BLOB_STORAGE__BUCKET=images`).
    pub fn from_path(path: Option<&Path>) -> Result<ServerConfig> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            let config_str = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("unable to read config {}: {}", path.display(), e))?;
            figment = figment.merge(Yaml::string(&config_str));
        }
        Self::extract(figment)
    }

    #[cfg(test)]
    fn from_yaml_str(config_str: &str) -> Result<ServerConfig> {
        Self::extract(Figment::new().merge(Yaml::string(config_str)))
    }

    fn extract(figment: Figment) -> Result<ServerConfig> {
        let config: ServerConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow!("invalid listen address: {}", self.listen_addr));
        }
        if self.upload.max_bytes == 0 {
            return Err(anyhow!("upload.max_bytes must be positive"));
        }
        if self.telemetry.enable_metrics && self.telemetry.metrics_interval_secs == 0 {
            return Err(anyhow!("telemetry.metrics_interval_secs must be positive"));
        }
        self.blob_storage.validate()?;
        self.store.validate()?;
        Ok(())
    }
}
