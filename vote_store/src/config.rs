use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// How a metadata replacement deals with concurrent writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WriteMode {
    /// Replace only while the object still carries the ETag that was read,
    /// re-reading on conflict.
    #[default]
    Conditional,
    /// Replace unconditionally. A concurrent mutation of the same image can
    /// be lost.
    LastWriterWins,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default)]
    pub write_mode: WriteMode,

    /// Read-modify-write rounds before a conditional mutation gives up.
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,

    /// Metadata fetches in flight while listing a region.
    #[serde(default = "default_list_concurrency")]
    pub list_concurrency: usize,
}

fn default_max_write_attempts() -> u32 {
    5
}

fn default_list_concurrency() -> usize {
    16
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::default(),
            max_write_attempts: default_max_write_attempts(),
            list_concurrency: default_list_concurrency(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_write_attempts == 0 {
            anyhow::bail!("store.max_write_attempts must be at least 1");
        }
        if self.list_concurrency == 0 {
            anyhow::bail!("store.list_concurrency must be at least 1");
        }
        Ok(())
    }
}
