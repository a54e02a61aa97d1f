//! CLI configuration: a JSON file with environment overrides.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cairn_chain::ChainConfig;
use cairn_core::{Error, Result};
use cairn_ipfs::IpfsConfig;
use cairn_store::{DiskAdapter, MemoryAdapter, StorageAdapter};
use cairn_sync::{CairnConfig, SyncConfig};

/// On-disk configuration shape.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    /// HTTP JSON-RPC endpoint.
    pub rpc_url: String,
    /// Optional WebSocket endpoint.
    pub ws_url: Option<String>,
    /// Accumulator contract address.
    pub contract: String,
    /// Optional topic 0 override.
    pub event_topic: Option<String>,
    /// Block gateway URL; omit to run chain-only.
    pub gateway_url: Option<String>,
    /// Node write API URL.
    pub api_url: Option<String>,
    /// Remote pinning service URL.
    pub remote_pin_url: Option<String>,
    /// Announce written blocks.
    pub provide: bool,
    /// Store dump path; omit for an in-memory store.
    pub store_path: Option<PathBuf>,
    /// Backward sweep window size.
    pub range_size: Option<u64>,
    /// Polling interval in seconds.
    pub poll_interval_secs: Option<u64>,
}

impl FileConfig {
    /// Load from `path`, then apply `CAIRN_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: FileConfig = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw)
                .map_err(|e| Error::config(format!("config {path:?}: {e}")))?
        } else {
            FileConfig::default()
        };

        if let Ok(url) = std::env::var("CAIRN_RPC_URL") {
            config.rpc_url = url;
        }
        if let Ok(url) = std::env::var("CAIRN_WS_URL") {
            config.ws_url = Some(url);
        }
        if let Ok(contract) = std::env::var("CAIRN_CONTRACT") {
            config.contract = contract;
        }
        if let Ok(url) = std::env::var("CAIRN_GATEWAY_URL") {
            config.gateway_url = Some(url);
        }
        if let Ok(path) = std::env::var("CAIRN_STORE_PATH") {
            config.store_path = Some(PathBuf::from(path));
        }

        if config.rpc_url.is_empty() {
            return Err(Error::config("rpc_url is required (config file or CAIRN_RPC_URL)"));
        }
        if config.contract.is_empty() {
            return Err(Error::config("contract is required (config file or CAIRN_CONTRACT)"));
        }
        Ok(config)
    }

    /// Translate into the mirror configuration.
    pub fn to_cairn_config(&self) -> CairnConfig {
        let mut chain = ChainConfig::new(&self.rpc_url, &self.contract);
        if let Some(ws) = &self.ws_url {
            chain = chain.with_ws_url(ws);
        }
        if let Some(topic) = &self.event_topic {
            chain = chain.with_event_topic(topic);
        }

        let ipfs = self.gateway_url.as_ref().map(|gateway| {
            let mut ipfs = IpfsConfig::new(gateway);
            if let Some(api) = &self.api_url {
                ipfs = ipfs.with_api(api);
            }
            if let Some(pins) = &self.remote_pin_url {
                ipfs = ipfs.with_remote_pin(pins);
            }
            if self.provide {
                ipfs = ipfs.with_provide();
            }
            ipfs
        });

        let mut sync = SyncConfig::default();
        if let Some(range) = self.range_size {
            sync.range_size = range;
        }
        if let Some(secs) = self.poll_interval_secs {
            sync.poll_interval = Duration::from_secs(secs);
        }

        let mut config = CairnConfig::new(chain).with_sync(sync);
        if let Some(ipfs) = ipfs {
            config = config.with_ipfs(ipfs);
        }
        config
    }

    /// Build the storage adapter this configuration asks for.
    pub fn adapter(&self) -> Arc<dyn StorageAdapter> {
        match &self.store_path {
            Some(path) => Arc::new(DiskAdapter::new(path)),
            None => Arc::new(MemoryAdapter::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_and_translate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cairn.json");
        std::fs::write(
            &path,
            r#"{
                "rpc_url": "http://localhost:8545",
                "contract": "0x1111111111111111111111111111111111111111",
                "gateway_url": "http://localhost:8080",
                "range_size": 250
            }"#,
        )
        .unwrap();

        let config = FileConfig::load(&path).unwrap();
        let cairn = config.to_cairn_config();
        assert_eq!(cairn.chain.rpc_url, "http://localhost:8545");
        assert_eq!(cairn.sync.range_size, 250);
        assert!(cairn.ipfs.is_some());
        assert!(config.store_path.is_none());
    }

    #[test]
    fn missing_required_fields_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cairn.json");
        std::fs::write(&path, r#"{"rpc_url": "http://localhost:8545"}"#).unwrap();
        assert!(FileConfig::load(&path).is_err());
    }
}
