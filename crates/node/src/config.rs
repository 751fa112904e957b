//! YAML configuration of a node.
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use chordnet_core::consts::DEFAULT_ANSWER_CACHE_MS;
use chordnet_core::consts::DEFAULT_CALL_RETRIES;
use chordnet_core::consts::DEFAULT_CALL_TIMEOUT_MS;
use chordnet_core::consts::DEFAULT_FIX_FINGERS_INTERVAL_MS;
use chordnet_core::consts::DEFAULT_ID_WIDTH;
use chordnet_core::consts::DEFAULT_ITEM_DURATION_MS;
use chordnet_core::consts::DEFAULT_ITEM_REFRESH_MS;
use chordnet_core::consts::DEFAULT_KNOWN_TIMEOUT_MS;
use chordnet_core::consts::DEFAULT_MAX_HOPS;
use chordnet_core::consts::DEFAULT_RELOCATE_INTERVAL_MS;
use chordnet_core::consts::DEFAULT_STABILIZE_INTERVAL_MS;
use chordnet_core::dht::StabilizeIntervals;
use chordnet_core::rpc::CallConfig;
use chordnet_core::storage::crypto::NodeKey;
use chordnet_core::storage::StoreConfig;
use chordnet_core::swarm::RingConfig;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;
use crate::util::ensure_parent_dir;
use crate::util::expand_home;

pub const DEFAULT_CONFIG_PATH: &str = "~/.chordnet/config.yaml";
pub const DEFAULT_NODE_KEY_PATH: &str = "~/.chordnet/node.key";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:50000";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Address the TCP transport listens on.
    pub bind_addr: String,
    /// Endpoint announced to peers, when it differs from `bind_addr`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_addr: Option<String>,
    /// Endpoint of a node of the ring to join.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<String>,
    /// Start a ring instead of joining one.
    pub origin: bool,
    /// File holding the hex encoded secret of the node key.
    pub node_key: String,
    pub id_width: usize,
    pub max_hops: u8,
    pub call_timeout_ms: u64,
    pub call_retries: u32,
    pub answer_cache_ms: u64,
    pub item_duration_ms: u64,
    pub item_refresh_ms: u64,
    pub known_timeout_ms: u64,
    pub stabilize_interval_ms: u64,
    pub fix_fingers_interval_ms: u64,
    pub relocate_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_NODE_KEY_PATH)
    }
}

impl From<&Config> for RingConfig {
    fn from(config: &Config) -> Self {
        Self {
            id_width: config.id_width,
            max_hops: config.max_hops,
            call: CallConfig {
                timeout: Duration::from_millis(config.call_timeout_ms),
                retries: config.call_retries,
                cache_duration: Duration::from_millis(config.answer_cache_ms),
            },
            store: StoreConfig {
                item_duration: Duration::from_millis(config.item_duration_ms),
                item_refresh: Duration::from_millis(config.item_refresh_ms),
            },
            known_timeout: Duration::from_millis(config.known_timeout_ms),
            origin: config.origin,
            stabilize: StabilizeIntervals {
                stabilize: Duration::from_millis(config.stabilize_interval_ms),
                fix_fingers: Duration::from_millis(config.fix_fingers_interval_ms),
                relocate: Duration::from_millis(config.relocate_interval_ms),
            },
        }
    }
}

impl Config {
    pub fn new<P>(node_key: P) -> Self
    where P: AsRef<Path> {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            external_addr: None,
            bootstrap: None,
            origin: false,
            node_key: node_key.as_ref().to_string_lossy().to_string(),
            id_width: DEFAULT_ID_WIDTH,
            max_hops: DEFAULT_MAX_HOPS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            call_retries: DEFAULT_CALL_RETRIES,
            answer_cache_ms: DEFAULT_ANSWER_CACHE_MS,
            item_duration_ms: DEFAULT_ITEM_DURATION_MS,
            item_refresh_ms: DEFAULT_ITEM_REFRESH_MS,
            known_timeout_ms: DEFAULT_KNOWN_TIMEOUT_MS,
            stabilize_interval_ms: DEFAULT_STABILIZE_INTERVAL_MS,
            fix_fingers_interval_ms: DEFAULT_FIX_FINGERS_INTERVAL_MS,
            relocate_interval_ms: DEFAULT_RELOCATE_INTERVAL_MS,
        }
    }

    pub fn write_fs<P>(&self, path: P) -> Result<String>
    where P: AsRef<Path> {
        let path = expand_home(path)?;
        ensure_parent_dir(&path)?;
        let f =
            fs::File::create(path.as_path()).map_err(|e| Error::CreateFileError(e.to_string()))?;
        let f_writer = io::BufWriter::new(f);
        serde_yaml::to_writer(f_writer, self).map_err(|e| Error::EncodeError(e.to_string()))?;
        Ok(path.to_string_lossy().to_string())
    }

    pub fn read_fs<P>(path: P) -> Result<Config>
    where P: AsRef<Path> {
        let path = expand_home(path)?;
        tracing::debug!("Read config from: {:?}", path);
        let f = fs::File::open(path).map_err(|e| Error::OpenFileError(e.to_string()))?;
        let f_rdr = io::BufReader::new(f);
        serde_yaml::from_reader(f_rdr).map_err(|e| Error::DecodeError(e.to_string()))
    }

    /// Read the node key file.
    pub fn load_node_key(&self) -> Result<NodeKey> {
        let path = expand_home(&self.node_key)?;
        let raw = fs::read_to_string(path).map_err(|e| Error::OpenFileError(e.to_string()))?;
        let bytes = hex::decode(raw.trim()).map_err(|e| Error::InvalidNodeKey(e.to_string()))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| Error::InvalidNodeKey(format!("{} bytes, want 32", b.len())))?;
        Ok(NodeKey::from_bytes(secret))
    }

    /// Write a fresh node key to the node key file and return it.
    pub fn generate_node_key(&self) -> Result<NodeKey> {
        let path = expand_home(&self.node_key)?;
        ensure_parent_dir(&path)?;
        let key = NodeKey::random();
        fs::write(&path, hex::encode(key.to_bytes()))
            .map_err(|e| Error::CreateFileError(e.to_string()))?;
        Ok(key)
    }
}
