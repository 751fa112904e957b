//! Serializable snapshots of a running node.
use serde::Deserialize;
use serde::Serialize;

use crate::dht::PeerRing;
use crate::swarm::Swarm;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmInspect {
    pub did: String,
    pub state: String,
    pub endpoint: String,
    pub connections: Vec<ConnectionInspect>,
    pub dht: DHTInspect,
    pub storage: StorageInspect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInspect {
    pub did: String,
    pub state: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DHTInspect {
    pub did: String,
    pub successor: String,
    #[serde(default)]
    pub predecessor: Option<String>,
    /// Runs of equal fingers as `(node, first index, last index)`.
    pub finger_table: Vec<(String, u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInspect {
    pub key: String,
    pub seq: u64,
    pub hash: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInspect {
    pub items: Vec<ItemInspect>,
    pub owned: Vec<String>,
}

impl SwarmInspect {
    pub async fn inspect(swarm: &Swarm) -> Self {
        let transport = swarm.transport();
        let dht = DHTInspect::inspect(&swarm.dht());
        let state = swarm
            .state()
            .map(|s| s.to_string())
            .unwrap_or_else(|e| format!("unknown: {e}"));
        let connections = transport
            .get_connection_ids()
            .into_iter()
            .map(|did| ConnectionInspect {
                did: did.to_string(),
                state: transport
                    .connection_state(did)
                    .map(|s| format!("{:?}", s))
                    .unwrap_or_default(),
                endpoint: transport.endpoint_of(did),
            })
            .collect();
        let storage = StorageInspect::inspect(swarm).await;

        Self {
            did: swarm.did().to_string(),
            state,
            endpoint: transport.endpoint(),
            connections,
            dht,
            storage,
        }
    }
}

impl DHTInspect {
    pub fn inspect(dht: &PeerRing) -> Self {
        let did = dht.did.to_string();
        let successor = dht
            .successor()
            .map(|s| s.to_string())
            .unwrap_or_default();

        let predecessor = {
            dht.lock_predecessor()
                .map(|x| *x)
                .ok()
                .flatten()
                .map(|x| x.to_string())
        };

        let finger_table = {
            dht.lock_finger()
                .map(|ft| {
                    let finger = ft.list().into_iter().map(|did| did.to_string());
                    compress_iter(finger)
                })
                .unwrap_or_default()
        };

        Self {
            did,
            successor,
            predecessor,
            finger_table,
        }
    }
}

impl StorageInspect {
    pub async fn inspect(swarm: &Swarm) -> Self {
        let store = swarm.file_store();
        let mut items = vec![];
        for key in store.stored_keys().await.unwrap_or_default() {
            if let Ok(Some(item)) = store.local_item(key).await {
                items.push(ItemInspect {
                    key: key.to_string(),
                    seq: item.seq,
                    hash: item.hash,
                    expires_at: item.expires_at.to_rfc3339(),
                });
            }
        }
        Self {
            items,
            owned: store.owned_keys().iter().map(|k| k.to_string()).collect(),
        }
    }
}

pub fn compress_iter<T>(iter: impl Iterator<Item = T>) -> Vec<(T, u64, u64)>
where T: PartialEq {
    let mut result = vec![];
    let mut start = 0u64;
    let mut count = 0u64;
    let mut prev: Option<T> = None;

    for (i, x) in iter.enumerate() {
        match prev {
            Some(p) if p == x => {
                count += 1;
            }
            _ => {
                if let Some(p) = prev {
                    result.push((p, start, start + count - 1));
                }
                start = i as u64;
                count = 1;
            }
        }
        prev = Some(x);
    }

    if let Some(p) = prev {
        result.push((p, start, start + count - 1));
    }

    result
}
