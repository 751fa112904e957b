//! The `ChordFS` module: a replicated key value store on top of the ring.
//!
//! An item lives at the node responsible for the hash of its key. The writer of an
//! item receives its item key, sealed for the writer's node key, and keeps the item
//! alive with periodic keep-alives. Updates are fenced by `{seq, hash}` sealed under
//! the item key. When responsibility moves, items are pushed to their new owner.
#![warn(missing_docs)]
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use chrono::Utc;
use dashmap::DashMap;
use futures_timer::Delay;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use tokio::task::JoinHandle;

use crate::consts::DEFAULT_ITEM_DURATION_MS;
use crate::consts::DEFAULT_ITEM_REFRESH_MS;
use crate::consts::FILE_STORE_MODULE;
use crate::consts::MAX_KEEPALIVE_FAILURES;
use crate::dht::Did;
use crate::error::Error;
use crate::error::Result;
use crate::message::Envelope;
use crate::message::ModuleHandler;
use crate::rpc::CallLayer;
use crate::rpc::IncomingRequest;
use crate::storage::crypto::open_with_key;
use crate::storage::crypto::random_item_key;
use crate::storage::crypto::seal_for;
use crate::storage::crypto::seal_with_key;
use crate::storage::crypto::NodeKey;
use crate::storage::crypto::Sealed;
use crate::storage::crypto::SealedBox;
use crate::storage::KvStorageInterface;
use crate::storage::MemStorage;
use crate::swarm::SwarmTransport;

/// Storage of the items this node is responsible for.
pub type ItemStorage = Box<dyn KvStorageInterface<StoredItem> + Send + Sync>;

/// Outcome of a store operation. These are answers, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
pub enum StoreStatus {
    /// The item was created.
    StoreOk,
    /// An item with that key exists already.
    FileExists,
    /// The update authenticator did not match the item.
    BadUpdate,
    /// The update was applied.
    UpdateOk,
    /// No such item.
    NoFile,
    /// The item expiry was reset.
    KeepAliveOk,
}

/// Answer of `store`, `update` and `keepAlive`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreReply {
    /// Status.
    pub status: StoreStatus,
    /// Sequence number of the item after the operation.
    pub seq: u64,
    /// Content hash of the item after the operation.
    pub hash: String,
    /// Item key sealed for the writer, only with [StoreStatus::StoreOk].
    pub sealed_key: Option<SealedBox>,
}

impl StoreReply {
    fn status(status: StoreStatus) -> Self {
        Self {
            status,
            seq: 0,
            hash: String::new(),
            sealed_key: None,
        }
    }
}

/// What an update has to prove: the writer knows the current version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UpdateAuth {
    /// Content hash the writer last saw.
    pub hash: String,
    /// Sequence number the writer last saw.
    pub seq: u64,
}

/// An item held by the responsible node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoredItem {
    /// Hash of the application key.
    pub key: Did,
    /// Value.
    pub value: Bytes,
    /// Hex SHA-256 of the value.
    pub hash: String,
    /// Increased by every accepted update.
    pub seq: u64,
    /// Symmetric key shared with the writer.
    pub item_key: Vec<u8>,
    /// The item is dropped after this instant unless kept alive.
    pub expires_at: DateTime<Utc>,
}

/// Hex SHA-256 of a value.
pub fn content_hash(value: &[u8]) -> String {
    hex::encode(Sha256::digest(value))
}

fn expiry_after(duration: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::milliseconds(duration.as_millis() as i64)
}

impl StoredItem {
    /// A fresh item at sequence 0.
    pub fn new(key: Did, value: Bytes, item_key: Vec<u8>, duration: Duration) -> Self {
        Self {
            key,
            hash: content_hash(&value),
            value,
            seq: 0,
            item_key,
            expires_at: expiry_after(duration),
        }
    }

    /// Whether the item outlived its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    fn remaining(&self) -> Option<Duration> {
        if self.is_expired() {
            return None;
        }
        (self.expires_at - Utc::now()).to_std().ok()
    }

    fn reply(&self, status: StoreStatus) -> StoreReply {
        StoreReply {
            status,
            seq: self.seq,
            hash: self.hash.clone(),
            sealed_key: None,
        }
    }

    /// Apply `value` when `auth` proves knowledge of the current version:
    /// same hash, and a sequence number not behind. Otherwise leave the item untouched.
    pub fn apply_update(&mut self, auth: &UpdateAuth, value: Bytes) -> StoreReply {
        if auth.hash != self.hash || auth.seq < self.seq {
            return self.reply(StoreStatus::BadUpdate);
        }
        self.seq = auth.seq + 1;
        self.hash = content_hash(&value);
        self.value = value;
        self.reply(StoreStatus::UpdateOk)
    }

    /// Reset the expiry.
    pub fn keep_alive(&mut self, duration: Duration) {
        self.expires_at = expiry_after(duration);
    }
}

/// Timing of a [FileStore].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Lifetime of an item without keep-alive.
    pub item_duration: Duration,
    /// Period of the keep-alive of owned items.
    pub item_refresh: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            item_duration: Duration::from_millis(DEFAULT_ITEM_DURATION_MS),
            item_refresh: Duration::from_millis(DEFAULT_ITEM_REFRESH_MS),
        }
    }
}

struct OwnershipRecord {
    item_key: Vec<u8>,
    seq: u64,
    hash: String,
    failures: u32,
    keep_alive: JoinHandle<()>,
}

/// Methods of the `ChordFS` module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum StoreMethod {
    /// Create an item.
    Store,
    /// Replace the value of an item.
    Update,
    /// Read an item.
    Retrieve,
    /// Reset the expiry of an item.
    KeepAlive,
    /// Ask the responsible node for its did and public key.
    PubReq,
    /// Hand an item over to its new owner.
    MoveKey,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct StoreParams {
    key: Did,
    value: Bytes,
    public_key: [u8; 32],
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct UpdateParams {
    key: Did,
    value: Bytes,
    auth: Sealed,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct OwnerKey {
    did: Did,
    public_key: [u8; 32],
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct MoveKeyParams {
    key: Did,
    value: Bytes,
    seq: u64,
    hash: String,
    sealed_key: SealedBox,
}

/// The replicated store of a node, both the writer side (ownership records) and
/// the holder side (items this node is responsible for).
pub struct FileStore {
    me: Weak<FileStore>,
    transport: Arc<SwarmTransport>,
    rpc: Arc<CallLayer>,
    node_key: NodeKey,
    items: ItemStorage,
    write_lock: tokio::sync::Mutex<()>,
    relocation: tokio::sync::Mutex<()>,
    owned: DashMap<Did, OwnershipRecord>,
    config: StoreConfig,
}

impl FileStore {
    /// Create the store of a node, holding items in memory.
    pub fn new(
        transport: Arc<SwarmTransport>,
        rpc: Arc<CallLayer>,
        node_key: NodeKey,
        config: StoreConfig,
    ) -> Arc<Self> {
        Self::new_with_storage(
            transport,
            rpc,
            node_key,
            Box::new(MemStorage::<StoredItem>::new()),
            config,
        )
    }

    /// Create the store of a node over a given item storage.
    pub fn new_with_storage(
        transport: Arc<SwarmTransport>,
        rpc: Arc<CallLayer>,
        node_key: NodeKey,
        items: ItemStorage,
        config: StoreConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            transport,
            rpc,
            node_key,
            items,
            write_lock: tokio::sync::Mutex::new(()),
            relocation: tokio::sync::Mutex::new(()),
            owned: DashMap::new(),
            config,
        })
    }

    /// Public half of the node key.
    pub fn public_key(&self) -> [u8; 32] {
        self.node_key.public_key()
    }

    /// Identifier of an application key.
    pub fn key_id(&self, key: &str) -> Result<Did> {
        Did::hash_key(key.as_bytes(), self.transport.dht.width())
    }

    /// Keys of the items held by this node.
    pub async fn stored_keys(&self) -> Result<Vec<Did>> {
        let mut keys = self
            .items
            .get_all()
            .await?
            .into_iter()
            .map(|(_, item)| item.key)
            .collect::<Vec<_>>();
        keys.sort();
        Ok(keys)
    }

    /// Keys this node writes and keeps alive.
    pub fn owned_keys(&self) -> Vec<Did> {
        let mut keys = self.owned.iter().map(|r| *r.key()).collect::<Vec<_>>();
        keys.sort();
        keys
    }

    /// Local copy of an item, if this node holds it.
    pub async fn local_item(&self, key: Did) -> Result<Option<StoredItem>> {
        Ok(self
            .items
            .get(&key.to_string())
            .await?
            .filter(|item| !item.is_expired()))
    }

    async fn call<P, R>(&self, dest: Did, method: StoreMethod, params: &P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.rpc.call_typed(dest, method.as_ref(), params).await
    }

    /// Create `key` with `value`. On [StoreStatus::StoreOk] this node becomes the owner
    /// of the item and keeps it alive.
    pub async fn store(&self, key: &str, value: Bytes) -> Result<StoreStatus> {
        let id = self.key_id(key)?;
        let params = StoreParams {
            key: id,
            value,
            public_key: self.public_key(),
        };
        let reply: StoreReply = self.call(id, StoreMethod::Store, &params).await?;
        tracing::debug!("store {} ({}): {}", key, id, reply.status);

        if reply.status == StoreStatus::StoreOk {
            let sealed = reply.sealed_key.ok_or_else(|| {
                Error::UnexpectedStoreStatus("StoreOk without item key".to_string())
            })?;
            let item_key = self.node_key.open(&sealed)?;
            self.own(id, item_key, reply.seq, reply.hash);
        }
        Ok(reply.status)
    }

    /// Replace the value of an owned item. A [StoreStatus::BadUpdate] refreshes the
    /// known version and is retried once.
    pub async fn update(&self, key: &str, value: Bytes) -> Result<StoreStatus> {
        let id = self.key_id(key)?;
        let reply = self.update_once(key, id, &value).await?;
        if reply.status != StoreStatus::BadUpdate {
            return Ok(reply.status);
        }
        tracing::debug!("retry update {} at seq {}", key, reply.seq);
        Ok(self.update_once(key, id, &value).await?.status)
    }

    /// One update attempt with the version held by the ownership record.
    /// Any reply but [StoreStatus::NoFile] carries the holder's version, which
    /// replaces the one in the record.
    async fn update_once(&self, key: &str, id: Did, value: &Bytes) -> Result<StoreReply> {
        let (item_key, auth) = {
            let record = self
                .owned
                .get(&id)
                .ok_or_else(|| Error::NotOwner(key.to_string()))?;
            (record.item_key.clone(), UpdateAuth {
                hash: record.hash.clone(),
                seq: record.seq,
            })
        };
        let auth = bincode::serialize(&auth).map_err(Error::BincodeSerialize)?;
        let params = UpdateParams {
            key: id,
            value: value.clone(),
            auth: seal_with_key(&item_key, &auth)?,
        };
        let reply: StoreReply = self.call(id, StoreMethod::Update, &params).await?;
        tracing::debug!("update {} ({}): {} seq {}", key, id, reply.status, reply.seq);

        if reply.status != StoreStatus::NoFile {
            if let Some(mut record) = self.owned.get_mut(&id) {
                record.seq = reply.seq;
                record.hash = reply.hash.clone();
            }
        }
        Ok(reply)
    }

    /// Read `key` from the node responsible for it.
    pub async fn retrieve(&self, key: &str) -> Result<Option<Bytes>> {
        let id = self.key_id(key)?;
        self.call(id, StoreMethod::Retrieve, &id).await
    }

    /// Reset the expiry of `key` at the node responsible for it.
    pub async fn keep_alive(&self, key: Did) -> Result<StoreStatus> {
        let reply: StoreReply = self.call(key, StoreMethod::KeepAlive, &key).await?;
        Ok(reply.status)
    }

    /// Stop keeping `key` alive and forget its item key.
    /// Returns whether this node owned it.
    pub fn drop_ownership(&self, key: &str) -> Result<bool> {
        let id = self.key_id(key)?;
        Ok(match self.owned.remove(&id) {
            Some((_, record)) => {
                record.keep_alive.abort();
                tracing::debug!("drop ownership of {} ({})", key, id);
                true
            }
            None => false,
        })
    }

    fn own(&self, key: Did, item_key: Vec<u8>, seq: u64, hash: String) {
        let store = self.me.clone();
        let period = self.config.item_refresh;
        let keep_alive = tokio::spawn(async move {
            loop {
                Delay::new(period).await;
                let Some(store) = store.upgrade() else {
                    return;
                };
                if !store.refresh(key).await {
                    return;
                }
            }
        });
        let record = OwnershipRecord {
            item_key,
            seq,
            hash,
            failures: 0,
            keep_alive,
        };
        if let Some(old) = self.owned.insert(key, record) {
            old.keep_alive.abort();
        }
    }

    /// One keep-alive round of an owned item. Returns false once the ownership is gone.
    async fn refresh(&self, key: Did) -> bool {
        match self.keep_alive(key).await {
            Ok(StoreStatus::NoFile) => {
                let failures = match self.owned.get_mut(&key) {
                    Some(mut record) => {
                        record.failures += 1;
                        record.failures
                    }
                    None => return false,
                };
                if failures > MAX_KEEPALIVE_FAILURES {
                    tracing::warn!("item {} is gone, drop ownership", key);
                    self.owned.remove(&key);
                    return false;
                }
                true
            }
            Ok(_) => match self.owned.get_mut(&key) {
                Some(mut record) => {
                    record.failures = 0;
                    true
                }
                None => false,
            },
            Err(e) => {
                tracing::debug!("keep-alive of {} failed: {}", key, e);
                self.owned.contains_key(&key)
            }
        }
    }

    fn schedule_expiry(&self, key: Did) {
        let store = self.me.clone();
        tokio::spawn(async move {
            loop {
                let Some(this) = store.upgrade() else {
                    return;
                };
                let remaining = match this.items.get(&key.to_string()).await {
                    Ok(Some(item)) => item.remaining(),
                    _ => return,
                };
                let Some(remaining) = remaining else {
                    let _guard = this.write_lock.lock().await;
                    if let Ok(Some(item)) = this.items.get(&key.to_string()).await {
                        if item.is_expired() {
                            tracing::debug!("item {} expired", key);
                            if let Err(e) = this.items.remove(&key.to_string()).await {
                                tracing::warn!("failed to drop expired item {}: {}", key, e);
                            }
                            return;
                        }
                    }
                    continue;
                };
                drop(this);
                Delay::new(remaining).await;
            }
        });
    }

    async fn put_item(&self, item: &StoredItem) -> Result<()> {
        self.items.put(&item.key.to_string(), item).await
    }

    fn is_responsible(&self, key: Did) -> Result<bool> {
        self.transport.dht.is_responsible(key)
    }

    /// Push items this node is no longer responsible for to their new owner.
    /// Only runs once the node has a confirmed place on the ring.
    /// Each item is read again and pushed under the write lock, so an update
    /// either lands before the push and travels with it, or waits and is relayed
    /// to the new owner afterwards.
    /// Returns the number of items handed over.
    pub async fn relocate_keys(&self) -> Result<usize> {
        if !self.transport.lifecycle.state()?.allows_relocation() {
            return Ok(0);
        }
        let _running = self.relocation.lock().await;
        let me = self.transport.did();
        let mut moved = 0;

        for (_, candidate) in self.items.get_all().await? {
            if candidate.is_expired() || self.is_responsible(candidate.key)? {
                continue;
            }
            let owner: OwnerKey =
                match self.call(candidate.key, StoreMethod::PubReq, &candidate.key).await {
                    Ok(owner) => owner,
                    Err(e) => {
                        tracing::debug!("no owner found for {}: {}", candidate.key, e);
                        continue;
                    }
                };
            if owner.did == me {
                continue;
            }

            let _guard = self.write_lock.lock().await;
            let Some(item) = self.local_item(candidate.key).await? else {
                continue;
            };
            if item.is_expired() || self.is_responsible(item.key)? {
                continue;
            }
            let params = MoveKeyParams {
                key: item.key,
                value: item.value.clone(),
                seq: item.seq,
                hash: item.hash.clone(),
                sealed_key: seal_for(&owner.public_key, &item.item_key)?,
            };
            match self
                .call::<_, bool>(owner.did, StoreMethod::MoveKey, &params)
                .await
            {
                Ok(true) => {
                    self.items.remove(&item.key.to_string()).await?;
                    tracing::debug!("moved item {} seq {} to {}", item.key, item.seq, owner.did);
                    moved += 1;
                }
                Ok(false) => tracing::debug!("{} refused item {}", owner.did, item.key),
                Err(e) => tracing::debug!("move of {} to {} failed: {}", item.key, owner.did, e),
            }
        }
        Ok(moved)
    }

    /// Forward a request for `key` towards the node responsible for it.
    async fn relay<P, R>(&self, key: Did, method: StoreMethod, params: &P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        tracing::debug!("relay {} of {}", method, key);
        self.call(key, method, params).await
    }

    async fn on_store(&self, params: StoreParams) -> Result<StoreReply> {
        {
            let _guard = self.write_lock.lock().await;
            if let Some(item) = self.local_item(params.key).await? {
                return Ok(item.reply(StoreStatus::FileExists));
            }
            if self.is_responsible(params.key)? {
                let item = StoredItem::new(
                    params.key,
                    params.value,
                    random_item_key(),
                    self.config.item_duration,
                );
                self.put_item(&item).await?;
                self.schedule_expiry(item.key);
                tracing::debug!("stored item {}", item.key);

                let mut reply = item.reply(StoreStatus::StoreOk);
                reply.sealed_key = Some(seal_for(&params.public_key, &item.item_key)?);
                return Ok(reply);
            }
        }
        self.relay(params.key, StoreMethod::Store, &params).await
    }

    async fn on_update(&self, params: UpdateParams) -> Result<StoreReply> {
        {
            let _guard = self.write_lock.lock().await;
            match self.local_item(params.key).await? {
                Some(mut item) => {
                    let auth = open_with_key(&item.item_key, &params.auth)
                        .ok()
                        .and_then(|auth| bincode::deserialize::<UpdateAuth>(&auth).ok());
                    let Some(auth) = auth else {
                        return Ok(item.reply(StoreStatus::BadUpdate));
                    };
                    let reply = item.apply_update(&auth, params.value);
                    if reply.status == StoreStatus::UpdateOk {
                        self.put_item(&item).await?;
                    }
                    return Ok(reply);
                }
                None if self.is_responsible(params.key)? => {
                    return Ok(StoreReply::status(StoreStatus::NoFile));
                }
                None => {}
            }
        }
        self.relay(params.key, StoreMethod::Update, &params).await
    }

    async fn on_retrieve(&self, key: Did) -> Result<Option<Bytes>> {
        if let Some(item) = self.local_item(key).await? {
            return Ok(Some(item.value));
        }
        if self.is_responsible(key)? {
            return Ok(None);
        }
        self.relay(key, StoreMethod::Retrieve, &key).await
    }

    async fn on_keep_alive(&self, key: Did) -> Result<StoreReply> {
        {
            let _guard = self.write_lock.lock().await;
            if let Some(mut item) = self.local_item(key).await? {
                item.keep_alive(self.config.item_duration);
                self.put_item(&item).await?;
                return Ok(item.reply(StoreStatus::KeepAliveOk));
            }
            if self.is_responsible(key)? {
                return Ok(StoreReply::status(StoreStatus::NoFile));
            }
        }
        self.relay(key, StoreMethod::KeepAlive, &key).await
    }

    async fn on_move_key(&self, params: MoveKeyParams) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if self.local_item(params.key).await?.is_some() {
            return Ok(false);
        }
        let item_key = self.node_key.open(&params.sealed_key)?;
        let mut item = StoredItem::new(
            params.key,
            params.value,
            item_key,
            self.config.item_duration,
        );
        item.seq = params.seq;
        item.hash = params.hash;
        self.put_item(&item).await?;
        self.schedule_expiry(item.key);
        tracing::debug!("took over item {}", item.key);
        Ok(true)
    }

    async fn execute(&self, request: &IncomingRequest) -> Result<Bytes> {
        let method = StoreMethod::from_str(&request.method).map_err(|_| {
            Error::UnknownMethod(FILE_STORE_MODULE.to_string(), request.method.clone())
        })?;
        let result = match method {
            StoreMethod::Store => bincode::serialize(&self.on_store(request.params()?).await?),
            StoreMethod::Update => bincode::serialize(&self.on_update(request.params()?).await?),
            StoreMethod::Retrieve => {
                bincode::serialize(&self.on_retrieve(request.params()?).await?)
            }
            StoreMethod::KeepAlive => {
                bincode::serialize(&self.on_keep_alive(request.params()?).await?)
            }
            StoreMethod::PubReq => bincode::serialize(&OwnerKey {
                did: self.transport.did(),
                public_key: self.public_key(),
            }),
            StoreMethod::MoveKey => {
                bincode::serialize(&self.on_move_key(request.params()?).await?)
            }
        };
        result.map(Bytes::from).map_err(Error::BincodeSerialize)
    }
}

#[async_trait]
impl ModuleHandler for FileStore {
    fn module_id(&self) -> &str {
        FILE_STORE_MODULE
    }

    async fn handle(&self, envelope: Envelope) -> Result<()> {
        let Some(request) = self.rpc.delegate(envelope).await? else {
            return Ok(());
        };
        match self.execute(&request).await {
            Ok(result) => self.rpc.answer(&request, result).await,
            Err(e) => {
                tracing::debug!("{} {} failed: {}", FILE_STORE_MODULE, request.method, e);
                self.rpc.reject(&request, &e.to_string()).await
            }
        }
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        for record in self.owned.iter() {
            record.keep_alive.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use chordnet_transport::connections::MemoryHub;

    use super::*;
    use crate::tests::default::builder;
    use crate::tests::default::gen_ring;
    use crate::tests::default::stabilize_until_ring;
    use crate::tests::default::start;

    /// Roll the ownership record of `id` back to an older version.
    fn rewind(store: &FileStore, id: Did, seq: u64, value: &[u8]) {
        let mut record = store.owned.get_mut(&id).unwrap();
        record.seq = seq;
        record.hash = content_hash(value);
    }

    /// Update parameters sealed with the version `owner` holds for `id`.
    fn update_params(owner: &FileStore, id: Did, value: &'static str) -> Result<UpdateParams> {
        let record = owner.owned.get(&id).unwrap();
        let auth = bincode::serialize(&UpdateAuth {
            hash: record.hash.clone(),
            seq: record.seq,
        })
        .map_err(Error::BincodeSerialize)?;
        Ok(UpdateParams {
            key: id,
            value: Bytes::from(value),
            auth: seal_with_key(&record.item_key, &auth)?,
        })
    }

    fn failures(store: &FileStore, id: Did) -> Option<u32> {
        store.owned.get(&id).map(|r| r.failures)
    }

    fn item() -> StoredItem {
        let key = Did::hash_key(b"k", 224).unwrap();
        StoredItem::new(key, Bytes::from("v0"), random_item_key(), Duration::from_secs(60))
    }

    #[test]
    fn test_update_fencing() {
        let mut item = item();
        let stale = UpdateAuth {
            hash: item.hash.clone(),
            seq: item.seq,
        };

        let reply = item.apply_update(&stale, Bytes::from("v1"));
        assert_eq!(reply.status, StoreStatus::UpdateOk);
        assert_eq!(reply.seq, 1);
        assert_eq!(reply.hash, content_hash(b"v1"));

        // the version before the update no longer matches
        let reply = item.apply_update(&stale, Bytes::from("v2"));
        assert_eq!(reply.status, StoreStatus::BadUpdate);
        assert_eq!(reply.seq, 1);
        assert_eq!(item.value, Bytes::from("v1"));

        let behind = UpdateAuth {
            hash: item.hash.clone(),
            seq: 0,
        };
        assert_eq!(
            item.apply_update(&behind, Bytes::from("v2")).status,
            StoreStatus::BadUpdate
        );

        let current = UpdateAuth {
            hash: reply.hash,
            seq: reply.seq,
        };
        let reply = item.apply_update(&current, Bytes::from("v2"));
        assert_eq!(reply.status, StoreStatus::UpdateOk);
        assert_eq!(item.seq, 2);
        assert_eq!(item.value, Bytes::from("v2"));
    }

    #[test]
    fn test_expiry() {
        let key = Did::hash_key(b"k", 224).unwrap();
        let mut item = StoredItem::new(key, Bytes::from("v"), random_item_key(), Duration::ZERO);
        assert!(item.is_expired());
        assert!(item.remaining().is_none());
        item.keep_alive(Duration::from_secs(10));
        assert!(!item.is_expired());
        assert!(item.remaining().is_some());
    }

    #[test]
    fn test_method_names() {
        assert_eq!(StoreMethod::KeepAlive.as_ref(), "keepAlive");
        assert_eq!(StoreMethod::from_str("moveKey").unwrap(), StoreMethod::MoveKey);
        assert_eq!(StoreMethod::PubReq.to_string(), "pubReq");
    }

    #[tokio::test]
    async fn test_stale_update_is_refused_then_retried() -> Result<()> {
        let hub = MemoryHub::new();
        let swarm = start(builder(&hub).origin(true))?;
        let store = swarm.file_store();
        let id = store.key_id("k")?;

        assert_eq!(swarm.store("k", Bytes::from("v0")).await?, StoreStatus::StoreOk);
        assert_eq!(swarm.update("k", Bytes::from("v1")).await?, StoreStatus::UpdateOk);

        println!("========================================");
        println!("||  a stale version is refused        ||");
        println!("========================================");
        rewind(&store, id, 0, b"v0");
        let reply = store.update_once("k", id, &Bytes::from("v2")).await?;
        assert_eq!(reply.status, StoreStatus::BadUpdate);
        assert_eq!(reply.seq, 1);
        assert_eq!(swarm.retrieve("k").await?, Some(Bytes::from("v1")));
        {
            let record = store.owned.get(&id).unwrap();
            assert_eq!(record.seq, 1);
            assert_eq!(record.hash, content_hash(b"v1"));
        }

        println!("========================================");
        println!("||  update retries once and lands     ||");
        println!("========================================");
        rewind(&store, id, 0, b"v0");
        assert_eq!(swarm.update("k", Bytes::from("v2")).await?, StoreStatus::UpdateOk);
        let item = store.local_item(id).await?.unwrap();
        assert_eq!(item.seq, 2);
        assert_eq!(item.value, Bytes::from("v2"));
        assert_eq!(store.owned.get(&id).map(|r| r.seq), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_ownership_dropped_after_missing_keep_alives() -> Result<()> {
        let hub = MemoryHub::new();
        let swarm = start(
            builder(&hub)
                .origin(true)
                .item_refresh(Duration::from_secs(60)),
        )?;
        let store = swarm.file_store();
        let id = store.key_id("k")?;
        assert_eq!(swarm.store("k", Bytes::from("v")).await?, StoreStatus::StoreOk);
        let item = store.local_item(id).await?.unwrap();

        println!("========================================");
        println!("||  a found item resets the count     ||");
        println!("========================================");
        store.items.remove(&id.to_string()).await?;
        for _ in 0..3 {
            assert!(store.refresh(id).await);
        }
        assert_eq!(failures(&store, id), Some(3));
        store.put_item(&item).await?;
        assert!(store.refresh(id).await);
        assert_eq!(failures(&store, id), Some(0));

        println!("========================================");
        println!("||  dropped on the seventh miss       ||");
        println!("========================================");
        store.items.remove(&id.to_string()).await?;
        for _ in 0..MAX_KEEPALIVE_FAILURES {
            assert!(store.refresh(id).await);
        }
        assert_eq!(store.owned_keys(), vec![id]);
        assert!(!store.refresh(id).await);
        assert!(store.owned_keys().is_empty());
        assert!(!store.refresh(id).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_racing_relocation_moves_with_item() -> Result<()> {
        let hub = MemoryHub::new();
        let swarms = gen_ring(&hub, 2).await?;
        assert!(stabilize_until_ring(&swarms, 20).await?);
        for swarm in swarms.iter() {
            swarm.stabilizer().stabilize().await?;
        }
        let writer = swarms[0].file_store();
        let id = writer.key_id("k")?;
        assert_eq!(swarms[0].store("k", Bytes::from("v0")).await?, StoreStatus::StoreOk);

        let (holder, other) = if swarms[0].file_store().local_item(id).await?.is_some() {
            (&swarms[0], &swarms[1])
        } else {
            (&swarms[1], &swarms[0])
        };
        assert!(other.file_store().local_item(id).await?.is_none());

        println!("========================================");
        println!("||  the holder loses the range of k   ||");
        println!("========================================");
        holder.dht().set_predecessor(Some(id))?;
        other.dht().set_predecessor(None)?;
        assert!(!holder.dht().is_responsible(id)?);
        assert!(holder.state()?.allows_relocation());

        let params = update_params(&writer, id, "v1")?;
        let store = holder.file_store();
        let (moved, reply) = tokio::join!(store.relocate_keys(), store.on_update(params));
        assert_eq!(moved?, 1);
        assert_eq!(reply?.status, StoreStatus::UpdateOk);

        assert!(store.local_item(id).await?.is_none());
        let item = other.file_store().local_item(id).await?.unwrap();
        assert_eq!(item.seq, 1);
        assert_eq!(item.value, Bytes::from("v1"));
        assert_eq!(swarms[0].retrieve("k").await?, Some(Bytes::from("v1")));
        Ok(())
    }
}
