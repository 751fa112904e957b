use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::distributions::Distribution;
use tokio::sync::mpsc;

use crate::callback::InnerTransportCallback;
use crate::core::callback::SharedTransportCallback;
use crate::core::transport::ConnectionInterface;
use crate::core::transport::ConnectionState;
use crate::core::transport::TransportInterface;
use crate::core::transport::TransportMessage;
use crate::error::Error;
use crate::error::Result;
use crate::pool::Pool;

/// Prefix of endpoints allocated by [MemoryHub].
const MEMORY_ENDPOINT_PREFIX: &str = "mem://";

/// The hub that wires [MemoryTransport]s of one process together.
/// Every transport created from a hub gets a unique endpoint that other transports of the same hub can dial.
#[derive(Default)]
pub struct MemoryHub {
    endpoints: DashMap<String, Weak<MemoryTransportInner>>,
    next_endpoint: AtomicUsize,
    latency: Option<(u64, u64)>,
}

impl MemoryHub {
    /// Create a hub delivering messages immediately.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a hub delivering every message after a random delay in `[min_ms, max_ms)`.
    pub fn with_latency(min_ms: u64, max_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            latency: Some((min_ms, max_ms.max(min_ms + 1))),
            ..Default::default()
        })
    }

    /// Create a new transport attached to this hub.
    pub fn transport(self: &Arc<Self>) -> MemoryTransport {
        let n = self.next_endpoint.fetch_add(1, Ordering::SeqCst);
        let endpoint = format!("{MEMORY_ENDPOINT_PREFIX}{n}");
        let inner = Arc::new(MemoryTransportInner {
            hub: self.clone(),
            endpoint: endpoint.clone(),
            cid: RwLock::new(None),
            callback: RwLock::new(None),
            pool: Pool::new(),
        });
        self.endpoints.insert(endpoint, Arc::downgrade(&inner));
        MemoryTransport { inner }
    }

    fn lookup(&self, endpoint: &str) -> Option<Arc<MemoryTransportInner>> {
        self.endpoints.get(endpoint).and_then(|w| w.value().upgrade())
    }
}

/// A connection between two [MemoryTransport]s of the same hub.
/// Messages are queued and delivered in order by a background task.
pub struct MemoryConnection {
    cid: String,
    local_cid: String,
    state: Mutex<ConnectionState>,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
    callback: Arc<InnerTransportCallback>,
    peer: Weak<MemoryTransportInner>,
}

/// [MemoryTransport] manages all the [MemoryConnection] and
/// provides methods to create, get and close connections.
pub struct MemoryTransport {
    inner: Arc<MemoryTransportInner>,
}

struct MemoryTransportInner {
    hub: Arc<MemoryHub>,
    endpoint: String,
    cid: RwLock<Option<String>>,
    callback: RwLock<Option<SharedTransportCallback>>,
    pool: Pool<MemoryConnection>,
}

impl MemoryConnection {
    fn new(
        cid: &str,
        local_cid: &str,
        outbox: mpsc::UnboundedSender<Vec<u8>>,
        callback: Arc<InnerTransportCallback>,
        peer: Weak<MemoryTransportInner>,
    ) -> Self {
        Self {
            cid: cid.to_string(),
            local_cid: local_cid.to_string(),
            state: Mutex::new(ConnectionState::New),
            outbox,
            callback,
            peer,
        }
    }

    async fn set_connection_state(&self, state: ConnectionState) {
        {
            let Ok(mut current) = self.state.lock() else {
                return;
            };
            if state == *current {
                return;
            }
            *current = state;
        }

        self.callback.on_peer_connection_state_change(state).await;
    }
}

impl MemoryTransportInner {
    fn local_cid(&self) -> Result<String> {
        self.cid
            .read()
            .map_err(|_| Error::LockPoisoned)?
            .clone()
            .ok_or(Error::NotStarted)
    }

    fn callback(&self) -> Result<SharedTransportCallback> {
        self.callback
            .read()
            .map_err(|_| Error::LockPoisoned)?
            .clone()
            .ok_or(Error::NotStarted)
    }

    async fn set_state(&self, cid: &str, state: ConnectionState) -> Result<()> {
        let conn = self.pool.connection(cid)?.upgrade()?;
        conn.set_connection_state(state).await;
        Ok(())
    }

    /// Invoked by the remote side when it closed the connection.
    async fn on_remote_closed(&self, cid: &str) {
        if let Some(conn) = self.pool.release(cid) {
            conn.set_connection_state(ConnectionState::Disconnected)
                .await;
            conn.set_connection_state(ConnectionState::Closed).await;
        }
    }
}

#[async_trait]
impl ConnectionInterface for MemoryConnection {
    type Error = Error;

    async fn send_message(&self, msg: TransportMessage) -> Result<()> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(Error::ConnectionNotOpen(self.cid.clone()));
        }
        let data = bincode::serialize(&msg)?;
        self.outbox
            .send(data)
            .map_err(|_| Error::ConnectionReleased(self.cid.clone()))
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Failed)
    }

    async fn close(&self) -> Result<()> {
        self.set_connection_state(ConnectionState::Closed).await;

        // simulate remote closing
        if let Some(peer) = self.peer.upgrade() {
            peer.on_remote_closed(&self.local_cid).await;
        }

        Ok(())
    }
}

#[async_trait]
impl TransportInterface for MemoryTransport {
    fn endpoint(&self) -> String {
        self.inner.endpoint.clone()
    }

    fn start(&self, cid: &str, callback: SharedTransportCallback) -> Result<()> {
        let mut current = self.inner.cid.write().map_err(|_| Error::LockPoisoned)?;
        if current.is_some() {
            return Err(Error::AlreadyStarted);
        }
        *current = Some(cid.to_string());
        *self
            .inner
            .callback
            .write()
            .map_err(|_| Error::LockPoisoned)? = Some(callback);
        Ok(())
    }

    async fn connect(&self, endpoint: &str) -> Result<String> {
        let local_cid = self.inner.local_cid()?;
        let remote = self
            .inner
            .hub
            .lookup(endpoint)
            .ok_or_else(|| Error::EndpointNotFound(endpoint.to_string()))?;
        let remote_cid = remote
            .local_cid()
            .map_err(|_| Error::HandshakeFailed(endpoint.to_string()))?;

        if let Some(state) = self.connection_state(&remote_cid) {
            if !state.is_unavailable() {
                return Err(Error::ConnectionAlreadyExists(remote_cid));
            }
        }

        let local_cb = Arc::new(InnerTransportCallback::new(
            &remote_cid,
            self.inner.callback()?,
        ));
        let remote_cb = Arc::new(InnerTransportCallback::new(&local_cid, remote.callback()?));

        let (to_remote, to_remote_rx) = mpsc::unbounded_channel();
        let (to_local, to_local_rx) = mpsc::unbounded_channel();
        spawn_delivery(to_remote_rx, remote_cb.clone(), self.inner.hub.latency);
        spawn_delivery(to_local_rx, local_cb.clone(), self.inner.hub.latency);

        let local_conn = MemoryConnection::new(
            &remote_cid,
            &local_cid,
            to_remote,
            local_cb,
            Arc::downgrade(&remote),
        );
        let remote_conn = MemoryConnection::new(
            &local_cid,
            &remote_cid,
            to_local,
            remote_cb,
            Arc::downgrade(&self.inner),
        );

        self.inner
            .pool
            .safely_insert(&remote_cid, endpoint, local_conn)?;
        if let Err(e) = remote
            .pool
            .safely_insert(&local_cid, &self.inner.endpoint, remote_conn)
        {
            self.inner.pool.release(&remote_cid);
            return Err(e);
        }

        self.inner
            .set_state(&remote_cid, ConnectionState::Connected)
            .await?;
        remote
            .set_state(&local_cid, ConnectionState::Connected)
            .await?;

        Ok(remote_cid)
    }

    async fn close_connection(&self, cid: &str) -> Result<()> {
        self.inner.pool.safely_remove(cid).await
    }

    async fn send_message(&self, cid: &str, msg: TransportMessage) -> Result<()> {
        self.inner.pool.connection(cid)?.send_message(msg).await
    }

    fn connection_state(&self, cid: &str) -> Option<ConnectionState> {
        self.inner
            .pool
            .connection(cid)
            .ok()
            .map(|c| c.connection_state())
    }

    fn connection_ids(&self) -> Vec<String> {
        self.inner.pool.connection_ids()
    }

    fn remote_endpoint(&self, cid: &str) -> Option<String> {
        self.inner.pool.remote_endpoint(cid)
    }
}

fn spawn_delivery(
    mut inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    callback: Arc<InnerTransportCallback>,
    latency: Option<(u64, u64)>,
) {
    tokio::spawn(async move {
        while let Some(data) = inbox.recv().await {
            if let Some((low, high)) = latency {
                random_delay(low, high).await;
            }
            callback.on_message(&data).await;
        }
    });
}

async fn random_delay(low: u64, high: u64) {
    let range = rand::distributions::Uniform::new(low, high);
    let delay = range.sample(&mut rand::thread_rng());
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::callback::TransportCallback;

    type Events = mpsc::UnboundedSender<(String, Option<Vec<u8>>, Option<ConnectionState>)>;

    struct RecordingCallback {
        events: Events,
    }

    #[async_trait]
    impl TransportCallback for RecordingCallback {
        async fn on_message(
            &self,
            cid: &str,
            msg: &[u8],
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.events.send((cid.to_string(), Some(msg.to_vec()), None))?;
            Ok(())
        }

        async fn on_peer_connection_state_change(
            &self,
            cid: &str,
            state: ConnectionState,
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.events.send((cid.to_string(), None, Some(state)))?;
            Ok(())
        }
    }

    fn start(
        transport: &MemoryTransport,
        cid: &str,
    ) -> mpsc::UnboundedReceiver<(String, Option<Vec<u8>>, Option<ConnectionState>)> {
        let (events, rx) = mpsc::unbounded_channel();
        transport
            .start(cid, Arc::new(RecordingCallback { events }))
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn test_memory_connect_send_and_close() {
        let hub = MemoryHub::new();
        let t1 = hub.transport();
        let t2 = hub.transport();
        let mut ev1 = start(&t1, "a");
        let mut ev2 = start(&t2, "b");

        let remote = t1.connect(&t2.endpoint()).await.unwrap();
        assert_eq!(remote, "b");
        assert_eq!(t1.connection_state("b"), Some(ConnectionState::Connected));
        assert_eq!(t2.connection_state("a"), Some(ConnectionState::Connected));
        assert_eq!(t2.remote_endpoint("a"), Some(t1.endpoint()));

        assert_eq!(
            ev1.recv().await.unwrap(),
            ("b".to_string(), None, Some(ConnectionState::Connected))
        );
        assert_eq!(
            ev2.recv().await.unwrap(),
            ("a".to_string(), None, Some(ConnectionState::Connected))
        );

        println!("check messages are delivered in order");
        for i in 0..10u8 {
            t1.send_message("b", TransportMessage::Custom(vec![i]))
                .await
                .unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(
                ev2.recv().await.unwrap(),
                ("a".to_string(), Some(vec![i]), None)
            );
        }

        println!("check duplicated connection is rejected");
        assert!(matches!(
            t2.connect(&t1.endpoint()).await,
            Err(Error::ConnectionAlreadyExists(_))
        ));

        println!("check close is seen by both sides");
        t1.close_connection("b").await.unwrap();
        assert_eq!(t1.connection_state("b"), None);
        assert_eq!(t2.connection_state("a"), None);
        assert_eq!(
            ev2.recv().await.unwrap(),
            ("a".to_string(), None, Some(ConnectionState::Disconnected))
        );
        assert_eq!(
            ev2.recv().await.unwrap(),
            ("a".to_string(), None, Some(ConnectionState::Closed))
        );
        assert!(t1
            .send_message("b", TransportMessage::Custom(vec![]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_memory_connect_unknown_endpoint() {
        let hub = MemoryHub::new();
        let t1 = hub.transport();
        let _ev = start(&t1, "a");
        assert!(matches!(
            t1.connect("mem://404").await,
            Err(Error::EndpointNotFound(_))
        ));
    }
}
