use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;

use crate::callback::InnerTransportCallback;
use crate::core::callback::SharedTransportCallback;
use crate::core::transport::ConnectionInterface;
use crate::core::transport::ConnectionState;
use crate::core::transport::Handshake;
use crate::core::transport::TransportInterface;
use crate::core::transport::TransportMessage;
use crate::error::Error;
use crate::error::Result;
use crate::pool::Pool;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

/// A length delimited frame stream over tcp.
/// Outgoing frames are queued to a writer task, incoming frames are handled by a reader task.
pub struct TcpConnection {
    cid: String,
    state: Mutex<ConnectionState>,
    outbox: mpsc::UnboundedSender<Bytes>,
    callback: Arc<InnerTransportCallback>,
    writer: JoinHandle<()>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// [TcpTransport] manages all the [TcpConnection] and
/// provides methods to create, get and close connections.
pub struct TcpTransport {
    inner: Arc<TcpTransportInner>,
}

struct TcpTransportInner {
    endpoint: String,
    listener: Mutex<Option<TcpListener>>,
    cid: RwLock<Option<String>>,
    callback: RwLock<Option<SharedTransportCallback>>,
    pool: Pool<TcpConnection>,
}

impl TcpTransport {
    /// Bind a listener on `addr`.
    /// The `external_address` is announced to the remote peers instead of the bound one when provided.
    pub async fn bind(addr: &str, external_address: Option<String>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let endpoint = match external_address {
            Some(addr) => addr,
            None => listener.local_addr()?.to_string(),
        };
        tracing::info!("Tcp transport bound on {endpoint}");

        Ok(Self {
            inner: Arc::new(TcpTransportInner {
                endpoint,
                listener: Mutex::new(Some(listener)),
                cid: RwLock::new(None),
                callback: RwLock::new(None),
                pool: Pool::new(),
            }),
        })
    }
}

impl TcpConnection {
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

    fn abort_tasks(&self) {
        self.writer.abort();
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
    }
}

impl TcpTransportInner {
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

    fn local_handshake(&self) -> Result<Bytes> {
        let hs = Handshake {
            cid: self.local_cid()?,
            endpoint: self.endpoint.clone(),
        };
        Ok(Bytes::from(bincode::serialize(&hs)?))
    }

    async fn read_handshake(framed: &mut FramedStream, peer: &str) -> Result<Handshake> {
        match framed.next().await {
            Some(Ok(frame)) => Ok(bincode::deserialize(&frame)?),
            Some(Err(e)) => Err(e.into()),
            None => Err(Error::HandshakeFailed(peer.to_string())),
        }
    }

    async fn accept(self: &Arc<Self>, stream: TcpStream, peer: String) -> Result<()> {
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
        let hs = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            let remote = Self::read_handshake(&mut framed, &peer).await?;
            framed.send(self.local_handshake()?).await?;
            Ok::<_, Error>(remote)
        })
        .await
        .map_err(|_| Error::HandshakeFailed(peer.clone()))??;

        tracing::debug!("Accepted connection from {} as {}", peer, hs.cid);
        self.register(hs, framed).await
    }

    async fn dial(self: &Arc<Self>, endpoint: &str) -> Result<String> {
        let stream = TcpStream::connect(endpoint).await?;
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
        let hs = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            framed.send(self.local_handshake()?).await?;
            Ok::<_, Error>(Self::read_handshake(&mut framed, endpoint).await?)
        })
        .await
        .map_err(|_| Error::HandshakeFailed(endpoint.to_string()))??;

        let cid = hs.cid.clone();
        // The dialed endpoint is reachable for sure, prefer it over the announced one.
        let hs = Handshake {
            cid: hs.cid,
            endpoint: endpoint.to_string(),
        };
        self.register(hs, framed).await?;
        Ok(cid)
    }

    async fn register(self: &Arc<Self>, remote: Handshake, framed: FramedStream) -> Result<()> {
        let (mut sink, mut stream) = framed.split();
        let (outbox, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let callback = Arc::new(InnerTransportCallback::new(&remote.cid, self.callback()?));

        let cid = remote.cid.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!("Write to connection {cid} failed: {e:?}");
                    break;
                }
            }
        });

        let conn = TcpConnection {
            cid: remote.cid.clone(),
            state: Mutex::new(ConnectionState::Connecting),
            outbox,
            callback: callback.clone(),
            writer,
            reader: Mutex::new(None),
        };
        self.pool
            .safely_insert(&remote.cid, &remote.endpoint, conn)?;

        let this = self.clone();
        let cid = remote.cid.clone();
        let reader_callback = callback.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(data) => reader_callback.on_message(&data).await,
                    Err(e) => {
                        tracing::warn!("Read from connection {cid} failed: {e:?}");
                        break;
                    }
                }
            }
            this.on_remote_closed(&cid).await;
        });

        let conn = self.pool.connection(&remote.cid)?.upgrade()?;
        if let Ok(mut slot) = conn.reader.lock() {
            *slot = Some(reader);
        }
        conn.set_connection_state(ConnectionState::Connected).await;
        Ok(())
    }

    async fn on_remote_closed(&self, cid: &str) {
        if let Some(conn) = self.pool.release(cid) {
            conn.set_connection_state(ConnectionState::Disconnected)
                .await;
            conn.set_connection_state(ConnectionState::Closed).await;
            conn.writer.abort();
        }
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

#[async_trait]
impl ConnectionInterface for TcpConnection {
    type Error = Error;

    async fn send_message(&self, msg: TransportMessage) -> Result<()> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(Error::ConnectionNotOpen(self.cid.clone()));
        }
        let data = bincode::serialize(&msg)?;
        self.outbox
            .send(Bytes::from(data))
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
        self.abort_tasks();
        Ok(())
    }
}

#[async_trait]
impl TransportInterface for TcpTransport {
    fn endpoint(&self) -> String {
        self.inner.endpoint.clone()
    }

    fn start(&self, cid: &str, callback: SharedTransportCallback) -> Result<()> {
        let listener = self
            .inner
            .listener
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .take()
            .ok_or(Error::AlreadyStarted)?;
        *self.inner.cid.write().map_err(|_| Error::LockPoisoned)? = Some(cid.to_string());
        *self
            .inner
            .callback
            .write()
            .map_err(|_| Error::LockPoisoned)? = Some(callback);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let inner = inner.clone();
                        tokio::spawn(async move {
                            if let Err(e) = inner.accept(stream, addr.to_string()).await {
                                tracing::warn!("Incoming connection from {addr} failed: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept failed: {e:?}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });

        Ok(())
    }

    async fn connect(&self, endpoint: &str) -> Result<String> {
        self.inner.local_cid()?;
        self.inner.dial(endpoint).await
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
