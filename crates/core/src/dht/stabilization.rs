//! Stabilization run daemons to maintain dht.

use std::sync::Arc;
use std::time::Duration;

use chordnet_transport::core::transport::ConnectionState;

use crate::dht::OverlayNode;
use crate::error::Result;
use crate::storage::FileStore;
use crate::swarm::SwarmTransport;

/// Periods of the maintenance loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilizeIntervals {
    /// Period of `stabilize` and connection cleanup.
    pub stabilize: Duration,
    /// Period of `fix_fingers`.
    pub fix_fingers: Duration,
    /// Period of `relocate_keys`.
    pub relocate: Duration,
}

impl StabilizeIntervals {
    /// The same period for every task.
    pub fn uniform(interval: Duration) -> Self {
        Self {
            stabilize: interval,
            fix_fingers: interval,
            relocate: interval,
        }
    }
}

/// The stabilization runner.
#[derive(Clone)]
pub struct Stabilizer {
    overlay: Arc<OverlayNode>,
    transport: Arc<SwarmTransport>,
    store: Arc<FileStore>,
}

impl Stabilizer {
    /// Create a new stabilization runner.
    pub fn new(overlay: Arc<OverlayNode>, store: Arc<FileStore>) -> Self {
        let transport = overlay.transport.clone();
        Self {
            overlay,
            transport,
            store,
        }
    }

    /// Run every maintenance task once.
    pub async fn stabilize(&self) -> Result<()> {
        self.stabilize_ring().await;
        self.fix_fingers().await;
        self.relocate_keys().await;
        Ok(())
    }

    async fn stabilize_ring(&self) {
        tracing::debug!("STABILIZATION stabilize start");
        if let Err(e) = self.overlay.stabilize().await {
            tracing::error!("[stabilize] Failed on stabilize {:?}", e);
        }
        tracing::debug!("STABILIZATION stabilize end");
        tracing::debug!("STABILIZATION clean_unavailable_connections start");
        if let Err(e) = self.clean_unavailable_connections().await {
            tracing::error!(
                "[stabilize] Failed on clean unavailable connections {:?}",
                e
            );
        }
        tracing::debug!("STABILIZATION clean_unavailable_connections end");
    }

    async fn fix_fingers(&self) {
        tracing::debug!("STABILIZATION fix_fingers start");
        if let Err(e) = self.overlay.fix_fingers().await {
            tracing::error!("[stabilize] Failed on fix_finger {:?}", e);
        }
        tracing::debug!("STABILIZATION fix_fingers end");
    }

    async fn relocate_keys(&self) {
        tracing::debug!("STABILIZATION relocate_keys start");
        match self.store.relocate_keys().await {
            Ok(0) => {}
            Ok(n) => tracing::info!("STABILIZATION relocated {} items", n),
            Err(e) => tracing::error!("[stabilize] Failed on relocate keys {:?}", e),
        }
        tracing::debug!("STABILIZATION relocate_keys end");
    }

    /// Clean unavailable connections in transport.
    pub async fn clean_unavailable_connections(&self) -> Result<()> {
        for did in self.transport.get_connection_ids() {
            if matches!(
                self.transport.connection_state(did),
                Some(
                    ConnectionState::Disconnected
                        | ConnectionState::Failed
                        | ConnectionState::Closed
                )
            ) {
                tracing::info!("STABILIZATION clean_unavailable_transports: {:?}", did);
                self.transport.disconnect(did).await?;
            }
        }

        Ok(())
    }
}

mod stabilizer {
    use std::sync::Arc;

    use futures::future::FutureExt;
    use futures::pin_mut;
    use futures::select;
    use futures_timer::Delay;

    use super::*;

    impl Stabilizer {
        /// Run stabilization in a loop, each task on its own period.
        pub async fn wait(self: Arc<Self>, intervals: StabilizeIntervals) {
            let stabilize = Delay::new(intervals.stabilize).fuse();
            let fix_fingers = Delay::new(intervals.fix_fingers).fuse();
            let relocate = Delay::new(intervals.relocate).fuse();
            pin_mut!(stabilize, fix_fingers, relocate);
            loop {
                select! {
                    _ = stabilize => {
                        self.stabilize_ring().await;
                        stabilize.set(Delay::new(intervals.stabilize).fuse());
                    },
                    _ = fix_fingers => {
                        self.fix_fingers().await;
                        fix_fingers.set(Delay::new(intervals.fix_fingers).fuse());
                    },
                    _ = relocate => {
                        self.relocate_keys().await;
                        relocate.set(Delay::new(intervals.relocate).fuse());
                    },
                }
            }
        }
    }
}
