use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use chordnet_transport::connections::MemoryHub;
use tokio::time::sleep;

use crate::dht::Did;
use crate::dht::LifecycleState;
use crate::error::Result;
use crate::rpc::CallConfig;
use crate::swarm::Swarm;
use crate::swarm::SwarmBuilder;

mod test_aggressive_join;
mod test_call_layer;
mod test_lookup;
mod test_relay;
mod test_stabilization;
mod test_store;

/// A builder over a fresh transport of `hub`, with timings short enough for tests.
pub fn builder(hub: &Arc<MemoryHub>) -> SwarmBuilder {
    SwarmBuilder::new(Arc::new(hub.transport()))
        .call_config(CallConfig {
            timeout: Duration::from_millis(2000),
            retries: 2,
            cache_duration: Duration::from_millis(5000),
        })
        .known_timeout(Duration::from_secs(30))
}

/// Build the swarm and run its event loop in the background.
pub fn start(builder: SwarmBuilder) -> Result<Arc<Swarm>> {
    let swarm = Arc::new(builder.build()?);
    tokio::spawn(swarm.clone().listen());
    println!("did: {:?}, endpoint: {}", swarm.did(), swarm.transport().endpoint());
    Ok(swarm)
}

pub fn prepare_node(hub: &Arc<MemoryHub>, origin: bool) -> Result<Arc<Swarm>> {
    start(builder(hub).origin(origin))
}

/// An origin node and `n - 1` nodes joined through it, not stabilized yet.
pub async fn gen_ring(hub: &Arc<MemoryHub>, n: usize) -> Result<Vec<Arc<Swarm>>> {
    let origin = prepare_node(hub, true)?;
    let endpoint = origin.transport().endpoint();
    let mut swarms = vec![origin];
    for _ in 1..n {
        let swarm = prepare_node(hub, false)?;
        swarm.join(&endpoint).await?;
        swarms.push(swarm);
    }
    Ok(swarms)
}

/// Poll `check` until it holds or `timeout` elapsed.
pub async fn wait_for<F>(timeout: Duration, mut check: F) -> bool
where F: FnMut() -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        sleep(Duration::from_millis(50)).await;
    }
}

/// Whether successors and predecessors form one cycle in ascending did order.
pub fn is_ring(swarms: &[Arc<Swarm>]) -> Result<bool> {
    let mut sorted = swarms.to_vec();
    sorted.sort_by_key(|s| s.did());
    let n = sorted.len();
    for (i, swarm) in sorted.iter().enumerate() {
        let next = sorted[(i + 1) % n].did();
        let prev = sorted[(i + n - 1) % n].did();
        if swarm.dht().successor()? != next || swarm.dht().predecessor()? != Some(prev) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Run stabilization on every node, round by round, until the ring is consistent.
pub async fn stabilize_until_ring(swarms: &[Arc<Swarm>], max_rounds: usize) -> Result<bool> {
    for round in 0..max_rounds {
        if is_ring(swarms)? {
            println!("ring consistent after {} rounds", round);
            return Ok(true);
        }
        for swarm in swarms {
            swarm.stabilizer().stabilize().await?;
        }
    }
    is_ring(swarms)
}

pub fn all_in(swarms: &[Arc<Swarm>], state: LifecycleState) -> bool {
    swarms
        .iter()
        .all(|s| matches!(s.state(), Ok(st) if st == state))
}

pub fn sorted_dids(swarms: &[Arc<Swarm>]) -> Vec<Did> {
    let mut dids = swarms.iter().map(|s| s.did()).collect::<Vec<_>>();
    dids.sort();
    dids
}
