use std::str::FromStr;
use std::sync::Arc;

use chordnet_transport::connections::MemoryHub;

use crate::dht::Did;
use crate::error::Error;
use crate::error::Result;
use crate::swarm::Swarm;
use crate::tests::default::builder;
use crate::tests::default::is_ring;
use crate::tests::default::start;

/// Ring stabilization only, fingers beyond the successor stay untouched.
async fn stabilize_successors(swarms: &[Arc<Swarm>], max_rounds: usize) -> Result<bool> {
    for _ in 0..max_rounds {
        if is_ring(swarms)? {
            return Ok(true);
        }
        for swarm in swarms {
            swarm.overlay().stabilize().await?;
        }
    }
    is_ring(swarms)
}

/// `n` nodes at `0x08, 0x10, ..`, joined from the highest down so every join
/// lands right after the origin. Nobody fixes fingers, lookups walk successors.
async fn successor_only_ring(hub: &Arc<MemoryHub>, n: u8) -> Result<Vec<Arc<Swarm>>> {
    let origin = start(builder(hub).origin(true).did(Did::from_str("0x08")?))?;
    let endpoint = origin.transport().endpoint();
    let mut swarms = vec![origin];
    for i in (2..=n).rev() {
        let did = Did::from_str(&format!("0x{:02x}", i * 8))?;
        let swarm = start(builder(hub).did(did))?;
        swarm.join(&endpoint).await?;
        swarms.push(swarm);
        assert!(stabilize_successors(&swarms, 10).await?);
    }
    Ok(swarms)
}

#[tokio::test]
async fn test_lookup_fails_when_walk_is_too_long() -> Result<()> {
    let hub = MemoryHub::new();
    let swarms = successor_only_ring(&hub, 18).await?;
    let origin = swarms[0].overlay();
    assert_eq!(origin.did(), Did::from_str("0x08")?);

    println!("========================================");
    println!("||  short walks resolve               ||");
    println!("========================================");
    assert_eq!(
        origin.find_successor(Did::from_str("0x19")?).await?,
        Did::from_str("0x20")?
    );
    assert_eq!(
        origin.find_predecessor(Did::from_str("0x40")?).await?,
        Did::from_str("0x38")?
    );

    println!("========================================");
    println!("||  a walk around the ring gives up   ||");
    println!("========================================");
    let res = origin.find_predecessor(Did::from_str("0x08")?).await;
    assert!(
        matches!(res, Err(Error::LookupNotConverged(id)) if id == Did::from_str("0x08")?),
        "{:?}",
        res
    );
    let res = origin.find_successor(Did::from_str("0x05")?).await;
    assert!(matches!(res, Err(Error::LookupNotConverged(_))));
    Ok(())
}
