use std::time::Duration;

use chordnet_transport::connections::MemoryHub;

use crate::dht::LifecycleState;
use crate::dht::StabilizeIntervals;
use crate::error::Result;
use crate::tests::default::all_in;
use crate::tests::default::gen_ring;
use crate::tests::default::is_ring;
use crate::tests::default::prepare_node;
use crate::tests::default::stabilize_until_ring;
use crate::tests::default::wait_for;

#[tokio::test]
async fn test_stable_join_two_nodes() -> Result<()> {
    let hub = MemoryHub::new();
    let node1 = prepare_node(&hub, true)?;
    let node2 = prepare_node(&hub, false)?;
    assert_eq!(node1.state()?, LifecycleState::Origin);
    assert_eq!(node2.state()?, LifecycleState::Disconnected);

    println!("========================================");
    println!("||  node2 join through node1          ||");
    println!("========================================");
    let known = node2.join(&node1.transport().endpoint()).await?;
    assert_eq!(known, node1.did());
    assert_eq!(node2.dht().successor()?, node1.did());
    assert_eq!(node2.state()?, LifecycleState::Partial);

    println!("========================================");
    println!("||  stabilize node2 then node1        ||");
    println!("========================================");
    node2.stabilizer().stabilize().await?;
    node1.stabilizer().stabilize().await?;

    assert_eq!(node1.dht().successor()?, node2.did());
    assert_eq!(node2.dht().predecessor()?, Some(node1.did()));
    assert_eq!(node2.dht().successor()?, node1.did());
    assert_eq!(node1.dht().predecessor()?, Some(node2.did()));
    assert_eq!(node1.state()?, LifecycleState::Stable);

    node2.stabilizer().stabilize().await?;
    assert_eq!(node2.state()?, LifecycleState::Stable);
    Ok(())
}

#[tokio::test]
async fn test_ring_convergence() -> Result<()> {
    let hub = MemoryHub::new();
    let swarms = gen_ring(&hub, 5).await?;
    assert!(!is_ring(&swarms)?);

    assert!(stabilize_until_ring(&swarms, 30).await?);
    for swarm in swarms.iter() {
        swarm.stabilizer().stabilize().await?;
    }
    assert!(is_ring(&swarms)?);
    assert!(all_in(&swarms, LifecycleState::Stable));

    // lookups through the refreshed fingers land on the node itself
    for _ in 0..60 {
        for swarm in swarms.iter() {
            if let Err(e) = swarm.overlay().fix_fingers().await {
                println!("fix_fingers of {} failed: {}", swarm.did(), e);
            }
        }
    }
    for swarm in swarms.iter() {
        let succ = swarm.overlay().find_successor(swarm.did()).await?;
        assert_eq!(succ, swarm.did());
    }
    Ok(())
}

#[tokio::test]
async fn test_lost_successor() -> Result<()> {
    let hub = MemoryHub::new();
    let swarms = gen_ring(&hub, 3).await?;
    assert!(stabilize_until_ring(&swarms, 20).await?);

    let mut sorted = swarms.clone();
    sorted.sort_by_key(|s| s.did());
    let (node, succ) = (sorted[0].clone(), sorted[1].clone());

    println!("========================================");
    println!("||  close connection to successor     ||");
    println!("========================================");
    node.disconnect(succ.did()).await?;
    assert!(
        wait_for(Duration::from_secs(2), || {
            node.dht().successor().ok() != Some(succ.did())
        })
        .await
    );
    assert!(!node.transport().is_connected(succ.did()));
    Ok(())
}

#[tokio::test]
async fn test_background_stabilization() -> Result<()> {
    let hub = MemoryHub::new();
    let swarms = gen_ring(&hub, 4).await?;
    for swarm in swarms.iter() {
        let intervals = StabilizeIntervals::uniform(Duration::from_millis(100));
        tokio::spawn(swarm.stabilizer().wait(intervals));
    }
    assert!(
        wait_for(Duration::from_secs(15), || {
            is_ring(&swarms).unwrap_or(false) && all_in(&swarms, LifecycleState::Stable)
        })
        .await
    );
    Ok(())
}
