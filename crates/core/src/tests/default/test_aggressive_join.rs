use std::str::FromStr;

use chordnet_transport::connections::MemoryHub;

use crate::dht::Did;
use crate::dht::LifecycleState;
use crate::error::Result;
use crate::tests::default::builder;
use crate::tests::default::stabilize_until_ring;
use crate::tests::default::start;

#[tokio::test]
async fn test_aggressive_join_builds_fingers() -> Result<()> {
    let hub = MemoryHub::new();
    let a = start(builder(&hub).origin(true).did(Did::from_str("0x10")?))?;
    let b = start(builder(&hub).did(Did::from_str("0x60")?))?;
    let c = start(builder(&hub).did(Did::from_str("0xb0")?))?;
    let endpoint = a.transport().endpoint();

    println!("========================================");
    println!("||  0x60 joins 0x10 aggressively      ||");
    println!("========================================");
    b.join_aggressive(&endpoint).await?;
    assert_eq!(a.dht().successor()?, b.did());
    assert_eq!(a.dht().predecessor()?, Some(b.did()));
    assert_eq!(b.dht().successor()?, a.did());
    assert_eq!(b.dht().predecessor()?, Some(a.did()));
    assert_eq!(a.state()?, LifecycleState::Fragile);
    assert_eq!(b.state()?, LifecycleState::Fragile);

    println!("========================================");
    println!("||  0xb0 joins 0x10 aggressively      ||");
    println!("========================================");
    c.join_aggressive(&endpoint).await?;
    assert_eq!(c.dht().successor()?, a.did());
    assert_eq!(c.dht().predecessor()?, Some(b.did()));

    let swarms = vec![a.clone(), b.clone(), c.clone()];
    assert!(stabilize_until_ring(&swarms, 10).await?);

    for swarm in swarms.iter() {
        let overlay = swarm.overlay();
        assert_eq!(overlay.find_successor(Did::from_str("0x70")?).await?, c.did());
        assert_eq!(overlay.find_successor(Did::from_str("0x05")?).await?, a.did());
        assert_eq!(overlay.find_successor(Did::from_str("0xc0")?).await?, a.did());
        assert_eq!(overlay.find_successor(Did::from_str("0x60")?).await?, b.did());
    }
    Ok(())
}
