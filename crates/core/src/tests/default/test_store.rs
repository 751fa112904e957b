use std::time::Duration;

use bytes::Bytes;
use chordnet_transport::connections::MemoryHub;
use tokio::time::sleep;

use crate::error::Error;
use crate::error::Result;
use crate::storage::StoreStatus;
use crate::tests::default::builder;
use crate::tests::default::gen_ring;
use crate::tests::default::stabilize_until_ring;
use crate::tests::default::start;

#[tokio::test]
async fn test_store_and_retrieve_on_three_nodes() -> Result<()> {
    let hub = MemoryHub::new();
    let swarms = gen_ring(&hub, 3).await?;
    assert!(stabilize_until_ring(&swarms, 20).await?);

    let status = swarms[0].store("k", Bytes::from("v")).await?;
    assert_eq!(status, StoreStatus::StoreOk);
    assert_eq!(swarms[0].file_store().owned_keys().len(), 1);

    for swarm in swarms.iter() {
        assert_eq!(swarm.retrieve("k").await?, Some(Bytes::from("v")));
    }
    assert_eq!(swarms[1].retrieve("missing").await?, None);

    // exactly one node holds the item
    let mut holders = 0;
    for swarm in swarms.iter() {
        holders += swarm.file_store().stored_keys().await?.len();
    }
    assert_eq!(holders, 1);

    let status = swarms[2].store("k", Bytes::from("other")).await?;
    assert_eq!(status, StoreStatus::FileExists);
    assert_eq!(swarms[1].retrieve("k").await?, Some(Bytes::from("v")));
    Ok(())
}

#[tokio::test]
async fn test_update_is_fenced_by_ownership() -> Result<()> {
    let hub = MemoryHub::new();
    let swarms = gen_ring(&hub, 3).await?;
    assert!(stabilize_until_ring(&swarms, 20).await?);
    let (owner, other) = (&swarms[1], &swarms[2]);

    assert_eq!(owner.store("k", Bytes::from("v0")).await?, StoreStatus::StoreOk);
    assert_eq!(owner.update("k", Bytes::from("v1")).await?, StoreStatus::UpdateOk);
    assert_eq!(owner.update("k", Bytes::from("v2")).await?, StoreStatus::UpdateOk);
    assert_eq!(other.retrieve("k").await?, Some(Bytes::from("v2")));

    let id = owner.file_store().key_id("k")?;
    let mut seq = None;
    for swarm in swarms.iter() {
        if let Some(item) = swarm.file_store().local_item(id).await? {
            seq = Some(item.seq);
        }
    }
    assert_eq!(seq, Some(2));

    assert!(matches!(
        other.update("k", Bytes::from("v3")).await,
        Err(Error::NotOwner(_))
    ));
    assert!(matches!(
        owner.update("missing", Bytes::from("v")).await,
        Err(Error::NotOwner(key)) if key == "missing"
    ));
    Ok(())
}

#[tokio::test]
async fn test_dropped_item_expires() -> Result<()> {
    let hub = MemoryHub::new();
    let swarm = start(
        builder(&hub)
            .origin(true)
            .item_duration(Duration::from_millis(1000))
            .item_refresh(Duration::from_millis(100)),
    )?;

    assert_eq!(swarm.store("k", Bytes::from("v")).await?, StoreStatus::StoreOk);

    println!("========================================");
    println!("||  kept alive past its duration      ||");
    println!("========================================");
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(swarm.retrieve("k").await?, Some(Bytes::from("v")));

    println!("========================================");
    println!("||  dropped, expires                  ||");
    println!("========================================");
    assert!(swarm.drop_ownership("k")?);
    assert!(!swarm.drop_ownership("k")?);
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(swarm.retrieve("k").await?, None);
    assert!(swarm.file_store().stored_keys().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_items_move_to_new_owner() -> Result<()> {
    let hub = MemoryHub::new();
    let swarms = gen_ring(&hub, 2).await?;
    assert!(stabilize_until_ring(&swarms, 20).await?);

    let keys = (0..8).map(|i| format!("key-{i}")).collect::<Vec<_>>();
    for key in keys.iter() {
        assert_eq!(
            swarms[0].store(key, Bytes::from(key.clone())).await?,
            StoreStatus::StoreOk
        );
    }

    println!("========================================");
    println!("||  a third node takes over its range ||");
    println!("========================================");
    let mut swarms = swarms;
    let node = start(builder(&hub))?;
    node.join(&swarms[0].transport().endpoint()).await?;
    swarms.push(node);
    assert!(stabilize_until_ring(&swarms, 20).await?);
    for swarm in swarms.iter() {
        swarm.stabilizer().stabilize().await?;
    }

    for swarm in swarms.iter() {
        for key in swarm.file_store().stored_keys().await? {
            assert!(swarm.dht().is_responsible(key)?);
        }
    }
    for key in keys.iter() {
        assert_eq!(swarms[2].retrieve(key).await?, Some(Bytes::from(key.clone())));
    }
    Ok(())
}
