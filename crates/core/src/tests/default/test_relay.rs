use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use chordnet_transport::connections::MemoryHub;

use crate::dht::Did;
use crate::dht::LifecycleState;
use crate::error::Result;
use crate::storage::StoreStatus;
use crate::tests::default::builder;
use crate::tests::default::prepare_node;
use crate::tests::default::stabilize_until_ring;
use crate::tests::default::start;
use crate::tests::default::wait_for;

fn half_ring_did(prefix: &str) -> Result<Did> {
    Did::from_str(&format!("0x{}{}", prefix, "0".repeat(54)))
}

#[tokio::test]
async fn test_external_node_calls_through_its_server() -> Result<()> {
    let hub = MemoryHub::new();
    let a = start(builder(&hub).origin(true).did(half_ring_did("40")?))?;
    let c = start(builder(&hub).did(half_ring_did("c0")?))?;
    c.join(&a.transport().endpoint()).await?;
    assert!(stabilize_until_ring(&[a.clone(), c.clone()], 20).await?);

    println!("========================================");
    println!("||  b only connects to a              ||");
    println!("========================================");
    let b = prepare_node(&hub, false)?;
    let server = b.transport().connect_endpoint(&a.transport().endpoint()).await?;
    assert_eq!(server, a.did());
    assert!(
        wait_for(Duration::from_secs(5), || matches!(
            b.state(),
            Ok(LifecycleState::External)
        ))
        .await
    );

    // two items held by each ring node
    let (mut at_a, mut at_c) = (vec![], vec![]);
    for i in 0..64 {
        let key = format!("key-{i}");
        let id = b.file_store().key_id(&key)?;
        if c.dht().is_responsible(id)? {
            at_c.push(key);
        } else {
            at_a.push(key);
        }
    }
    let keys = at_a
        .into_iter()
        .take(2)
        .chain(at_c.into_iter().take(2))
        .collect::<Vec<_>>();
    assert_eq!(keys.len(), 4);

    println!("========================================");
    println!("||  store, read and update via a      ||");
    println!("========================================");
    for key in keys.iter() {
        assert_eq!(
            b.store(key, Bytes::from(key.clone())).await?,
            StoreStatus::StoreOk
        );
        assert_eq!(b.retrieve(key).await?, Some(Bytes::from(key.clone())));
        assert_eq!(b.update(key, Bytes::from("next")).await?, StoreStatus::UpdateOk);
        assert_eq!(c.retrieve(key).await?, Some(Bytes::from("next")));
    }
    assert_eq!(b.file_store().owned_keys().len(), 4);
    assert!(b.file_store().stored_keys().await?.is_empty());
    assert_eq!(a.file_store().stored_keys().await?.len(), 2);
    assert_eq!(c.file_store().stored_keys().await?.len(), 2);

    assert_eq!(b.state()?, LifecycleState::External);
    assert_eq!(b.transport().get_connection_ids(), vec![a.did()]);
    Ok(())
}
