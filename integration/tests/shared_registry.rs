use std::{sync::Arc, time::Duration};

use alloy::{
    primitives::{Address, Bytes, TxHash, B256},
    rpc::types::TransactionRequest,
};
use eyre::Result;
use integration::Infrastructure;
use sandbox::{
    programs::{counter_v1, counter_v2, proxy_artifact},
    Sandbox,
};
use upgrades::{proxy::IMPLEMENTATION_SLOT, Chain, Deployer, Receipt};

/// Sandbox whose block timestamps take a while to come back, widening the
/// gap between the on-chain upgrade and its registry write.
struct SlowTimestamps(Sandbox);

impl Chain for SlowTimestamps {
    fn sender(&self) -> Address {
        self.0.sender()
    }

    async fn chain_id(&self) -> upgrades::Result<u64> {
        self.0.chain_id().await
    }

    async fn send_transaction(
        &self,
        tx: TransactionRequest,
    ) -> upgrades::Result<TxHash> {
        self.0.send_transaction(tx).await
    }

    async fn call(
        &self,
        tx: TransactionRequest,
        block: Option<u64>,
    ) -> upgrades::Result<Bytes> {
        self.0.call(tx, block).await
    }

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> upgrades::Result<Option<Receipt>> {
        self.0.transaction_receipt(hash).await
    }

    async fn block_number(&self) -> upgrades::Result<u64> {
        self.0.block_number().await
    }

    async fn block_timestamp(&self, number: u64) -> upgrades::Result<u64> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.0.block_timestamp(number).await
    }

    async fn storage_at(
        &self,
        address: Address,
        slot: B256,
    ) -> upgrades::Result<B256> {
        self.0.storage_at(address, slot).await
    }
}

#[tokio::test]
async fn deployers_sharing_a_registry_upgrade_one_at_a_time() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    let proxy = alice.deploy("Counter", counter_v1(), &[23]).await?.record.proxy();

    let slow = Deployer::new(
        Arc::new(SlowTimestamps(alice.chain.as_ref().clone())),
        infra.registry.clone(),
        proxy_artifact(),
        (&alice.config).into(),
    );

    let (first, second) = tokio::join!(
        slow.deploy_or_upgrade(slow.request("Counter", counter_v2())),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            alice.deploy("Counter", counter_v1(), &[]).await
        }
    );
    first?;
    second?;

    let record = infra.registry.lookup("Counter")?;
    assert_eq!(record.proxy(), proxy);
    assert_eq!(record.history().len(), 3);
    assert!(record
        .history()
        .windows(2)
        .all(|pair| pair[0].block_number < pair[1].block_number));

    let slot = alice.chain.storage_at(proxy, IMPLEMENTATION_SLOT).await?;
    assert_eq!(slot, record.implementation().into_word());
    assert_eq!(infra.reopen_registry()?.lookup("Counter")?, record);
    Ok(())
}

#[tokio::test]
async fn locks_are_released_after_use() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    alice.deploy("Counter", counter_v1(), &[23]).await?;

    // Nothing holds the name once the deployment returned.
    let lock = tokio::time::timeout(
        Duration::from_millis(100),
        infra.registry.lock("Counter"),
    )
    .await?;
    drop(lock);

    infra.bob.deployer.reconcile("Counter").await?;
    Ok(())
}
