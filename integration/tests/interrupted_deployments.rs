use std::{sync::Arc, time::Duration};

use alloy::{
    network::TransactionBuilder,
    primitives::{Address, Bytes, TxHash, B256, U256},
    rpc::types::TransactionRequest,
    sol_types::SolCall,
};
use eyre::Result;
use integration::Infrastructure;
use sandbox::{
    programs::{counter_v1, counter_v2, proxy_artifact},
    Mining, Sandbox,
};
use upgrades::{
    proxy::{IUUPSUpgradeable::upgradeToAndCallCall, IMPLEMENTATION_SLOT},
    Chain, Confirmations, Deployer, Error, Receipt,
};

/// Sandbox letting `interfere` adjust the chain or the transaction right
/// before each submission.
struct Interfering {
    chain: Sandbox,
    interfere: fn(&Sandbox, &mut TransactionRequest),
}

impl Chain for Interfering {
    fn sender(&self) -> Address {
        self.chain.sender()
    }

    async fn chain_id(&self) -> upgrades::Result<u64> {
        self.chain.chain_id().await
    }

    async fn send_transaction(
        &self,
        mut tx: TransactionRequest,
    ) -> upgrades::Result<TxHash> {
        (self.interfere)(&self.chain, &mut tx);
        self.chain.send_transaction(tx).await
    }

    async fn call(
        &self,
        tx: TransactionRequest,
        block: Option<u64>,
    ) -> upgrades::Result<Bytes> {
        self.chain.call(tx, block).await
    }

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> upgrades::Result<Option<Receipt>> {
        self.chain.transaction_receipt(hash).await
    }

    async fn block_number(&self) -> upgrades::Result<u64> {
        self.chain.block_number().await
    }

    async fn block_timestamp(&self, number: u64) -> upgrades::Result<u64> {
        self.chain.block_timestamp(number).await
    }

    async fn storage_at(
        &self,
        address: Address,
        slot: B256,
    ) -> upgrades::Result<B256> {
        self.chain.storage_at(address, slot).await
    }
}

fn input_starts_with(tx: &TransactionRequest, prefix: &[u8]) -> bool {
    tx.input.input().is_some_and(|input| input.starts_with(prefix))
}

fn creates_proxy(tx: &TransactionRequest) -> bool {
    input_starts_with(tx, &proxy_artifact().bytecode)
}

fn upgrades_proxy(tx: &TransactionRequest) -> bool {
    input_starts_with(tx, &upgradeToAndCallCall::SELECTOR)
}

/// Stop mining when the proxy creation comes in.
fn hold_proxy_creation(chain: &Sandbox, tx: &mut TransactionRequest) {
    if creates_proxy(tx) {
        chain.set_mining(Mining::Manual);
    }
}

/// Stop mining when the upgrade comes in.
fn hold_upgrade(chain: &Sandbox, tx: &mut TransactionRequest) {
    if upgrades_proxy(tx) {
        chain.set_mining(Mining::Manual);
    }
}

/// Point the upgrade at an account without code, and let it through to the
/// chain so that it reverts there.
fn break_upgrade(chain: &Sandbox, tx: &mut TransactionRequest) {
    if upgrades_proxy(tx) {
        chain.set_gas_estimation(false);
        let call = upgradeToAndCallCall {
            newImplementation: Address::ZERO,
            data: Bytes::new(),
        };
        tx.set_input(call.abi_encode());
    }
}

fn impatient() -> Confirmations {
    Confirmations {
        required: 1,
        timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(5),
    }
}

fn interfering_deployer(
    infra: &Infrastructure,
    interfere: fn(&Sandbox, &mut TransactionRequest),
) -> Deployer<Interfering> {
    let chain =
        Interfering { chain: infra.alice.chain.as_ref().clone(), interfere };
    Deployer::new(
        Arc::new(chain),
        infra.registry.clone(),
        proxy_artifact(),
        impatient(),
    )
}

#[tokio::test]
async fn unconfirmed_proxy_is_not_recorded() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    let deployer = interfering_deployer(&infra, hold_proxy_creation);

    let err = deployer
        .deploy_or_upgrade(deployer.request("Counter", counter_v1()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }), "{err}");
    assert!(err.is_outcome_unknown());
    // The implementation went through, the proxy is still pending.
    assert_eq!(alice.chain.pending(), 1);
    assert!(matches!(infra.registry.lookup("Counter"), Err(Error::NotFound(_))));

    alice.chain.mine(1);
    assert_eq!(alice.chain.pending(), 0);
    assert!(matches!(infra.registry.lookup("Counter"), Err(Error::NotFound(_))));
    assert!(matches!(
        infra.reopen_registry()?.lookup("Counter"),
        Err(Error::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn unconfirmed_upgrade_is_recovered_by_reconcile() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    let before = alice.deploy("Counter", counter_v1(), &[23]).await?.record;
    let proxy = before.proxy();
    let deployer = interfering_deployer(&infra, hold_upgrade);

    let err = deployer
        .deploy_or_upgrade(deployer.request("Counter", counter_v2()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }), "{err}");
    assert_eq!(infra.registry.lookup("Counter")?, before);
    assert_eq!(infra.reopen_registry()?.lookup("Counter")?, before);
    // Nothing to reconcile while the upgrade is pending.
    assert_eq!(deployer.reconcile("Counter").await?, before);

    alice.chain.mine(1);
    let record = deployer.reconcile("Counter").await?;

    assert_eq!(record.proxy(), proxy);
    assert_eq!(record.history().len(), 2);
    assert_ne!(record.implementation(), before.implementation());
    assert_eq!(record.current().artifact, None);
    let slot = alice.chain.storage_at(proxy, IMPLEMENTATION_SLOT).await?;
    assert_eq!(slot, record.implementation().into_word());
    assert_eq!(alice.get_value("Counter").await?, U256::from(23));
    Ok(())
}

#[tokio::test]
async fn reverted_upgrade_leaves_registry_untouched() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    let before = alice.deploy("Counter", counter_v1(), &[23]).await?.record;
    let head = alice.chain.block_number().await?;
    let deployer = interfering_deployer(&infra, break_upgrade);

    let err = deployer
        .deploy_or_upgrade(deployer.request("Counter", counter_v2()))
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::TransactionReverted { tx_hash: Some(_), .. }),
        "{err}"
    );
    // Implementation and upgrade both made it into blocks.
    assert_eq!(alice.chain.block_number().await?, head + 2);
    assert_eq!(infra.registry.lookup("Counter")?, before);
    assert_eq!(infra.reopen_registry()?.lookup("Counter")?, before);
    let slot = alice.chain.storage_at(before.proxy(), IMPLEMENTATION_SLOT).await?;
    assert_eq!(slot, before.implementation().into_word());
    assert_eq!(deployer.reconcile("Counter").await?, before);
    Ok(())
}
