use std::time::Duration;

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{uint, U256},
};
use eyre::Result;
use integration::Infrastructure;
use sandbox::{
    programs::{counter_v1, counter_v2},
    Mining,
};
use upgrades::{
    proxy::Upgraded, Chain, Confirmations, Error, InvocationClient, InvocationRequest,
    Outcome,
};

fn set_value(value: u64) -> Result<InvocationRequest> {
    Ok(InvocationRequest::new(
        "Counter",
        counter_v1().function("setValue")?.clone(),
        vec![U256::from(value).into()],
    ))
}

#[tokio::test]
async fn timed_out_transaction_can_be_awaited_again() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    alice.deploy("Counter", counter_v1(), &[23]).await?;
    alice.chain.set_mining(Mining::Manual);

    let pending = alice.submit(&set_value(56)?).await?;
    let err = alice
        .await_confirmation(&pending, Duration::from_millis(50))
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::Timeout { tx_hash, .. } if tx_hash == pending.tx_hash),
        "{err}"
    );
    assert!(err.is_outcome_unknown());
    assert_eq!(alice.get_value("Counter").await?, uint!(23_U256));

    // Abandoning the wait does not cancel the transaction either.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        alice.await_confirmation(&pending, Duration::from_secs(60)),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(alice.chain.pending(), 1);

    alice.chain.mine(1);

    let receipt = alice.await_confirmation(&pending, Duration::from_secs(1)).await?;
    assert!(receipt.status);
    assert_eq!(receipt.transaction_hash, pending.tx_hash);
    assert!(receipt.block_number > pending.submitted_at);
    assert_eq!(alice.get_value("Counter").await?, uint!(56_U256));
    Ok(())
}

#[tokio::test]
async fn waits_for_required_confirmations() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    alice.deploy("Counter", counter_v1(), &[23]).await?;
    alice.chain.set_mining(Mining::Manual);

    let client = InvocationClient::new(
        alice.chain.clone(),
        infra.registry.clone(),
        Confirmations {
            required: 3,
            timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(5),
        },
    );
    let pending = client.submit(&set_value(56)?).await?;

    alice.chain.mine(1);
    let err = client
        .await_confirmation(&pending, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{err}");

    alice.chain.mine(2);
    let receipt =
        client.await_confirmation(&pending, Duration::from_secs(1)).await?;
    assert_eq!(receipt.confirmations(pending.submitted_at + 3), 3);
    Ok(())
}

#[tokio::test]
async fn reverted_transaction_reports_reason() -> Result<()> {
    let infra = Infrastructure::new()?;
    let Infrastructure { alice, bob, .. } = &infra;
    alice.deploy("Counter", counter_v1(), &[23]).await?;
    let upgrade = InvocationRequest::new(
        "Counter",
        counter_v2().function("upgradeToAndCall")?.clone(),
        vec![bob.address().into(), DynSolValue::Bytes(vec![])],
    );
    let reason = format!("OwnableUnauthorizedAccount({})", bob.address());

    // Rejected by gas estimation, never broadcast.
    let err = bob.submit(&upgrade).await.unwrap_err();
    assert!(
        matches!(
            &err,
            Error::TransactionReverted { tx_hash: None, reason: Some(r), .. }
                if *r == reason
        ),
        "{err}"
    );

    // Mined, then replayed to recover the reason.
    bob.chain.set_gas_estimation(false);
    let err = bob.call(&upgrade).await.unwrap_err();
    let Error::TransactionReverted { tx_hash: Some(tx_hash), reason: r, .. } = &err
    else {
        panic!("expected a mined revert, got {err}");
    };
    assert_eq!(r.as_deref(), Some(reason.as_str()));

    let receipt = bob.chain.transaction_receipt(*tx_hash).await?.expect("mined");
    assert!(!receipt.status);
    Ok(())
}

#[tokio::test]
async fn reads_and_writes_by_mutability() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    let deployment = alice.deploy("Counter", counter_v1(), &[23]).await?;

    let read = InvocationRequest::parse(
        "Counter",
        "function getValue() external view returns (uint256)",
        &[],
    )?;
    let Outcome::Value(values) = alice.call(&read).await? else {
        panic!("getValue should be a read");
    };
    assert_eq!(values, vec![DynSolValue::Uint(uint!(23_U256), 256)]);

    // Forced through a transaction, the result is a receipt instead.
    let Outcome::Receipt(receipt) =
        alice.call(&read.clone().state_mutating(true)).await?
    else {
        panic!("forced transaction should return a receipt");
    };
    assert!(receipt.status);

    let owner = InvocationRequest::parse(
        &deployment.record.proxy().to_string(),
        "owner() view returns (address)",
        &[],
    )?;
    assert_eq!(
        alice.read(&owner).await?,
        vec![DynSolValue::Address(alice.address())]
    );
    Ok(())
}

#[tokio::test]
async fn upgrade_emits_event_through_proxy() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    let v1 = alice.deploy("Counter", counter_v1(), &[23]).await?.record;
    let v2 = alice.deploy("Counter", counter_v2(), &[]).await?.record;

    // Point back at the first implementation by hand.
    let upgrade = InvocationRequest::new(
        "Counter",
        counter_v2().function("upgradeToAndCall")?.clone(),
        vec![v1.implementation().into(), DynSolValue::Bytes(vec![])],
    );
    let Outcome::Receipt(receipt) = alice.call(&upgrade).await? else {
        panic!("upgradeToAndCall should be a transaction");
    };

    assert!(receipt.emits(Upgraded { implementation: v1.implementation() }));
    assert!(!receipt.emits(Upgraded { implementation: v2.implementation() }));
    assert!(receipt.logs.iter().all(|log| log.address == v2.proxy()));
    Ok(())
}
