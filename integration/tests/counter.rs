use alloy::{
    dyn_abi::DynSolValue,
    primitives::{uint, U256},
};
use eyre::Result;
use integration::Infrastructure;
use sandbox::programs::{counter_v1, counter_v2};
use upgrades::{
    proxy::IMPLEMENTATION_SLOT, Chain, Deployer, DeploymentKind, Error, Warning,
};

#[tokio::test]
async fn upgrade_preserves_state() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;

    let deployment = alice.deploy("Counter", counter_v1(), &[23]).await?;
    assert_eq!(deployment.kind, DeploymentKind::Deployed);
    assert!(deployment.warnings.is_empty());
    assert_eq!(deployment.record.history().len(), 1);
    let proxy = deployment.record.proxy();
    assert_eq!(alice.get_value("Counter").await?, uint!(23_U256));

    alice.set_value("Counter", 56).await?;
    assert_eq!(alice.get_value("Counter").await?, uint!(56_U256));

    // Not there yet.
    assert!(alice.increase_value("Counter", 25).await.is_err());

    let upgrade = alice.deploy("Counter", counter_v2(), &[]).await?;
    assert_eq!(upgrade.kind, DeploymentKind::Upgraded);
    assert!(upgrade.warnings.is_empty());
    assert_eq!(upgrade.record.proxy(), proxy);
    assert_eq!(upgrade.record.history().len(), 2);
    assert_eq!(upgrade.record.current().artifact.as_deref(), Some("CounterV2"));
    assert_eq!(alice.get_value("Counter").await?, uint!(56_U256));

    alice.increase_value("Counter", 25).await?;
    assert_eq!(alice.get_value("Counter").await?, uint!(81_U256));

    let slot = alice.chain.storage_at(proxy, IMPLEMENTATION_SLOT).await?;
    assert_eq!(slot, upgrade.record.implementation().into_word());
    Ok(())
}

#[tokio::test]
async fn upgrade_ignores_initializer_args() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    alice.deploy("Counter", counter_v1(), &[23]).await?;
    alice.set_value("Counter", 56).await?;

    let upgrade = alice.deploy("Counter", counter_v2(), &[99]).await?;

    assert_eq!(
        upgrade.warnings,
        vec![Warning::InitializerIgnored {
            args: vec![DynSolValue::from(U256::from(99))]
        }]
    );
    assert_eq!(alice.get_value("Counter").await?, uint!(56_U256));
    Ok(())
}

#[tokio::test]
async fn every_upgrade_extends_history() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    let proxy = alice.deploy("Counter", counter_v1(), &[1]).await?.record.proxy();

    for artifact in [counter_v2(), counter_v1(), counter_v2()] {
        alice.deploy("Counter", artifact, &[]).await?;
    }

    let record = infra.registry.lookup("Counter")?;
    assert_eq!(record.history().len(), 4);
    assert_eq!(record.proxy(), proxy);
    assert_eq!(record.implementation(), record.history()[3].address);
    assert!(record
        .history()
        .windows(2)
        .all(|w| w[0].block_number < w[1].block_number
            && w[0].deployed_at < w[1].deployed_at));
    assert_eq!(alice.get_value("Counter").await?, uint!(1_U256));
    Ok(())
}

#[tokio::test]
async fn unknown_name_is_not_found() -> Result<()> {
    let infra = Infrastructure::new()?;

    let err = infra.alice.get_value("Counter").await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::NotFound(name)) if name == "Counter"
    ));
    assert!(matches!(infra.registry.lookup("Counter"), Err(Error::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn calls_explicit_address() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    let proxy = alice.deploy("Counter", counter_v1(), &[7]).await?.record.proxy();

    alice.set_value(proxy, 8).await?;

    assert_eq!(alice.get_value(proxy).await?, uint!(8_U256));
    assert_eq!(alice.get_value("Counter").await?, uint!(8_U256));
    Ok(())
}

#[tokio::test]
async fn registry_survives_reopen() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    alice.deploy("Counter", counter_v1(), &[23]).await?;
    let record = alice.deploy("Counter", counter_v2(), &[]).await?.record;

    let reopened = infra.reopen_registry()?;

    assert_eq!(reopened.lookup("Counter")?, record);
    assert_eq!(reopened.records().len(), 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_deployments_share_one_proxy() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;

    let deployments = futures::future::join_all(
        (0..4).map(|i| async move { alice.deploy("Counter", counter_v1(), &[i]).await }),
    )
    .await
    .into_iter()
    .collect::<Result<Vec<_>, _>>()?;

    let fresh: Vec<_> = deployments
        .iter()
        .enumerate()
        .filter(|(_, d)| d.kind == DeploymentKind::Deployed)
        .collect();
    assert_eq!(fresh.len(), 1);
    let (initialized_with, first) = fresh[0];

    let proxy = first.record.proxy();
    assert!(deployments.iter().all(|d| d.record.proxy() == proxy));
    assert_eq!(infra.registry.lookup("Counter")?.history().len(), 4);
    assert_eq!(
        alice.get_value("Counter").await?,
        U256::from(initialized_with)
    );
    Ok(())
}

#[tokio::test]
async fn racing_deployers_never_register_two_proxies() -> Result<()> {
    let infra = Infrastructure::new()?;
    let Infrastructure { alice, bob, .. } = &infra;

    let (from_alice, from_bob) = tokio::join!(
        alice.deploy("Counter", counter_v1(), &[1]),
        bob.deploy("Counter", counter_v1(), &[2]),
    );

    let results = [from_alice, from_bob];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(
                err,
                Error::DuplicateName { .. } | Error::UnauthorizedUpgrade { .. }
            ),
            "{err}"
        );
    }
    assert_eq!(infra.registry.records().len(), 1);
    assert_eq!(infra.registry.lookup("Counter")?.history().len(), 1);
    Ok(())
}

#[tokio::test]
async fn upgrade_only_deployer_needs_no_proxy_artifact() -> Result<()> {
    let infra = Infrastructure::new()?;
    let alice = &infra.alice;
    let deployer = Deployer::for_upgrades(
        alice.chain.clone(),
        infra.registry.clone(),
        (&alice.config).into(),
    );
    let head = alice.chain.block_number().await?;

    let err = deployer
        .deploy_or_upgrade(deployer.request("Counter", counter_v1()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err}");
    assert_eq!(alice.chain.block_number().await?, head);
    assert!(infra.registry.records().is_empty());

    let proxy = alice.deploy("Counter", counter_v1(), &[23]).await?.record.proxy();
    let upgrade = deployer
        .deploy_or_upgrade(deployer.request("Counter", counter_v2()))
        .await?;
    assert_eq!(upgrade.kind, DeploymentKind::Upgraded);
    assert_eq!(upgrade.record.proxy(), proxy);
    assert_eq!(deployer.reconcile("Counter").await?, upgrade.record);
    assert_eq!(alice.get_value("Counter").await?, uint!(23_U256));
    Ok(())
}
