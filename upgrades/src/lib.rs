/*!
# Proxy Upgrades

Deploy contracts behind [ERC-1967] proxies, upgrade them in place, and call
them by a stable logical name.

The crate is split in three parts:

- [`Registry`] remembers, per network, which proxy a logical name is
  deployed behind and every implementation it ever pointed at.
- [`Deployer`] deploys a fresh proxy and implementation for an unknown name,
  or upgrades the existing proxy to a new implementation. Upgrades keep the
  proxy address and its storage, never re-run the initializer, and are
  refused when the new storage layout is incompatible.
- [`InvocationClient`] reads from and sends transactions to the active
  implementation, through the proxy.

All of them talk to the network through the [`Chain`] trait.
[`RpcChain`] is the JSON-RPC implementation.

## Usage

```ignore
use std::sync::Arc;

use upgrades::{
    Artifact, Chain, Config, Deployer, InvocationClient, InvocationRequest,
    Registry, RpcChain,
};

let config = Config::from_env()?;
let chain = Arc::new(RpcChain::connect(&config));
let registry = Arc::new(Registry::from_config(&config)?);
let proxy = Artifact::load("artifacts/ERC1967Proxy.json")?;
let deployer =
    Deployer::new(chain.clone(), registry.clone(), proxy, (&config).into());

let counter = Artifact::load("artifacts/CounterV1.json")?;
let request = deployer
    .request("Counter", counter)
    .with_initializer_args(vec![23_u64.into()]);
deployer.deploy_or_upgrade(request).await?;

let client = InvocationClient::new(chain, registry, (&config).into());
let request =
    InvocationRequest::parse("Counter", "getValue() view returns (uint256)", &[])?;
let value = client.read(&request).await?;
```

[ERC-1967]: https://eips.ethereum.org/EIPS/eip-1967
*/

pub mod artifact;
pub mod chain;
pub mod client;
pub mod config;
pub mod deployer;
mod error;
pub mod proxy;
pub mod registry;

pub use artifact::{Artifact, StorageEntry, StorageLayout};
pub use chain::{Chain, Confirmations, PendingTransaction, Receipt, RpcChain};
pub use client::{InvocationClient, InvocationRequest, Outcome, Target};
pub use config::{Config, RegistryLocation};
pub use deployer::{
    Deployer, Deployment, DeploymentKind, DeploymentRequest, Warning,
};
pub use error::{Error, Result};
pub use registry::{ContractRecord, ImplementationEntry, NameLock, Registry};
