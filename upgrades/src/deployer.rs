//! Deploy a contract behind an ERC-1967 proxy, or upgrade the proxy already
//! registered under the same name.
use std::{fmt, sync::Arc};

use alloy::{
    dyn_abi::DynSolValue,
    network::TransactionBuilder,
    primitives::{Address, Bytes, U256},
    rpc::types::TransactionRequest,
    sol_types::SolCall,
};
use tracing::{error, info, warn};

use crate::{
    artifact::{Artifact, LayoutNote},
    chain::{self, Chain, Confirmations, Receipt},
    proxy::{self, IUUPSUpgradeable::upgradeToAndCallCall, IMPLEMENTATION_SLOT},
    registry::{ContractRecord, ImplementationEntry, Registry},
    Error, Result,
};

/// Initializer called when no other is requested.
pub const DEFAULT_INITIALIZER: &str = "initialize";

/// What to deploy, and under which name.
#[derive(Clone, Debug)]
pub struct DeploymentRequest {
    /// Logical name the proxy is registered under.
    pub name: String,
    /// Implementation to deploy.
    pub artifact: Artifact,
    /// Function run once, through the proxy, on first deployment.
    pub initializer: String,
    /// Arguments of the initializer. Ignored on upgrades.
    pub args: Vec<DynSolValue>,
    /// Network the request targets. Must match the registry's.
    pub network: String,
}

impl DeploymentRequest {
    /// Deploy `artifact` as `name` on `network`, calling `initialize()`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        artifact: Artifact,
        network: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            artifact,
            initializer: DEFAULT_INITIALIZER.to_string(),
            args: Vec::new(),
            network: network.into(),
        }
    }

    /// Call `initializer` instead of `initialize`.
    #[must_use]
    pub fn with_initializer(mut self, initializer: impl Into<String>) -> Self {
        self.initializer = initializer.into();
        self
    }

    /// Pass `args` to the initializer.
    #[must_use]
    pub fn with_initializer_args(mut self, args: Vec<DynSolValue>) -> Self {
        self.args = args;
        self
    }
}

/// Whether a request created a new proxy or upgraded an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentKind {
    /// A new proxy and implementation were deployed.
    Deployed,
    /// An existing proxy now points at a new implementation.
    Upgraded,
}

/// Something the caller should know about a successful deployment.
#[derive(Clone, Debug, PartialEq)]
pub enum Warning {
    /// Initializer arguments were supplied for an upgrade and not used.
    InitializerIgnored {
        /// The ignored arguments.
        args: Vec<DynSolValue>,
    },
    /// A state variable was renamed between implementations.
    VariableRenamed {
        /// Slot of the variable.
        slot: U256,
        /// Previous name.
        from: String,
        /// New name.
        to: String,
    },
    /// The storage layout of one of the implementations is unknown, so the
    /// upgrade was not checked for compatibility.
    UnknownLayout,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializerIgnored { args } => write!(
                f,
                "{} initializer argument(s) ignored: the proxy is already initialized",
                args.len()
            ),
            Self::VariableRenamed { slot, from, to } => {
                write!(f, "variable at slot {slot} renamed from `{from}` to `{to}`")
            }
            Self::UnknownLayout => {
                write!(f, "storage layout unknown, compatibility not checked")
            }
        }
    }
}

/// Result of [`Deployer::deploy_or_upgrade`].
#[derive(Clone, Debug)]
pub struct Deployment {
    /// Registry record after the operation.
    pub record: ContractRecord,
    /// What happened.
    pub kind: DeploymentKind,
    /// Non-fatal findings.
    pub warnings: Vec<Warning>,
}

/// Deploys and upgrades proxied contracts, keeping the [`Registry`] in sync.
///
/// Requests for the same name are serialized through [`Registry::lock`],
/// also across deployers sharing the registry. Different names proceed
/// concurrently.
#[derive(Debug)]
pub struct Deployer<C> {
    chain: Arc<C>,
    registry: Arc<Registry>,
    proxy: Option<Artifact>,
    confirmations: Confirmations,
}

impl<C: Chain> Deployer<C> {
    /// Create a deployer fronting implementations with the `proxy`
    /// artifact.
    #[must_use]
    pub fn new(
        chain: Arc<C>,
        registry: Arc<Registry>,
        proxy: Artifact,
        confirmations: Confirmations,
    ) -> Self {
        Self { chain, registry, proxy: Some(proxy), confirmations }
    }

    /// Create a deployer that only upgrades and reconciles proxies already
    /// in the registry. Fresh deployments fail with
    /// [`Error::Configuration`].
    #[must_use]
    pub fn for_upgrades(
        chain: Arc<C>,
        registry: Arc<Registry>,
        confirmations: Confirmations,
    ) -> Self {
        Self { chain, registry, proxy: None, confirmations }
    }

    /// Registry this deployer records into.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Request deploying `artifact` as `name` on the registry's network.
    #[must_use]
    pub fn request(
        &self,
        name: impl Into<String>,
        artifact: Artifact,
    ) -> DeploymentRequest {
        DeploymentRequest::new(name, artifact, self.registry.network())
    }

    /// Deploy `request.artifact` behind a new proxy if `request.name` is
    /// unknown, or upgrade the registered proxy to it otherwise.
    ///
    /// Upgrades never run the initializer again. The registry is only
    /// updated once every transaction is confirmed.
    ///
    /// # Errors
    ///
    /// * [`Error::Configuration`] if the request targets another network,
    ///   or needs a fresh proxy and the deployer has no proxy artifact.
    /// * [`Error::IncompatibleLayout`] if the new implementation would
    ///   corrupt the proxy's storage. Nothing is deployed.
    /// * [`Error::UnauthorizedUpgrade`] if the signer may not upgrade the
    ///   proxy.
    /// * [`Error::TransactionReverted`] or [`Error::Timeout`] if a
    ///   transaction fails or is not confirmed in time.
    pub async fn deploy_or_upgrade(
        &self,
        request: DeploymentRequest,
    ) -> Result<Deployment> {
        if request.network != self.registry.network() {
            return Err(Error::Configuration(format!(
                "request targets network `{}` but the registry tracks `{}`",
                request.network,
                self.registry.network()
            )));
        }

        let _guard = self.registry.lock(&request.name).await;

        match self.registry.lookup(&request.name) {
            Ok(record) => self.upgrade(record, request).await,
            Err(Error::NotFound(_)) => self.deploy(request).await,
            Err(e) => Err(e),
        }
    }

    /// Align the registry with the implementation the proxy of `name`
    /// actually points at.
    ///
    /// When the proxy was upgraded outside of this deployer, an entry with
    /// unknown artifact and layout is appended.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] if `name` was never deployed.
    /// * [`Error::UnexpectedImplementation`] if the proxy has no
    ///   implementation at all.
    pub async fn reconcile(&self, name: &str) -> Result<ContractRecord> {
        let _guard = self.registry.lock(name).await;

        let record = self.registry.lookup(name)?;
        let proxy = record.proxy();
        let actual = self.implementation_of(proxy).await?;

        if actual == record.implementation() {
            return Ok(record);
        }
        if actual.is_zero() {
            return Err(Error::UnexpectedImplementation {
                proxy,
                expected: record.implementation(),
                actual,
            });
        }

        warn!(
            name,
            %proxy,
            recorded = %record.implementation(),
            %actual,
            "proxy was upgraded outside of the registry"
        );
        let block_number = self.chain.block_number().await?;
        let deployed_at = self.chain.block_timestamp(block_number).await?;
        self.registry.record_upgrade(
            name,
            record.implementation(),
            ImplementationEntry {
                address: actual,
                deployed_at,
                block_number,
                artifact: None,
                layout: None,
            },
        )
    }

    async fn deploy(&self, request: DeploymentRequest) -> Result<Deployment> {
        let DeploymentRequest { name, artifact, initializer, args, .. } =
            request;
        let Some(proxy_artifact) = &self.proxy else {
            return Err(Error::Configuration(format!(
                "`{name}` is not deployed yet and no proxy artifact is configured"
            )));
        };

        let data = if artifact.abi.function(&initializer).is_some() {
            artifact.encode_call(&initializer, &args)?
        } else if args.is_empty() {
            Bytes::new()
        } else {
            return Err(Error::Artifact(format!(
                "`{}` has no initializer `{initializer}` to pass {} argument(s) to",
                artifact.name,
                args.len()
            )));
        };

        info!(name, artifact = %artifact.name, "deploying implementation");
        let (implementation, receipt) =
            self.create(artifact.bytecode.clone()).await?;

        info!(name, %implementation, "deploying proxy");
        let mut code = proxy_artifact.bytecode.to_vec();
        code.extend(proxy::constructor_args(implementation, data));
        let (proxy, _) = self.create(code.into()).await?;

        let entry = self.entry(implementation, &receipt, &artifact).await?;
        let record = self.registry.record_deployment(&name, proxy, entry)?;

        Ok(Deployment {
            record,
            kind: DeploymentKind::Deployed,
            warnings: Vec::new(),
        })
    }

    async fn upgrade(
        &self,
        record: ContractRecord,
        request: DeploymentRequest,
    ) -> Result<Deployment> {
        let DeploymentRequest { name, artifact, args, .. } = request;
        let proxy = record.proxy();
        let mut warnings = Vec::new();

        if !args.is_empty() {
            warn!(
                name,
                %proxy,
                args = args.len(),
                "ignoring initializer arguments on upgrade"
            );
            warnings.push(Warning::InitializerIgnored { args });
        }

        match record.current().layout.as_ref() {
            Some(current) if !current.is_empty() && !artifact.layout.is_empty() => {
                let notes = current.check_upgrade(&artifact.layout).map_err(
                    |reason| Error::IncompatibleLayout {
                        artifact: artifact.name.clone(),
                        reason,
                    },
                )?;
                warnings.extend(notes.into_iter().map(|note| match note {
                    LayoutNote::Renamed { slot, from, to } => {
                        Warning::VariableRenamed { slot, from, to }
                    }
                }));
            }
            _ => {
                warn!(name, artifact = %artifact.name, "storage layout unknown, skipping compatibility check");
                warnings.push(Warning::UnknownLayout);
            }
        }

        self.authorize(proxy, record.implementation()).await?;

        info!(name, artifact = %artifact.name, "deploying implementation");
        let (implementation, receipt) =
            self.create(artifact.bytecode.clone()).await?;

        info!(name, %proxy, %implementation, "upgrading proxy");
        let tx = upgrade_tx(proxy, implementation);
        chain::send_and_confirm(&*self.chain, tx, self.confirmations)
            .await
            .map_err(|e| self.classify(proxy, e))?;

        let actual = self.implementation_of(proxy).await?;
        if actual != implementation {
            return Err(Error::UnexpectedImplementation {
                proxy,
                expected: implementation,
                actual,
            });
        }

        let entry = self.entry(implementation, &receipt, &artifact).await?;
        let record =
            self.registry
                .record_upgrade(&name, record.implementation(), entry)?;

        Ok(Deployment { record, kind: DeploymentKind::Upgraded, warnings })
    }

    /// Simulate an upgrade to the current implementation, so that callers
    /// without the right to upgrade are turned away before anything is
    /// deployed.
    async fn authorize(&self, proxy: Address, current: Address) -> Result<()> {
        let tx = upgrade_tx(proxy, current).with_from(self.chain.sender());
        self.chain
            .call(tx, None)
            .await
            .map(drop)
            .map_err(|e| self.classify(proxy, e))
    }

    fn classify(&self, proxy: Address, err: Error) -> Error {
        let Some(caller) =
            err.revert_data().and_then(|data| proxy::unauthorized_account(data))
        else {
            return err;
        };
        error!(
            target: "upgrades::security",
            %proxy,
            %caller,
            signer = %self.chain.sender(),
            "unauthorized upgrade attempt"
        );
        Error::UnauthorizedUpgrade { proxy, caller }
    }

    async fn create(&self, code: Bytes) -> Result<(Address, Receipt)> {
        let tx = TransactionRequest::default().with_deploy_code(code);
        let receipt =
            chain::send_and_confirm(&*self.chain, tx, self.confirmations)
                .await?;
        let address = receipt.contract_address.ok_or_else(|| {
            Error::Rpc(format!(
                "receipt of {} has no contract address",
                receipt.transaction_hash
            ))
        })?;
        Ok((address, receipt))
    }

    async fn entry(
        &self,
        address: Address,
        receipt: &Receipt,
        artifact: &Artifact,
    ) -> Result<ImplementationEntry> {
        let deployed_at =
            self.chain.block_timestamp(receipt.block_number).await?;
        Ok(ImplementationEntry {
            address,
            deployed_at,
            block_number: receipt.block_number,
            artifact: Some(artifact.name.clone()),
            layout: (!artifact.layout.is_empty())
                .then(|| artifact.layout.clone()),
        })
    }

    async fn implementation_of(&self, proxy: Address) -> Result<Address> {
        let word = self.chain.storage_at(proxy, IMPLEMENTATION_SLOT).await?;
        Ok(Address::from_word(word))
    }
}

fn upgrade_tx(proxy: Address, implementation: Address) -> TransactionRequest {
    let call = upgradeToAndCallCall {
        newImplementation: implementation,
        data: Bytes::new(),
    };
    TransactionRequest::default().with_to(proxy).with_input(call.abi_encode())
}
