//! Integration testing infrastructure: `alice` and `bob` share one sandboxed
//! chain and one registry, each with their own deployer and client.
use std::{ops::Deref, sync::Arc, time::Duration};

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, U256},
    signers::local::PrivateKeySigner,
};
use eyre::{bail, Context, ContextCompat, Result};
use sandbox::{programs, Sandbox};
use tempfile::TempDir;
use upgrades::{
    Artifact, Config, Deployer, Deployment, InvocationClient, InvocationRequest,
    Outcome, Receipt, Registry, Target,
};

/// Endpoint recorded in the configuration. The sandbox never dials it.
const RPC_URL: &str = "http://localhost:8547";

/// Integration testing infrastructure that allows to act on behalf of `alice`
/// and `bob` accounts.
pub struct Infrastructure {
    /// Deployer of the contracts.
    pub alice: Client,
    /// Another account on the same chain.
    pub bob: Client,
    /// Registry shared by both accounts.
    pub registry: Arc<Registry>,
    /// Keeps the registry directory alive.
    pub dir: TempDir,
}

impl Infrastructure {
    /// Start a fresh chain with an empty registry.
    ///
    /// # Errors
    ///
    /// May fail if the registry directory cannot be created.
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().wrap_err("failed to create registry dir")?;
        let alice = PrivateKeySigner::random();
        let bob = PrivateKeySigner::random();

        let chain = Sandbox::new(alice.address());
        let alice_config = config(alice, &dir)?;
        let mut bob_config = alice_config.clone();
        bob_config.signer = bob.clone();
        let registry = Arc::new(Registry::from_config(&alice_config)?);

        Ok(Self {
            alice: Client::new(chain.clone(), alice_config, registry.clone()),
            bob: Client::new(
                chain.account(bob.address()),
                bob_config,
                registry.clone(),
            ),
            registry,
            dir,
        })
    }

    /// Open the registry again from disk.
    ///
    /// # Errors
    ///
    /// May fail if the registry file is invalid.
    pub fn reopen_registry(&self) -> Result<Registry> {
        Ok(Registry::from_config(&self.alice.config)?)
    }
}

fn config(signer: PrivateKeySigner, dir: &TempDir) -> Result<Config> {
    Ok(Config::new(RPC_URL.parse()?, signer)
        .with_registry_dir(dir.path())
        .with_confirmation_timeout(Duration::from_secs(5))
        .with_poll_interval(Duration::from_millis(5)))
}

/// An account acting on the shared chain.
pub struct Client {
    /// Handle on the chain, sending from this account.
    pub chain: Arc<Sandbox>,
    /// Configuration of this account.
    pub config: Config,
    /// Deployer sending from this account.
    pub deployer: Deployer<Sandbox>,
    /// Invocation client sending from this account.
    pub client: InvocationClient<Sandbox>,
}

// Lets not to mention `client` property every time we call a function.
impl Deref for Client {
    type Target = InvocationClient<Sandbox>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl Client {
    fn new(chain: Sandbox, config: Config, registry: Arc<Registry>) -> Self {
        let chain = Arc::new(chain);
        let deployer = Deployer::new(
            chain.clone(),
            registry.clone(),
            programs::proxy_artifact(),
            (&config).into(),
        );
        let client =
            InvocationClient::new(chain.clone(), registry, (&config).into());
        Self { chain, config, deployer, client }
    }

    /// Address of this account.
    #[must_use]
    pub fn address(&self) -> Address {
        self.config.sender()
    }

    /// Deploy or upgrade `name` to `artifact`, passing `args` to the
    /// initializer.
    ///
    /// # Errors
    ///
    /// See [`Deployer::deploy_or_upgrade`].
    pub async fn deploy(
        &self,
        name: &str,
        artifact: Artifact,
        args: &[u64],
    ) -> upgrades::Result<Deployment> {
        let args = args.iter().map(|&arg| DynSolValue::from(U256::from(arg)));
        let request =
            self.deployer.request(name, artifact).with_initializer_args(args.collect());
        self.deployer.deploy_or_upgrade(request).await
    }

    /// `getValue()` on `target`.
    ///
    /// # Errors
    ///
    /// May fail if the call fails or returns something else than a number.
    pub async fn get_value(&self, target: impl Into<Target>) -> Result<U256> {
        let request = InvocationRequest::new(
            target,
            programs::counter_v1().function("getValue")?.clone(),
            vec![],
        );
        let values =
            self.read(&request).await.wrap_err("error calling getValue")?;
        values
            .first()
            .and_then(DynSolValue::as_uint)
            .map(|(value, _)| value)
            .context("getValue should return a number")
    }

    /// `setValue(value)` on `target`.
    ///
    /// # Errors
    ///
    /// May fail if the transaction fails.
    pub async fn set_value(
        &self,
        target: impl Into<Target>,
        value: u64,
    ) -> Result<Receipt> {
        self.send(target, "setValue", value).await
    }

    /// `increaseValue(amount)` on `target`.
    ///
    /// # Errors
    ///
    /// May fail if the transaction fails.
    pub async fn increase_value(
        &self,
        target: impl Into<Target>,
        amount: u64,
    ) -> Result<Receipt> {
        self.send(target, "increaseValue", amount).await
    }

    async fn send(
        &self,
        target: impl Into<Target>,
        function: &str,
        arg: u64,
    ) -> Result<Receipt> {
        let request = InvocationRequest::new(
            target,
            programs::counter_v2().function(function)?.clone(),
            vec![U256::from(arg).into()],
        );
        match self
            .call(&request)
            .await
            .wrap_err_with(|| format!("error sending {function}"))?
        {
            Outcome::Receipt(receipt) => Ok(receipt),
            Outcome::Value(_) => bail!("{function} should be a transaction"),
        }
    }
}
