use std::path::PathBuf;

use clap::{Parser, Subcommand};
use upgrades::config::{
    ConfigFile, RegistryLocation, CHAIN_ID_ENV_VAR_NAME,
    CONFIRMATIONS_ENV_VAR_NAME, CONFIRMATION_TIMEOUT_ENV_VAR_NAME,
    NETWORK_ENV_VAR_NAME, POLL_INTERVAL_ENV_VAR_NAME, PRIVATE_KEY_ENV_VAR_NAME,
    PROXY_ARTIFACT_ENV_VAR_NAME, REGISTRY_DIR_ENV_VAR_NAME, RPC_URL_ENV_VAR_NAME,
};
use upgrades::{deployer::DEFAULT_INITIALIZER, Config};

/// Deploy contracts behind ERC-1967 proxies, upgrade them and call them by
/// name.
#[derive(Debug, Parser)]
#[command(name = "upgrades", version)]
pub(crate) struct Opts {
    #[command(flatten)]
    pub(crate) global: GlobalOpts,

    #[command(subcommand)]
    pub(crate) cmd: Command,
}

/// Settings shared by every subcommand. Flags win over the environment, which
/// wins over the configuration file.
#[derive(Debug, clap::Args)]
pub(crate) struct GlobalOpts {
    /// TOML configuration file.
    #[arg(long, short, global = true, value_name = "PATH", env = "UPGRADES_CONFIG")]
    pub(crate) config: Option<PathBuf>,

    /// JSON-RPC endpoint.
    #[arg(long, global = true, value_name = "URL", env = RPC_URL_ENV_VAR_NAME)]
    pub(crate) rpc_url: Option<String>,

    /// Private key of the deploying account.
    #[arg(
        long,
        global = true,
        value_name = "HEX",
        env = PRIVATE_KEY_ENV_VAR_NAME,
        hide_env_values = true
    )]
    pub(crate) private_key: Option<String>,

    /// Network identifier, naming the registry file.
    #[arg(long, global = true, env = NETWORK_ENV_VAR_NAME)]
    pub(crate) network: Option<String>,

    /// Chain id the endpoint must report.
    #[arg(long, global = true, value_name = "ID", env = CHAIN_ID_ENV_VAR_NAME)]
    pub(crate) chain_id: Option<String>,

    /// Blocks to wait for, including the one with the transaction.
    #[arg(long, global = true, value_name = "N", env = CONFIRMATIONS_ENV_VAR_NAME)]
    pub(crate) confirmations: Option<String>,

    /// Confirmation timeout, in seconds.
    #[arg(long, global = true, value_name = "SECS", env = CONFIRMATION_TIMEOUT_ENV_VAR_NAME)]
    pub(crate) timeout: Option<String>,

    /// Receipt polling interval, in milliseconds.
    #[arg(long, global = true, value_name = "MILLIS", env = POLL_INTERVAL_ENV_VAR_NAME)]
    pub(crate) poll_interval: Option<String>,

    /// Directory holding the registry files.
    #[arg(long, global = true, value_name = "PATH", env = REGISTRY_DIR_ENV_VAR_NAME)]
    pub(crate) registry_dir: Option<String>,

    /// ERC-1967 proxy artifact used for fresh deployments.
    #[arg(long, global = true, value_name = "PATH", env = PROXY_ARTIFACT_ENV_VAR_NAME)]
    pub(crate) proxy_artifact: Option<String>,
}

impl GlobalOpts {
    /// Resolve the configuration. Flags, with their environment fallbacks,
    /// take precedence over the configuration file.
    pub(crate) fn load(&self) -> upgrades::Result<Config> {
        Config::resolve(self.file()?, |name| self.lookup(name))
    }

    /// Resolve where the registry lives, without requiring an endpoint or
    /// a key.
    pub(crate) fn registry_location(&self) -> upgrades::Result<RegistryLocation> {
        RegistryLocation::resolve(&self.file()?, &|name: &str| self.lookup(name))
    }

    fn file(&self) -> upgrades::Result<ConfigFile> {
        match &self.config {
            Some(path) => ConfigFile::read(path),
            None => Ok(ConfigFile::default()),
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        let value = match name {
            RPC_URL_ENV_VAR_NAME => &self.rpc_url,
            PRIVATE_KEY_ENV_VAR_NAME => &self.private_key,
            NETWORK_ENV_VAR_NAME => &self.network,
            CHAIN_ID_ENV_VAR_NAME => &self.chain_id,
            CONFIRMATIONS_ENV_VAR_NAME => &self.confirmations,
            CONFIRMATION_TIMEOUT_ENV_VAR_NAME => &self.timeout,
            POLL_INTERVAL_ENV_VAR_NAME => &self.poll_interval,
            REGISTRY_DIR_ENV_VAR_NAME => &self.registry_dir,
            PROXY_ARTIFACT_ENV_VAR_NAME => &self.proxy_artifact,
            _ => return None,
        };
        value.clone()
    }
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Deploy a contract behind a new proxy, or upgrade the proxy already
    /// registered under NAME.
    Deploy {
        /// Logical name of the contract.
        name: String,
        /// Implementation artifact (Hardhat or Foundry JSON).
        artifact: PathBuf,
        /// Initializer arguments. Ignored on upgrades.
        #[arg(allow_negative_numbers = true)]
        args: Vec<String>,
        /// Initializer function.
        #[arg(long, default_value = DEFAULT_INITIALIZER)]
        initializer: String,
    },
    /// Call a view function, e.g. `getValue() returns (uint256)`.
    Call {
        /// Logical name or `0x` address.
        target: String,
        /// Function signature.
        sig: String,
        /// Function arguments.
        #[arg(allow_negative_numbers = true)]
        args: Vec<String>,
    },
    /// Send a transaction, e.g. `setValue(uint256) 56`.
    Send {
        /// Logical name or `0x` address.
        target: String,
        /// Function signature.
        sig: String,
        /// Function arguments.
        #[arg(allow_negative_numbers = true)]
        args: Vec<String>,
        /// Print the transaction hash without waiting for confirmation.
        #[arg(long = "async")]
        no_wait: bool,
    },
    /// Print registered contracts.
    Show {
        /// Only this contract.
        name: Option<String>,
    },
    /// Align the registry with the implementation the proxy points at.
    Reconcile {
        /// Logical name of the contract.
        name: String,
    },
}
