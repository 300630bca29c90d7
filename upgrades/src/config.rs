//! Process configuration.
//!
//! A [`Config`] is built once at startup, from an optional TOML file and the
//! environment, and then passed by reference to every component. Nothing in
//! this crate reads the environment on its own afterwards.
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use serde::Deserialize;
use url::Url;

use crate::{Error, Result};

/// Environment variable holding the JSON-RPC endpoint.
pub const RPC_URL_ENV_VAR_NAME: &str = "RPC_URL";
/// Environment variable holding the hex-encoded signer private key.
pub const PRIVATE_KEY_ENV_VAR_NAME: &str = "PRIVATE_KEY";
/// Environment variable holding the network identifier.
pub const NETWORK_ENV_VAR_NAME: &str = "NETWORK";
/// Environment variable holding the minimum number of confirmations.
pub const CONFIRMATIONS_ENV_VAR_NAME: &str = "CONFIRMATIONS";
/// Environment variable holding the confirmation timeout, in seconds.
pub const CONFIRMATION_TIMEOUT_ENV_VAR_NAME: &str = "CONFIRMATION_TIMEOUT";
/// Environment variable holding the receipt polling interval, in
/// milliseconds.
pub const POLL_INTERVAL_ENV_VAR_NAME: &str = "POLL_INTERVAL_MS";
/// Environment variable holding the registry directory.
pub const REGISTRY_DIR_ENV_VAR_NAME: &str = "REGISTRY_DIR";
/// Environment variable holding the path to the ERC-1967 proxy artifact.
pub const PROXY_ARTIFACT_ENV_VAR_NAME: &str = "PROXY_ARTIFACT";
/// Environment variable holding the chain id the endpoint must report.
pub const CHAIN_ID_ENV_VAR_NAME: &str = "CHAIN_ID";

const DEFAULT_NETWORK: &str = "local";
const DEFAULT_CONFIRMATIONS: u64 = 1;
const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_REGISTRY_DIR: &str = ".upgrades";

/// Validated configuration shared by the registry, the deployer and the
/// invocation client.
#[derive(Clone, Debug)]
pub struct Config {
    /// JSON-RPC endpoint of the network.
    pub rpc_url: Url,
    /// Account deploying, upgrading and sending transactions.
    pub signer: PrivateKeySigner,
    /// Network identifier. Names the registry file.
    pub network: String,
    /// Blocks, including the one with the transaction, to wait for.
    pub confirmations: u64,
    /// How long to wait for confirmations before giving up.
    pub confirmation_timeout: Duration,
    /// How often to poll for receipts.
    pub poll_interval: Duration,
    /// Directory holding one registry file per network.
    pub registry_dir: PathBuf,
    /// Compiled ERC-1967 proxy used for fresh deployments.
    pub proxy_artifact: Option<PathBuf>,
    /// Chain id the endpoint is expected to report, checked with
    /// [`crate::chain::check_chain_id`].
    pub chain_id: Option<u64>,
}

impl Config {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new(rpc_url: Url, signer: PrivateKeySigner) -> Self {
        Self {
            rpc_url,
            signer,
            network: DEFAULT_NETWORK.to_string(),
            confirmations: DEFAULT_CONFIRMATIONS,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            registry_dir: PathBuf::from(DEFAULT_REGISTRY_DIR),
            proxy_artifact: None,
            chain_id: None,
        }
    }

    /// Set the network identifier.
    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// Set the minimum number of confirmations.
    #[must_use]
    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// Set the confirmation timeout.
    #[must_use]
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Set the receipt polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the registry directory.
    #[must_use]
    pub fn with_registry_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.registry_dir = dir.into();
        self
    }

    /// Set the ERC-1967 proxy artifact path.
    #[must_use]
    pub fn with_proxy_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.proxy_artifact = Some(path.into());
        self
    }

    /// Expect the endpoint to report `chain_id`.
    #[must_use]
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    /// Address of the configured signer.
    #[must_use]
    pub fn sender(&self) -> Address {
        self.signer.address()
    }

    /// Build the configuration from the process environment only.
    ///
    /// # Errors
    ///
    /// May fail if the RPC URL or the signer are missing or invalid.
    pub fn from_env() -> Result<Self> {
        Self::resolve(ConfigFile::default(), |name| std::env::var(name).ok())
    }

    /// Merge `file` with the variables returned by `env` and validate the
    /// result.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Configuration`] if the RPC URL or signer
    /// credential is missing, or if any value is malformed.
    pub fn resolve(
        file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let RegistryLocation { dir, network } =
            RegistryLocation::resolve(&file, &env)?;

        let rpc_url = env(RPC_URL_ENV_VAR_NAME).or(file.rpc_url).ok_or_else(
            || missing(RPC_URL_ENV_VAR_NAME, "rpc_url"),
        )?;
        let rpc_url: Url = rpc_url.parse().map_err(|e| {
            Error::Configuration(format!("invalid RPC URL `{rpc_url}`: {e}"))
        })?;

        let private_key = env(PRIVATE_KEY_ENV_VAR_NAME)
            .or(file.private_key)
            .ok_or_else(|| missing(PRIVATE_KEY_ENV_VAR_NAME, "private_key"))?;
        // Never echo the key back.
        let signer = private_key.trim().parse::<PrivateKeySigner>().map_err(
            |_| Error::Configuration("invalid signer private key".to_string()),
        )?;

        let mut config = Self::new(rpc_url, signer)
            .with_network(network)
            .with_registry_dir(dir);

        if let Some(confirmations) =
            parse_env(&env, CONFIRMATIONS_ENV_VAR_NAME)?.or(file.confirmations)
        {
            if confirmations == 0 {
                return Err(Error::Configuration(
                    "confirmations must be at least 1".to_string(),
                ));
            }
            config.confirmations = confirmations;
        }

        if let Some(secs) = parse_env(&env, CONFIRMATION_TIMEOUT_ENV_VAR_NAME)?
            .or(file.confirmation_timeout)
        {
            config.confirmation_timeout = Duration::from_secs(secs);
        }

        if let Some(millis) = parse_env(&env, POLL_INTERVAL_ENV_VAR_NAME)?
            .or(file.poll_interval_ms)
        {
            config.poll_interval = Duration::from_millis(millis);
        }

        config.proxy_artifact = env(PROXY_ARTIFACT_ENV_VAR_NAME)
            .map(PathBuf::from)
            .or(file.proxy_artifact);

        config.chain_id =
            parse_env(&env, CHAIN_ID_ENV_VAR_NAME)?.or(file.chain_id);

        Ok(config)
    }
}

/// Where the registry of the configured network lives.
///
/// Resolving it needs neither an endpoint nor a signer, so commands that
/// only read the registry can run without credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryLocation {
    /// Directory holding one registry file per network.
    pub dir: PathBuf,
    /// Network identifier.
    pub network: String,
}

impl RegistryLocation {
    /// Merge `file` with the variables returned by `env`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Configuration`] if the network identifier cannot
    /// name a file.
    pub fn resolve(
        file: &ConfigFile,
        env: &impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let network = env(NETWORK_ENV_VAR_NAME)
            .or_else(|| file.network.clone())
            .unwrap_or_else(|| DEFAULT_NETWORK.to_string());
        if network.is_empty()
            || !network
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Configuration(format!(
                "invalid network identifier `{network}`"
            )));
        }

        let dir = env(REGISTRY_DIR_ENV_VAR_NAME)
            .map(PathBuf::from)
            .or_else(|| file.registry_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_DIR));

        Ok(Self { dir, network })
    }
}

/// On-disk configuration. Every field is optional; the environment fills in
/// or overrides values.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// See [`Config::rpc_url`].
    pub rpc_url: Option<String>,
    /// Hex-encoded private key. Prefer the environment for this one.
    pub private_key: Option<String>,
    /// See [`Config::network`].
    pub network: Option<String>,
    /// See [`Config::confirmations`].
    pub confirmations: Option<u64>,
    /// Confirmation timeout in seconds.
    pub confirmation_timeout: Option<u64>,
    /// Receipt polling interval in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// See [`Config::registry_dir`].
    pub registry_dir: Option<PathBuf>,
    /// See [`Config::proxy_artifact`].
    pub proxy_artifact: Option<PathBuf>,
    /// See [`Config::chain_id`].
    pub chain_id: Option<u64>,
}

impl ConfigFile {
    /// Read and parse a TOML configuration file.
    ///
    /// # Errors
    ///
    /// May fail if the file cannot be read or is not valid TOML.
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| {
            Error::Configuration(format!("failed to parse {}: {e}", path.display()))
        })
    }
}

fn missing(var: &str, key: &str) -> Error {
    Error::Configuration(format!(
        "missing `{var}` environment variable (or `{key}` in the config file)"
    ))
}

fn parse_env(
    env: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<u64>> {
    env(name)
        .map(|value| {
            value.trim().parse::<u64>().map_err(|e| {
                Error::Configuration(format!("invalid `{name}` value `{value}`: {e}"))
            })
        })
        .transpose()
}
