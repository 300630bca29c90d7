//! Errors raised while deploying, upgrading and calling proxied contracts.
use std::{path::PathBuf, time::Duration};

use alloy::{
    primitives::{Address, Bytes, TxHash},
    transports::{RpcError, TransportErrorKind},
};

use crate::proxy;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong in the registry, the deployer or the
/// invocation client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed configuration. Raised before any chain
    /// interaction happens.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// An upgrade was recorded for a name that was never deployed.
    #[error("contract `{0}` has no prior deployment")]
    UnknownContract(String),
    /// The registry has no record under the requested name.
    #[error("contract `{0}` not found in registry")]
    NotFound(String),
    /// A fresh deployment was recorded for a name that already has a proxy.
    #[error("contract `{name}` is already deployed behind proxy {proxy}")]
    DuplicateName {
        /// Logical name of the contract.
        name: String,
        /// Proxy already registered under `name`.
        proxy: Address,
    },
    /// The record changed between reading it and recording an upgrade, or
    /// the upgrade would be recorded out of block order.
    #[error("history of `{name}` changed concurrently: {reason}")]
    HistoryConflict {
        /// Logical name of the contract.
        name: String,
        /// What no longer matches.
        reason: String,
    },
    /// The proxy rejected the caller as upgrade admin.
    #[error("account {caller} is not authorized to upgrade proxy {proxy}")]
    UnauthorizedUpgrade {
        /// Proxy that rejected the upgrade.
        proxy: Address,
        /// Account the upgrade was attempted from.
        caller: Address,
    },
    /// A call or transaction reverted.
    #[error(
        "transaction reverted: {}",
        reason.as_deref().unwrap_or("no revert reason")
    )]
    TransactionReverted {
        /// Hash of the mined transaction, `None` when the revert happened
        /// during simulation.
        tx_hash: Option<TxHash>,
        /// Decoded revert reason, if any.
        reason: Option<String>,
        /// Raw revert data.
        data: Bytes,
    },
    /// Confirmation did not happen before the deadline. The transaction may
    /// still be mined, so its outcome is unknown.
    #[error("transaction {tx_hash} was not confirmed within {timeout:?}")]
    Timeout {
        /// Hash of the submitted transaction.
        tx_hash: TxHash,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The new implementation would corrupt the proxy's storage.
    #[error("storage layout of `{artifact}` is incompatible: {reason}")]
    IncompatibleLayout {
        /// Name of the rejected artifact.
        artifact: String,
        /// First incompatibility found.
        reason: String,
    },
    /// After an upgrade the proxy does not point where it should.
    #[error("proxy {proxy} points at {actual}, expected {expected}")]
    UnexpectedImplementation {
        /// Upgraded proxy.
        proxy: Address,
        /// Implementation that was just deployed.
        expected: Address,
        /// Implementation read back from the ERC-1967 slot.
        actual: Address,
    },
    /// An artifact file is missing, malformed or unusable.
    #[error("artifact error: {0}")]
    Artifact(String),
    /// Call arguments do not match the function signature.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// The registry file exists but its content breaks record invariants.
    #[error("registry file {} is invalid: {reason}", path.display())]
    InvalidRegistry {
        /// Path of the offending file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
    /// ABI encoding or decoding failed.
    #[error(transparent)]
    Abi(#[from] alloy::dyn_abi::Error),
    /// The RPC endpoint returned an error unrelated to execution.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// Registry i/o failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Registry (de)serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Builds a [`Error::TransactionReverted`] from raw revert `data`,
    /// decoding the reason when the error is known.
    #[must_use]
    pub fn reverted(tx_hash: Option<TxHash>, data: Bytes) -> Self {
        let reason = proxy::revert_reason(&data);
        Self::TransactionReverted { tx_hash, reason, data }
    }

    /// Converts a transport error, extracting revert data from
    /// `execution reverted` responses.
    pub(crate) fn from_rpc(err: RpcError<TransportErrorKind>) -> Self {
        if let Some(payload) = err.as_error_resp() {
            if let Some(data) = payload.as_revert_data() {
                return Self::reverted(None, data);
            }
            //  ErrorPayload {
            //      code: 3,
            //      message: "execution reverted",
            //      data: None,
            //  }
            if payload.message.contains("revert") {
                return Self::TransactionReverted {
                    tx_hash: None,
                    reason: Some(payload.message.to_string()),
                    data: Bytes::new(),
                };
            }
        }
        Self::Rpc(err.to_string())
    }

    /// Raw revert data carried by this error, if it is a revert.
    #[must_use]
    pub fn revert_data(&self) -> Option<&Bytes> {
        match self {
            Self::TransactionReverted { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Whether the outcome of the operation is unknown and the caller should
    /// re-query chain state instead of assuming failure.
    #[must_use]
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use alloy::{primitives::address, sol_types::SolError};

    use super::*;
    use crate::proxy::OwnableUnauthorizedAccount;

    #[test]
    fn reverted_decodes_known_errors() {
        let account = address!("00000000000000000000000000000000000000b0");
        let data: Bytes =
            OwnableUnauthorizedAccount { account }.abi_encode().into();

        let err = Error::reverted(None, data.clone());

        let Error::TransactionReverted { reason, data: raw, .. } = &err else {
            panic!("expected a revert, got {err:?}");
        };
        assert_eq!(raw, &data);
        assert_eq!(
            reason.as_deref(),
            Some(format!("OwnableUnauthorizedAccount({account})").as_str())
        );
        assert_eq!(err.revert_data(), Some(&data));
    }

    #[test]
    fn only_timeouts_have_unknown_outcome() {
        let timeout = Error::Timeout {
            tx_hash: TxHash::ZERO,
            timeout: Duration::from_secs(1),
        };
        assert!(timeout.is_outcome_unknown());
        assert!(!Error::NotFound("Counter".into()).is_outcome_unknown());
    }
}
