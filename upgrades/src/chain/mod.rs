//! Boundary between the orchestrator and the network.
//!
//! Everything the deployer and the invocation client need from a node goes
//! through [`Chain`]. [`RpcChain`] talks JSON-RPC to a real endpoint; tests
//! use the in-memory implementation from the `sandbox` crate.
use std::{future::Future, time::Duration};

use alloy::{
    network::TransactionBuilder,
    primitives::{Address, Bytes, Log, TxHash, B256},
    rpc::types::TransactionRequest,
    sol_types::SolEvent,
};
use tracing::{debug, warn};

use crate::{Config, Error, Result};

mod rpc;

pub use rpc::RpcChain;

/// Minimal view of an Ethereum node, bound to a single sender account.
pub trait Chain: Send + Sync {
    /// Account transactions and calls are sent from.
    fn sender(&self) -> Address;

    /// Chain id reported by the node.
    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Sign and broadcast `tx`, returning its hash as soon as the node
    /// accepted it.
    fn send_transaction(
        &self,
        tx: TransactionRequest,
    ) -> impl Future<Output = Result<TxHash>> + Send;

    /// Execute `tx` without broadcasting it, against the state at `block`
    /// (latest when `None`).
    ///
    /// Reverts are reported as [`Error::TransactionReverted`].
    fn call(
        &self,
        tx: TransactionRequest,
        block: Option<u64>,
    ) -> impl Future<Output = Result<Bytes>> + Send;

    /// Receipt of a mined transaction, `None` while it is pending.
    fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = Result<Option<Receipt>>> + Send;

    /// Number of the latest block.
    fn block_number(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Timestamp of block `number`, in unix seconds.
    fn block_timestamp(
        &self,
        number: u64,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Raw storage word at `slot` of `address`.
    fn storage_at(
        &self,
        address: Address,
        slot: B256,
    ) -> impl Future<Output = Result<B256>> + Send;
}

/// Outcome of a mined transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    /// Hash of the transaction.
    pub transaction_hash: TxHash,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Whether execution succeeded.
    pub status: bool,
    /// Address of the created contract, for deployments.
    pub contract_address: Option<Address>,
    /// Gas consumed by the transaction.
    pub gas_used: u64,
    /// Logs emitted during execution.
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Whether the transaction emitted the `expected` event.
    pub fn emits<E>(&self, expected: E) -> bool
    where
        E: SolEvent + PartialEq,
    {
        self.logs
            .iter()
            .filter_map(|log| E::decode_log(log).ok())
            .any(|log| log.data == expected)
    }

    /// Number of blocks confirming this receipt when the chain head is
    /// `head`. The including block counts as the first confirmation.
    #[must_use]
    pub fn confirmations(&self, head: u64) -> u64 {
        head.saturating_sub(self.block_number).saturating_add(1)
    }
}

/// Handle to a broadcast transaction whose outcome has not been observed
/// yet.
///
/// Abandoning a wait on the handle does not cancel the transaction. The
/// same handle can be awaited again.
#[derive(Clone, Debug)]
pub struct PendingTransaction {
    /// Hash of the transaction.
    pub tx_hash: TxHash,
    /// Chain head when the transaction was submitted.
    pub submitted_at: u64,
    pub(crate) request: TransactionRequest,
}

/// How long and how deep to wait for a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Confirmations {
    /// Blocks, including the one with the transaction, to wait for.
    pub required: u64,
    /// Give up after this long.
    pub timeout: Duration,
    /// Delay between two receipt polls.
    pub poll_interval: Duration,
}

impl Confirmations {
    /// Same settings with a different timeout.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

impl From<&Config> for Confirmations {
    fn from(config: &Config) -> Self {
        Self {
            required: config.confirmations,
            timeout: config.confirmation_timeout,
            poll_interval: config.poll_interval,
        }
    }
}

/// Chain id of `chain`, checked against `expected` when one is configured.
///
/// # Errors
///
/// [`Error::Configuration`] if the node serves another chain than
/// `expected`.
pub async fn check_chain_id<C: Chain>(
    chain: &C,
    expected: Option<u64>,
) -> Result<u64> {
    let actual = chain.chain_id().await?;
    match expected {
        Some(expected) if expected != actual => Err(Error::Configuration(
            format!("node serves chain {actual}, configured for chain {expected}"),
        )),
        _ => Ok(actual),
    }
}

/// Broadcast `request` from the chain's sender.
///
/// # Errors
///
/// May fail if the node rejects the transaction, e.g. because it would
/// revert.
pub async fn submit<C: Chain>(
    chain: &C,
    request: TransactionRequest,
) -> Result<PendingTransaction> {
    let request = request.with_from(chain.sender());
    let submitted_at = chain.block_number().await?;
    let tx_hash = chain.send_transaction(request.clone()).await?;
    debug!(%tx_hash, submitted_at, "transaction submitted");
    Ok(PendingTransaction { tx_hash, submitted_at, request })
}

/// Wait until `pending` is mined and confirmed by `confirmations.required`
/// blocks.
///
/// # Errors
///
/// * [`Error::Timeout`] if the deadline elapses first. The transaction may
///   still be mined.
/// * [`Error::TransactionReverted`] if it was mined but failed. The revert
///   reason is recovered by replaying the transaction on the parent block.
pub async fn await_confirmation<C: Chain>(
    chain: &C,
    pending: &PendingTransaction,
    confirmations: Confirmations,
) -> Result<Receipt> {
    let tx_hash = pending.tx_hash;
    let wait = async {
        loop {
            if let Some(receipt) = chain.transaction_receipt(tx_hash).await? {
                if !receipt.status {
                    return Err(replay(chain, pending, &receipt).await);
                }
                let head = chain.block_number().await?;
                if receipt.confirmations(head) >= confirmations.required {
                    debug!(
                        %tx_hash,
                        block = receipt.block_number,
                        gas_used = receipt.gas_used,
                        "transaction confirmed"
                    );
                    return Ok(receipt);
                }
            }
            tokio::time::sleep(confirmations.poll_interval).await;
        }
    };

    tokio::time::timeout(confirmations.timeout, wait).await.map_err(|_| {
        warn!(%tx_hash, timeout = ?confirmations.timeout, "confirmation timed out");
        Error::Timeout { tx_hash, timeout: confirmations.timeout }
    })?
}

/// Submit `request` and wait for it.
///
/// # Errors
///
/// See [`submit`] and [`await_confirmation`].
pub async fn send_and_confirm<C: Chain>(
    chain: &C,
    request: TransactionRequest,
    confirmations: Confirmations,
) -> Result<Receipt> {
    let pending = submit(chain, request).await?;
    await_confirmation(chain, &pending, confirmations).await
}

async fn replay<C: Chain>(
    chain: &C,
    pending: &PendingTransaction,
    receipt: &Receipt,
) -> Error {
    let tx_hash = pending.tx_hash;
    let parent = receipt.block_number.saturating_sub(1);
    match chain.call(pending.request.clone(), Some(parent)).await {
        Err(Error::TransactionReverted { reason, data, .. }) => {
            Error::TransactionReverted { tx_hash: Some(tx_hash), reason, data }
        }
        Err(e) => {
            warn!(%tx_hash, error = %e, "failed to replay reverted transaction");
            Error::reverted(Some(tx_hash), Bytes::new())
        }
        Ok(_) => Error::reverted(Some(tx_hash), Bytes::new()),
    }
}
