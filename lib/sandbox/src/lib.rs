//! # Sandbox - an in-memory chain for proxy upgrades
//!
//! [`Sandbox`] implements [`upgrades::Chain`] without a node. Contracts are
//! Rust [`Program`]s registered under a creation bytecode: deploying that
//! bytecode, followed by ABI-encoded constructor arguments, instantiates the
//! program at the usual `CREATE` address. Storage, nonces, blocks, receipts
//! and revert data behave as they do on a dev node, so the deployer and the
//! invocation client run unchanged against it.
//!
//! The [`programs`] module ships an ERC-1967 proxy and two versions of a UUPS
//! upgradeable counter sharing one storage layout, along with their
//! [`upgrades::Artifact`]s.
//!
//! ```rust,ignore
//! let sandbox = Sandbox::new(alice);
//! let bob = sandbox.account(bob_address); // Same chain, another sender.
//! sandbox.set_mining(Mining::Manual);
//! // ... submit transactions ...
//! sandbox.mine(1);
//! ```
use std::{fmt, sync::Arc};

use alloy::{
    primitives::{Address, Bytes, TxHash, B256},
    rpc::types::TransactionRequest,
};
use parking_lot::Mutex;
use upgrades::{Chain, Receipt, Result};

mod env;
mod node;
pub mod programs;

pub use env::{Env, Program, Revert};
pub use node::Mining;
use node::Node;

/// Chain id reported by the sandbox.
pub const CHAIN_ID: u64 = 31337;

/// Handle on an in-memory chain, sending from one account.
///
/// Clones and [`Sandbox::account`] handles share the same chain.
#[derive(Clone)]
pub struct Sandbox {
    node: Arc<Mutex<Node>>,
    sender: Address,
}

impl Sandbox {
    /// Start a chain with the built-in [`programs`], sending from `sender`.
    #[must_use]
    pub fn new(sender: Address) -> Self {
        let mut node = Node::new();
        for (code, program) in programs::builtin() {
            node.register(code, program);
        }
        Self { node: Arc::new(Mutex::new(node)), sender }
    }

    /// Handle on the same chain sending from `sender`.
    #[must_use]
    pub fn account(&self, sender: Address) -> Self {
        Self { node: Arc::clone(&self.node), sender }
    }

    /// Change when transactions get mined.
    pub fn set_mining(&self, mining: Mining) {
        self.node.lock().mining = mining;
    }

    /// When enabled (the default), transactions that would revert are
    /// rejected on submission, as a node estimating gas does. When disabled
    /// they are mined with a failed receipt.
    pub fn set_gas_estimation(&self, enabled: bool) {
        self.node.lock().estimate_gas = enabled;
    }

    /// Mine `blocks` blocks, including every pending transaction in the
    /// first one.
    pub fn mine(&self, blocks: u64) {
        self.node.lock().mine(blocks);
    }

    /// Number of transactions waiting to be mined.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.node.lock().pending()
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.node.lock();
        f.debug_struct("Sandbox")
            .field("sender", &self.sender)
            .field("head", &node.head())
            .field("mining", &node.mining)
            .finish_non_exhaustive()
    }
}

impl Chain for Sandbox {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(CHAIN_ID)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash> {
        let sender = tx.from.unwrap_or(self.sender);
        self.node.lock().submit(sender, tx)
    }

    async fn call(
        &self,
        tx: TransactionRequest,
        block: Option<u64>,
    ) -> Result<Bytes> {
        let sender = tx.from.unwrap_or(self.sender);
        self.node.lock().call(sender, &tx, block)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>> {
        Ok(self.node.lock().receipt(hash))
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.node.lock().head())
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64> {
        self.node.lock().timestamp(number)
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256> {
        Ok(self.node.lock().storage(address, slot))
    }
}
