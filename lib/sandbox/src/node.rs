use std::{collections::HashMap, sync::Arc};

use alloy::{
    primitives::{keccak256, Address, Bytes, Log, TxHash, TxKind, B256},
    rpc::types::TransactionRequest,
};
use tracing::debug;
use upgrades::{Error, Receipt, Result};

use crate::env::{self, Program, Revert, State};

/// Block Timestamp - Epoch timestamp: 1st January 2025 `00::00::00`.
pub(crate) const GENESIS_TIMESTAMP: u64 = 1_735_689_600;
/// Seconds between two blocks.
pub(crate) const BLOCK_TIME: u64 = 12;

/// Intrinsic gas of a transaction.
const BASE_GAS: u64 = 21_000;
/// Gas per byte of calldata.
const CALLDATA_GAS: u64 = 16;

/// When transactions get included in a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mining {
    /// Every transaction is mined in its own block as soon as it is sent.
    #[default]
    Instant,
    /// Transactions wait in the pool until [`crate::Sandbox::mine`] is
    /// called.
    Manual,
}

struct Queued {
    hash: TxHash,
    sender: Address,
    nonce: u64,
    tx: TransactionRequest,
}

pub(crate) struct Node {
    pub(crate) mining: Mining,
    pub(crate) estimate_gas: bool,
    programs: Vec<(Bytes, Arc<dyn Program>)>,
    /// State after each block, indexed by block number.
    blocks: Vec<State>,
    latest: State,
    nonces: HashMap<Address, u64>,
    pool: Vec<Queued>,
    receipts: HashMap<TxHash, Receipt>,
}

impl Node {
    pub(crate) fn new() -> Self {
        Self {
            mining: Mining::default(),
            estimate_gas: true,
            programs: Vec::new(),
            blocks: vec![State::default()],
            latest: State::default(),
            nonces: HashMap::new(),
            pool: Vec::new(),
            receipts: HashMap::new(),
        }
    }

    pub(crate) fn register(&mut self, code: Bytes, program: Arc<dyn Program>) {
        self.programs.push((code, program));
    }

    pub(crate) fn head(&self) -> u64 {
        self.blocks.len() as u64 - 1
    }

    pub(crate) fn pending(&self) -> usize {
        self.pool.len()
    }

    pub(crate) fn storage(&self, address: Address, slot: B256) -> B256 {
        self.latest.storage(address, slot)
    }

    pub(crate) fn receipt(&self, hash: TxHash) -> Option<Receipt> {
        self.receipts.get(&hash).cloned()
    }

    pub(crate) fn timestamp(&self, number: u64) -> Result<u64> {
        if number > self.head() {
            return Err(Error::Rpc(format!("block {number} not found")));
        }
        Ok(GENESIS_TIMESTAMP + number * BLOCK_TIME)
    }

    /// Execute `tx` on top of the state at `block` and throw the changes
    /// away.
    pub(crate) fn call(
        &self,
        sender: Address,
        tx: &TransactionRequest,
        block: Option<u64>,
    ) -> Result<Bytes> {
        let state = match block {
            Some(number) => {
                usize::try_from(number).ok().and_then(|n| self.blocks.get(n)).ok_or_else(
                    || Error::Rpc(format!("block {number} not found")),
                )?
            }
            None => &self.latest,
        };
        let nonce = self.nonce(sender);
        let mut state = state.clone();
        self.execute(&mut state, &mut Vec::new(), sender, nonce, tx)
            .map(|(output, _)| output)
            .map_err(|Revert(data)| Error::reverted(None, data))
    }

    /// Add `tx` to the pool, mining it right away in instant mode.
    pub(crate) fn submit(
        &mut self,
        sender: Address,
        tx: TransactionRequest,
    ) -> Result<TxHash> {
        if self.estimate_gas {
            self.call(sender, &tx, None)?;
        }

        let nonce = self.nonce(sender);
        self.nonces.insert(sender, nonce + 1);
        let mut preimage = sender.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        let hash = keccak256(preimage);

        self.pool.push(Queued { hash, sender, nonce, tx });
        if self.mining == Mining::Instant {
            self.mine(1);
        }
        Ok(hash)
    }

    /// Mine `blocks` blocks. The first one includes every pooled
    /// transaction.
    pub(crate) fn mine(&mut self, blocks: u64) {
        for _ in 0..blocks {
            let number = self.head() + 1;
            let pool = std::mem::take(&mut self.pool);
            for Queued { hash, sender, nonce, tx } in pool {
                let receipt = self.apply(number, hash, sender, nonce, &tx);
                debug!(%hash, block = number, status = receipt.status, "mined");
                self.receipts.insert(hash, receipt);
            }
            self.blocks.push(self.latest.clone());
        }
    }

    fn apply(
        &mut self,
        block_number: u64,
        hash: TxHash,
        sender: Address,
        nonce: u64,
        tx: &TransactionRequest,
    ) -> Receipt {
        let mut state = self.latest.clone();
        let mut logs = Vec::new();
        let outcome = self.execute(&mut state, &mut logs, sender, nonce, tx);
        let gas_used = BASE_GAS
            + tx.input.input().map_or(0, |input| input.len() as u64) * CALLDATA_GAS;

        match outcome {
            Ok((_, contract_address)) => {
                self.latest = state;
                Receipt {
                    transaction_hash: hash,
                    block_number,
                    status: true,
                    contract_address,
                    gas_used,
                    logs,
                }
            }
            Err(_) => Receipt {
                transaction_hash: hash,
                block_number,
                status: false,
                contract_address: None,
                gas_used,
                logs: Vec::new(),
            },
        }
    }

    fn execute(
        &self,
        state: &mut State,
        logs: &mut Vec<Log>,
        sender: Address,
        nonce: u64,
        tx: &TransactionRequest,
    ) -> Result<(Bytes, Option<Address>), Revert> {
        let input = tx.input.input().cloned().unwrap_or_default();
        match tx.to {
            Some(TxKind::Call(to)) => {
                env::call(state, logs, sender, to, &input).map(|out| (out, None))
            }
            Some(TxKind::Create) | None => {
                let (code, program) = self
                    .programs
                    .iter()
                    .find(|(code, _)| input.starts_with(code))
                    .ok_or_else(|| Revert::message("unknown creation bytecode"))?;
                let address = sender.create(nonce);
                let args = &input[code.len()..];
                env::create(state, logs, sender, address, program.clone(), args)?;
                Ok((Bytes::new(), Some(address)))
            }
        }
    }

    fn nonce(&self, sender: Address) -> u64 {
        self.nonces.get(&sender).copied().unwrap_or_default()
    }
}
