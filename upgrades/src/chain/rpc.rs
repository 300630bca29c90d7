use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    network::EthereumWallet,
    primitives::{Address, Bytes, TxHash, B256, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{TransactionReceipt, TransactionRequest},
};
use tracing::debug;

use super::{Chain, Receipt};
use crate::{Config, Error, Result};

/// [`Chain`] backed by a JSON-RPC endpoint, signing with the configured
/// private key.
#[derive(Clone, Debug)]
pub struct RpcChain {
    provider: DynProvider,
    sender: Address,
}

impl RpcChain {
    /// Connect to `config.rpc_url`, signing with `config.signer`.
    ///
    /// No request is sent until the chain is first used.
    #[must_use]
    pub fn connect(config: &Config) -> Self {
        let wallet = EthereumWallet::from(config.signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(config.rpc_url.clone())
            .erased();
        debug!(url = %config.rpc_url, sender = %config.sender(), "connected");
        Self { provider, sender: config.sender() }
    }
}

impl Chain for RpcChain {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn chain_id(&self) -> Result<u64> {
        self.provider.get_chain_id().await.map_err(Error::from_rpc)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash> {
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(Error::from_rpc)?;
        Ok(*pending.tx_hash())
    }

    async fn call(
        &self,
        tx: TransactionRequest,
        block: Option<u64>,
    ) -> Result<Bytes> {
        let block = block.map_or(BlockId::latest(), BlockId::number);
        self.provider.call(tx).block(block).await.map_err(Error::from_rpc)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(Error::from_rpc)?;
        Ok(receipt.and_then(into_receipt))
    }

    async fn block_number(&self) -> Result<u64> {
        self.provider.get_block_number().await.map_err(Error::from_rpc)
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .map_err(Error::from_rpc)?
            .ok_or_else(|| Error::Rpc(format!("block {number} not found")))?;
        Ok(block.header.timestamp)
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256> {
        let word = self
            .provider
            .get_storage_at(address, U256::from_be_bytes(slot.0))
            .await
            .map_err(Error::from_rpc)?;
        Ok(B256::from(word.to_be_bytes::<32>()))
    }
}

/// Receipts without a block number are still pending.
fn into_receipt(receipt: TransactionReceipt) -> Option<Receipt> {
    Some(Receipt {
        transaction_hash: receipt.transaction_hash,
        block_number: receipt.block_number?,
        status: receipt.status(),
        contract_address: receipt.contract_address,
        gas_used: receipt.gas_used,
        logs: receipt.inner.logs().iter().map(|log| log.inner.clone()).collect(),
    })
}
