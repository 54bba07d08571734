use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;

/// Plain chain reads the pipeline needs.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn code_at(&self, address: Address) -> Result<Bytes>;

    /// Current suggested gas price, used as the base fee.
    async fn gas_price(&self) -> Result<U256>;

    async fn chain_id(&self) -> Result<u64>;

    async fn balance_of(&self, address: Address) -> Result<U256>;
}

#[derive(Debug, Clone)]
pub struct EthersChain<M> {
    client: Arc<M>,
}

impl<M: Middleware + 'static> EthersChain<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainRpc for EthersChain<M> {
    async fn code_at(&self, address: Address) -> Result<Bytes> {
        self.client
            .get_code(address, None)
            .await
            .context("eth_getCode failed")
    }

    async fn gas_price(&self) -> Result<U256> {
        self.client
            .get_gas_price()
            .await
            .context("failed to fetch gas price")
    }

    async fn chain_id(&self) -> Result<u64> {
        let id = self
            .client
            .get_chainid()
            .await
            .context("eth_chainId failed")?;
        if id > U256::from(u64::MAX) {
            return Err(anyhow!("eth_chainId returned {id}, which does not fit in u64"));
        }
        Ok(id.low_u64())
    }

    async fn balance_of(&self, address: Address) -> Result<U256> {
        self.client
            .get_balance(address, None)
            .await
            .context("eth_getBalance failed")
    }
}

/// Fails unless the RPC reports the chain the deployment was written for.
pub async fn ensure_chain_id(chain: &dyn ChainRpc, expected: u64) -> Result<()> {
    let actual = chain.chain_id().await?;
    if actual != expected {
        return Err(anyhow!(
            "chainId mismatch: deployment has {expected}, RPC returned {actual}"
        ));
    }
    Ok(())
}
