use crate::chain::ChainRpc;
use crate::contracts::AccountContracts;
use crate::types::WalletRef;
use anyhow::{anyhow, Result};
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;

/// Where the sender lives and, if it does not exist yet, how to deploy it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderResolution {
    pub sender: Address,
    pub deployed: bool,
    /// `(factory, createAccount calldata)` for an undeployed wallet.
    pub init: Option<(Address, Bytes)>,
}

pub struct AddressResolver {
    chain: Arc<dyn ChainRpc>,
    contracts: Arc<dyn AccountContracts>,
    owner: Address,
    factory: Address,
    initial_funding: U256,
}

impl AddressResolver {
    pub fn new(
        chain: Arc<dyn ChainRpc>,
        contracts: Arc<dyn AccountContracts>,
        owner: Address,
        factory: Address,
        initial_funding: U256,
    ) -> Self {
        Self {
            chain,
            contracts,
            owner,
            factory,
            initial_funding,
        }
    }

    pub async fn counterfactual_address(&self, salt: [u8; 32]) -> Result<Address> {
        self.contracts
            .counterfactual_address(self.owner, salt)
            .await
    }

    pub async fn is_deployed(&self, address: Address) -> Result<bool> {
        let code = self.chain.code_at(address).await?;
        Ok(!code.as_ref().is_empty())
    }

    /// The sender address alone, without touching the chain for an existing wallet.
    pub async fn sender_address(&self, wallet: &WalletRef) -> Result<Address> {
        match wallet {
            WalletRef::New { salt } => self.counterfactual_address(*salt).await,
            WalletRef::Existing(sender) => Ok(*sender),
        }
    }

    /// Resolves the sender without side effects.
    pub async fn inspect(&self, wallet: &WalletRef) -> Result<SenderResolution> {
        match wallet {
            WalletRef::New { salt } => {
                let sender = self.counterfactual_address(*salt).await?;
                let deployed = self.is_deployed(sender).await?;
                let init = if deployed {
                    None
                } else {
                    let data = self.contracts.create_account_call_data(self.owner, *salt)?;
                    Some((self.factory, data))
                };
                Ok(SenderResolution {
                    sender,
                    deployed,
                    init,
                })
            }
            WalletRef::Existing(sender) => {
                let deployed = self.is_deployed(*sender).await?;
                Ok(SenderResolution {
                    sender: *sender,
                    deployed,
                    init: None,
                })
            }
        }
    }

    /// Resolves the sender and, for a wallet that is about to be deployed,
    /// issues the one-time funding call.
    pub async fn resolve(&self, wallet: &WalletRef) -> Result<SenderResolution> {
        let resolution = self.inspect(wallet).await?;
        self.prepare(&resolution).await?;
        Ok(resolution)
    }

    /// Funds an undeployed sender that carries init code. Deployed senders are left alone.
    pub async fn prepare(&self, resolution: &SenderResolution) -> Result<()> {
        if resolution.deployed {
            tracing::info!(sender = ?resolution.sender, "sender already deployed");
            return Ok(());
        }
        if resolution.init.is_none() {
            return Err(anyhow!(
                "wallet {:?} has no code and no creation salt was supplied",
                resolution.sender
            ));
        }
        tracing::info!(
            sender = ?resolution.sender,
            factory = ?self.factory,
            "sender not deployed; attaching init code"
        );
        self.contracts
            .fund_account(resolution.sender, self.initial_funding)
            .await
    }
}
