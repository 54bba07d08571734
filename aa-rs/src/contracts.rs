use crate::config::FundingMode;
use crate::paymaster::ValidityWindow;
use crate::types::PackedUserOperation;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::abi::{Abi, AbiParser};
use ethers::contract::Contract;
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use std::sync::Arc;

/// Contract calls used while building an operation.
///
/// Everything here is a view call except [`AccountContracts::fund_account`].
#[async_trait]
pub trait AccountContracts: Send + Sync {
    /// Deterministic wallet address for `(owner, salt)` under the configured entry point.
    async fn counterfactual_address(&self, owner: Address, salt: [u8; 32]) -> Result<Address>;

    /// ABI-encoded `createAccount(owner, salt, entryPoint)`.
    fn create_account_call_data(&self, owner: Address, salt: [u8; 32]) -> Result<Bytes>;

    /// Entry point nonce for `sender`, key 0.
    async fn nonce(&self, sender: Address) -> Result<U256>;

    /// `EntryPoint.getUserOpHash(op)`.
    async fn user_op_hash(&self, op: &PackedUserOperation) -> Result<H256>;

    /// `Paymaster.getHash(op, validUntil, validAfter)`.
    async fn paymaster_hash(
        &self,
        paymaster: Address,
        op: &PackedUserOperation,
        window: ValidityWindow,
    ) -> Result<H256>;

    /// One-time initial funding of a freshly derived wallet.
    async fn fund_account(&self, account: Address, amount: U256) -> Result<()>;

    async fn token_balance(&self, token: Address, holder: Address) -> Result<U256>;
}

const ENTRY_POINT_ABI: &str = r#"[
{"inputs":[{"components":[{"internalType":"address","name":"sender","type":"address"},{"internalType":"uint256","name":"nonce","type":"uint256"},{"internalType":"bytes","name":"initCode","type":"bytes"},{"internalType":"bytes","name":"callData","type":"bytes"},{"internalType":"bytes32","name":"accountGasLimits","type":"bytes32"},{"internalType":"uint256","name":"preVerificationGas","type":"uint256"},{"internalType":"bytes32","name":"gasFees","type":"bytes32"},{"internalType":"bytes","name":"paymasterAndData","type":"bytes"},{"internalType":"bytes","name":"signature","type":"bytes"}],"internalType":"struct PackedUserOperation","name":"userOp","type":"tuple"}],"name":"getUserOpHash","outputs":[{"internalType":"bytes32","name":"","type":"bytes32"}],"stateMutability":"view","type":"function"},
{"inputs":[{"internalType":"address","name":"sender","type":"address"},{"internalType":"uint192","name":"key","type":"uint192"}],"name":"getNonce","outputs":[{"internalType":"uint256","name":"nonce","type":"uint256"}],"stateMutability":"view","type":"function"}
]"#;

const PAYMASTER_ABI: &str = r#"[
{"inputs":[{"components":[{"internalType":"address","name":"sender","type":"address"},{"internalType":"uint256","name":"nonce","type":"uint256"},{"internalType":"bytes","name":"initCode","type":"bytes"},{"internalType":"bytes","name":"callData","type":"bytes"},{"internalType":"bytes32","name":"accountGasLimits","type":"bytes32"},{"internalType":"uint256","name":"preVerificationGas","type":"uint256"},{"internalType":"bytes32","name":"gasFees","type":"bytes32"},{"internalType":"bytes","name":"paymasterAndData","type":"bytes"},{"internalType":"bytes","name":"signature","type":"bytes"}],"internalType":"struct PackedUserOperation","name":"userOp","type":"tuple"},{"internalType":"uint48","name":"validUntil","type":"uint48"},{"internalType":"uint48","name":"validAfter","type":"uint48"}],"name":"getHash","outputs":[{"internalType":"bytes32","name":"","type":"bytes32"}],"stateMutability":"view","type":"function"},
{"inputs":[{"internalType":"address","name":"recipient","type":"address"},{"internalType":"uint256","name":"amount","type":"uint256"}],"name":"mintTokens","outputs":[],"stateMutability":"nonpayable","type":"function"}
]"#;

/// [`AccountContracts`] backed by live contracts through an ethers client.
///
/// `M` must be able to sign if funding is enabled.
pub struct OnchainContracts<M> {
    client: Arc<M>,
    entry_point: Contract<M>,
    factory: Contract<M>,
    paymaster_abi: Abi,
    erc20_abi: Abi,
    funding: FundingMode,
    funding_paymaster: Address,
}

impl<M: Middleware + 'static> OnchainContracts<M> {
    pub fn new(
        client: Arc<M>,
        entry_point: Address,
        factory: Address,
        funding: FundingMode,
        funding_paymaster: Address,
    ) -> Result<Self> {
        let entry_point_abi: Abi =
            serde_json::from_str(ENTRY_POINT_ABI).context("failed to parse EntryPoint ABI")?;
        let paymaster_abi: Abi =
            serde_json::from_str(PAYMASTER_ABI).context("failed to parse Paymaster ABI")?;
        let factory_abi = AbiParser::default().parse(&[
            "function createAccount(address owner, bytes32 salt, address entryPoint) returns (address)",
        ])?;
        let erc20_abi = AbiParser::default()
            .parse(&["function balanceOf(address owner) view returns (uint256)"])?;

        Ok(Self {
            entry_point: Contract::new(entry_point, entry_point_abi, client.clone()),
            factory: Contract::new(factory, factory_abi, client.clone()),
            client,
            paymaster_abi,
            erc20_abi,
            funding,
            funding_paymaster,
        })
    }

    async fn mint_paymaster_tokens(&self, account: Address, amount: U256) -> Result<()> {
        let paymaster = Contract::new(
            self.funding_paymaster,
            self.paymaster_abi.clone(),
            self.client.clone(),
        );
        let call = paymaster.method::<_, ()>("mintTokens", (account, amount))?;
        let pending = call
            .send()
            .await
            .context("failed to send paymaster.mintTokens tx")?;
        let receipt = pending
            .await
            .context("failed waiting for paymaster.mintTokens receipt")?
            .ok_or_else(|| anyhow!("paymaster.mintTokens tx dropped from mempool"))?;
        if receipt.status != Some(1u64.into()) {
            return Err(anyhow!(
                "paymaster.mintTokens reverted (tx {:?})",
                receipt.transaction_hash
            ));
        }
        Ok(())
    }

    async fn send_native(&self, account: Address, amount: U256) -> Result<()> {
        let tx = TransactionRequest::new().to(account).value(amount);
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .context("failed to send ETH funding tx")?;
        let receipt = pending
            .await
            .context("failed waiting for ETH funding receipt")?;
        if receipt.is_none() {
            return Err(anyhow!("ETH funding tx dropped from mempool"));
        }
        Ok(())
    }
}

#[async_trait]
impl<M: Middleware + 'static> AccountContracts for OnchainContracts<M> {
    async fn counterfactual_address(&self, owner: Address, salt: [u8; 32]) -> Result<Address> {
        // createAccount is idempotent per salt; an eth_call returns the address without deploying.
        let account: Address = self
            .factory
            .method("createAccount", (owner, H256(salt), self.entry_point.address()))?
            .call()
            .await
            .context("factory.createAccount (eth_call) failed")?;
        Ok(account)
    }

    fn create_account_call_data(&self, owner: Address, salt: [u8; 32]) -> Result<Bytes> {
        self.factory
            .method::<_, Address>(
                "createAccount",
                (owner, H256(salt), self.entry_point.address()),
            )?
            .calldata()
            .ok_or_else(|| anyhow!("failed to build createAccount calldata"))
    }

    async fn nonce(&self, sender: Address) -> Result<U256> {
        let nonce: U256 = self
            .entry_point
            .method("getNonce", (sender, U256::zero()))?
            .call()
            .await
            .context("entryPoint.getNonce failed")?;
        Ok(nonce)
    }

    async fn user_op_hash(&self, op: &PackedUserOperation) -> Result<H256> {
        let hash: H256 = self
            .entry_point
            .method("getUserOpHash", (op.as_abi_tuple(),))?
            .call()
            .await
            .context("entryPoint.getUserOpHash failed")?;
        Ok(hash)
    }

    async fn paymaster_hash(
        &self,
        paymaster: Address,
        op: &PackedUserOperation,
        window: ValidityWindow,
    ) -> Result<H256> {
        let paymaster_c = Contract::new(paymaster, self.paymaster_abi.clone(), self.client.clone());
        let hash: H256 = paymaster_c
            .method(
                "getHash",
                (
                    op.as_abi_tuple(),
                    U256::from(window.valid_until),
                    U256::from(window.valid_after),
                ),
            )?
            .call()
            .await
            .context("paymaster.getHash failed")?;
        Ok(hash)
    }

    async fn fund_account(&self, account: Address, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        match self.funding {
            FundingMode::PaymasterMint => self.mint_paymaster_tokens(account, amount).await?,
            FundingMode::Native => self.send_native(account, amount).await?,
            FundingMode::None => return Ok(()),
        }
        tracing::info!(account = ?account, amount = %amount, mode = ?self.funding, "funded new wallet");
        Ok(())
    }

    async fn token_balance(&self, token: Address, holder: Address) -> Result<U256> {
        let erc20 = Contract::new(token, self.erc20_abi.clone(), self.client.clone());
        let balance: U256 = erc20
            .method("balanceOf", holder)?
            .call()
            .await
            .context("erc20.balanceOf failed")?;
        Ok(balance)
    }
}
