//! In-memory fakes for the chain, bundler and contract seams.

use crate::bundler::{BundlerRpc, RpcError};
use crate::chain::ChainRpc;
use crate::contracts::AccountContracts;
use crate::hash::user_op_hash_v07;
use crate::packer::PAYMASTER_DATA_OFFSET;
use crate::paymaster::ValidityWindow;
use crate::types::{GasEstimate, PackedUserOperation, UserOperation, UserOperationReceipt};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, H160, H256, U256};
use ethers::utils::{id, keccak256};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub const TEST_CHAIN_ID: u64 = 31337;
pub const TEST_ENTRY_POINT: Address = H160([0xee; 20]);

// anvil accounts 0 and 1
const OWNER_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const PAYMASTER_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

pub fn owner_wallet() -> LocalWallet {
    crate::signer::load_wallet("OWNER", Some(OWNER_KEY), TEST_CHAIN_ID).unwrap()
}

pub fn paymaster_wallet() -> LocalWallet {
    crate::signer::load_wallet("PAYMASTER", Some(PAYMASTER_KEY), TEST_CHAIN_ID).unwrap()
}

pub struct FakeChain {
    pub code: Mutex<HashSet<Address>>,
    pub balances: Mutex<HashMap<Address, U256>>,
    pub gas_price: U256,
    pub chain_id: u64,
    pub fail_code: bool,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self {
            code: Mutex::default(),
            balances: Mutex::default(),
            gas_price: U256::from(2_000_000_000u64),
            chain_id: TEST_CHAIN_ID,
            fail_code: false,
        }
    }
}

impl FakeChain {
    pub fn with_code(address: Address) -> Self {
        let chain = Self::default();
        chain.deploy(address);
        chain
    }

    pub fn deploy(&self, address: Address) {
        self.code.lock().unwrap().insert(address);
    }
}

#[async_trait]
impl ChainRpc for FakeChain {
    async fn code_at(&self, address: Address) -> Result<Bytes> {
        if self.fail_code {
            return Err(anyhow!("eth_getCode failed: connection refused"));
        }
        if self.code.lock().unwrap().contains(&address) {
            Ok(Bytes::from(vec![0x60, 0x80]))
        } else {
            Ok(Bytes::default())
        }
    }

    async fn gas_price(&self) -> Result<U256> {
        Ok(self.gas_price)
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn balance_of(&self, address: Address) -> Result<U256> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or_default())
    }
}

pub struct FakeBundler {
    pub estimate: GasEstimate,
    pub priority_fee: U256,
    pub fail_estimate: bool,
    /// Returned as a JSON-RPC rejection from `send_user_operation`.
    pub reject_send: Option<String>,
    pub estimated: Mutex<Vec<UserOperation>>,
    pub sent: Mutex<Vec<UserOperation>>,
    pub receipts: Mutex<HashMap<H256, UserOperationReceipt>>,
}

impl Default for FakeBundler {
    fn default() -> Self {
        Self {
            estimate: GasEstimate {
                pre_verification_gas: U256::from(0x30d40u64),
                call_gas_limit: U256::from(0x186a0u64),
                verification_gas_limit: U256::from(0x186a0u64),
            },
            priority_fee: U256::from(1_500_000_000u64),
            fail_estimate: false,
            reject_send: None,
            estimated: Mutex::default(),
            sent: Mutex::default(),
            receipts: Mutex::default(),
        }
    }
}

#[async_trait]
impl BundlerRpc for FakeBundler {
    async fn estimate_user_operation_gas(
        &self,
        user_op: &UserOperation,
        _entrypoint: Address,
    ) -> Result<GasEstimate> {
        self.estimated.lock().unwrap().push(user_op.clone());
        if self.fail_estimate {
            return Err(RpcError {
                method: "eth_estimateUserOperationGas".into(),
                code: -32500,
                message: "AA21 didn't pay prefund".into(),
                data: None,
            }
            .into());
        }
        Ok(self.estimate.clone())
    }

    async fn send_user_operation(
        &self,
        user_op: &UserOperation,
        entrypoint: Address,
    ) -> Result<H256> {
        if let Some(message) = &self.reject_send {
            return Err(RpcError {
                method: "eth_sendUserOperation".into(),
                code: -32507,
                message: message.clone(),
                data: None,
            }
            .into());
        }
        self.sent.lock().unwrap().push(user_op.clone());
        Ok(user_op_hash_v07(&user_op.pack()?, entrypoint, TEST_CHAIN_ID))
    }

    async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>> {
        Ok(self.receipts.lock().unwrap().get(&user_op_hash).cloned())
    }

    async fn max_priority_fee_per_gas(&self) -> Result<U256> {
        Ok(self.priority_fee)
    }
}

/// Contracts that behave like the v0.7 entry point, a CREATE2 factory and a
/// verifying paymaster, computed locally.
#[derive(Default)]
pub struct FakeContracts {
    pub nonces: Mutex<HashMap<Address, U256>>,
    pub token_balances: Mutex<HashMap<(Address, Address), U256>>,
    pub funded: Mutex<Vec<(Address, U256)>>,
}

#[async_trait]
impl AccountContracts for FakeContracts {
    async fn counterfactual_address(&self, owner: Address, salt: [u8; 32]) -> Result<Address> {
        let mut preimage = owner.as_bytes().to_vec();
        preimage.extend_from_slice(&salt);
        Ok(Address::from_slice(&keccak256(preimage)[12..]))
    }

    fn create_account_call_data(&self, owner: Address, salt: [u8; 32]) -> Result<Bytes> {
        let mut data = id("createAccount(address,bytes32,address)").to_vec();
        data.extend(encode(&[
            Token::Address(owner),
            Token::FixedBytes(salt.to_vec()),
            Token::Address(TEST_ENTRY_POINT),
        ]));
        Ok(Bytes::from(data))
    }

    async fn nonce(&self, sender: Address) -> Result<U256> {
        Ok(self
            .nonces
            .lock()
            .unwrap()
            .get(&sender)
            .copied()
            .unwrap_or_default())
    }

    async fn user_op_hash(&self, op: &PackedUserOperation) -> Result<H256> {
        Ok(user_op_hash_v07(op, TEST_ENTRY_POINT, TEST_CHAIN_ID))
    }

    async fn paymaster_hash(
        &self,
        paymaster: Address,
        op: &PackedUserOperation,
        window: ValidityWindow,
    ) -> Result<H256> {
        // The verifying paymaster hashes everything except its own signature payload.
        let mut op = op.clone();
        let cut = op.paymaster_and_data.len().min(PAYMASTER_DATA_OFFSET);
        op.paymaster_and_data = Bytes::from(op.paymaster_and_data[..cut].to_vec());
        let inner = user_op_hash_v07(&op, paymaster, TEST_CHAIN_ID);
        Ok(H256(keccak256(encode(&[
            Token::FixedBytes(inner.as_bytes().to_vec()),
            Token::Uint(U256::from(window.valid_until)),
            Token::Uint(U256::from(window.valid_after)),
        ]))))
    }

    async fn fund_account(&self, account: Address, amount: U256) -> Result<()> {
        self.funded.lock().unwrap().push((account, amount));
        Ok(())
    }

    async fn token_balance(&self, token: Address, holder: Address) -> Result<U256> {
        self.token_balances
            .lock()
            .unwrap()
            .get(&(token, holder))
            .copied()
            .ok_or_else(|| anyhow!("erc20.balanceOf failed: execution reverted"))
    }
}
