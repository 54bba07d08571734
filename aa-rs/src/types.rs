use ethers::types::{Address, Bytes, H256, U256};

/// ERC-4337 UserOperation in the unpacked (RPC) form used by EntryPoint v0.7.
///
/// The builder owns one of these for a single construction-to-submission cycle.
/// `signature` stays empty (or the estimation dummy) until the operation hash
/// has been fetched; it is only ever written after hashing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    /// Only set while the wallet contract is not yet deployed.
    pub factory: Option<Address>,
    pub factory_data: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster: Option<Address>,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
    pub paymaster_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Paymaster that will sponsor this op. A zero address means "no paymaster".
    pub fn active_paymaster(&self) -> Option<Address> {
        self.paymaster.filter(|p| !p.is_zero())
    }
}

/// Solidity tuple layout of `PackedUserOperation`, for contract calls.
pub type PackedUserOperationTuple = (Address, U256, Bytes, Bytes, H256, U256, H256, Bytes, Bytes);

/// EntryPoint v0.7 `PackedUserOperation`. Derived from [`UserOperation`], never edited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedUserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    /// `verificationGasLimit(16) || callGasLimit(16)`
    pub account_gas_limits: [u8; 32],
    pub pre_verification_gas: U256,
    /// `maxPriorityFeePerGas(16) || maxFeePerGas(16)`
    pub gas_fees: [u8; 32],
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl PackedUserOperation {
    /// Returns a tuple matching the Solidity struct layout, suitable for
    /// `EntryPoint.getUserOpHash((...))` and `Paymaster.getHash((...),...)`.
    pub fn as_abi_tuple(&self) -> PackedUserOperationTuple {
        (
            self.sender,
            self.nonce,
            self.init_code.clone(),
            self.call_data.clone(),
            H256(self.account_gas_limits),
            self.pre_verification_gas,
            H256(self.gas_fees),
            self.paymaster_and_data.clone(),
            self.signature.clone(),
        )
    }
}

/// Which wallet a request acts for. Creation salt and an existing sender are
/// mutually exclusive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletRef {
    /// Counterfactual wallet derived from the operator key and this salt.
    New { salt: [u8; 32] },
    /// A wallet address that is expected to already be deployed.
    Existing(Address),
}

impl WalletRef {
    pub fn from_parts(
        salt: Option<[u8; 32]>,
        sender: Option<Address>,
    ) -> Result<Self, crate::encoding::InputError> {
        match (salt, sender) {
            (Some(salt), None) => Ok(Self::New { salt }),
            (None, Some(sender)) => Ok(Self::Existing(sender)),
            _ => Err(crate::encoding::InputError::WalletSelection),
        }
    }
}

/// The minimal request a caller hands to the pipeline. Consumed once, never persisted.
#[derive(Clone, Debug)]
pub struct SimpleUserOperation {
    pub wallet: WalletRef,
    pub call_data: Bytes,
    pub paymaster: Option<Address>,
    /// Placeholder; replaced by the signed authorization when a paymaster is used.
    pub paymaster_data: Bytes,
}

/// Raw bundler estimate, before markup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasEstimate {
    pub pre_verification_gas: U256,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
}

/// What `eth_getUserOperationReceipt` reports once the op has been included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserOperationReceipt {
    pub success: bool,
    pub reason: Option<String>,
}

/// Caller-facing status. A still-pending op reads as `success = false, reason = None`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct OperationStatus {
    pub success: bool,
    pub reason: Option<String>,
}
