use crate::types::PackedUserOperation;
use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

/// EntryPoint v0.7 `getUserOpHash`, computed off-chain.
///
/// The on-chain value is authoritative; this is only used to cross-check it.
pub fn user_op_hash_v07(op: &PackedUserOperation, entry_point: Address, chain_id: u64) -> H256 {
    let inner = encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(keccak256(&op.init_code).to_vec()),
        Token::FixedBytes(keccak256(&op.call_data).to_vec()),
        Token::FixedBytes(op.account_gas_limits.to_vec()),
        Token::Uint(op.pre_verification_gas),
        Token::FixedBytes(op.gas_fees.to_vec()),
        Token::FixedBytes(keccak256(&op.paymaster_and_data).to_vec()),
    ]);
    let outer = encode(&[
        Token::FixedBytes(keccak256(inner).to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ]);
    H256(keccak256(outer))
}
