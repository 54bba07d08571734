use crate::types::UserOperation;
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::{Map, Value};

/// Malformed caller input. Raised before any network call is made.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("invalid hex for {field}: {source}")]
    InvalidHex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },
    #[error("invalid address for {field}: {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("invalid integer for {field}: {value:?}")]
    InvalidInteger { field: &'static str, value: String },
    #[error("salt is {0} bytes; at most 32 allowed")]
    SaltTooLong(usize),
    #[error("exactly one of a creation salt or an existing sender is required")]
    WalletSelection,
}

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

/// v0.7 RPC shape for `eth_sendUserOperation`.
///
/// Factory fields mirror the packed `initCode`; paymaster fields are only present
/// for a non-zero paymaster.
pub fn user_op_to_json(op: &UserOperation) -> Value {
    let mut obj = Map::new();
    obj.insert("sender".into(), fmt_address(op.sender).into());
    obj.insert("nonce".into(), fmt_u256(op.nonce).into());
    if let Some(factory) = op.factory {
        obj.insert("factory".into(), fmt_address(factory).into());
        obj.insert("factoryData".into(), fmt_bytes(&op.factory_data).into());
    }
    obj.insert("callData".into(), fmt_bytes(&op.call_data).into());
    obj.insert("callGasLimit".into(), fmt_u256(op.call_gas_limit).into());
    obj.insert(
        "verificationGasLimit".into(),
        fmt_u256(op.verification_gas_limit).into(),
    );
    obj.insert(
        "preVerificationGas".into(),
        fmt_u256(op.pre_verification_gas).into(),
    );
    obj.insert("maxFeePerGas".into(), fmt_u256(op.max_fee_per_gas).into());
    obj.insert(
        "maxPriorityFeePerGas".into(),
        fmt_u256(op.max_priority_fee_per_gas).into(),
    );
    if let Some(paymaster) = op.active_paymaster() {
        obj.insert("paymaster".into(), fmt_address(paymaster).into());
        obj.insert(
            "paymasterVerificationGasLimit".into(),
            fmt_u256(op.paymaster_verification_gas_limit).into(),
        );
        obj.insert(
            "paymasterPostOpGasLimit".into(),
            fmt_u256(op.paymaster_post_op_gas_limit).into(),
        );
        obj.insert("paymasterData".into(), fmt_bytes(&op.paymaster_data).into());
    }
    obj.insert("signature".into(), fmt_bytes(&op.signature).into());
    Value::Object(obj)
}

/// Request body for `eth_estimateUserOperationGas`.
///
/// Gas, fee and paymaster fields are left for the bundler to fill. The caller
/// puts a dummy signature of real length on `op` so verification is sized realistically.
pub fn user_op_to_estimate_json(op: &UserOperation) -> Value {
    let mut obj = Map::new();
    obj.insert("sender".into(), fmt_address(op.sender).into());
    obj.insert("nonce".into(), fmt_u256(op.nonce).into());
    if let Some(factory) = op.factory {
        obj.insert("factory".into(), fmt_address(factory).into());
        obj.insert("factoryData".into(), fmt_bytes(&op.factory_data).into());
    }
    obj.insert("callData".into(), fmt_bytes(&op.call_data).into());
    obj.insert("signature".into(), fmt_bytes(&op.signature).into());
    Value::Object(obj)
}

pub fn parse_u256_quantity(s: &str) -> anyhow::Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}

pub fn parse_h256(s: &str) -> anyhow::Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hex, got {} bytes", bytes.len());
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(H256(arr))
}

pub fn parse_address(field: &'static str, s: &str) -> Result<Address, InputError> {
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    match hex::decode(hex_str) {
        Ok(bytes) if bytes.len() == 20 => Ok(Address::from_slice(&bytes)),
        _ => Err(InputError::InvalidAddress {
            field,
            value: s.to_string(),
        }),
    }
}

pub fn parse_hex_bytes(field: &'static str, s: &str) -> Result<Bytes, InputError> {
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(hex_str)
        .map(Bytes::from)
        .map_err(|source| InputError::InvalidHex { field, source })
}

pub fn parse_decimal(field: &'static str, s: &str) -> Result<U256, InputError> {
    U256::from_dec_str(s.trim()).map_err(|_| InputError::InvalidInteger {
        field,
        value: s.to_string(),
    })
}

/// Big-endian, left-zero-padded 32-byte salt from a counter.
pub fn salt_from_u64(n: u64) -> [u8; 32] {
    let mut salt = [0u8; 32];
    salt[24..].copy_from_slice(&n.to_be_bytes());
    salt
}

/// Accepts either a decimal counter (`7`) or hex bytes (`0x07`, up to 32 bytes).
pub fn parse_salt(s: &str) -> Result<[u8; 32], InputError> {
    if let Some(hex_str) = s.strip_prefix("0x") {
        let bytes = hex::decode(hex_str).map_err(|source| InputError::InvalidHex {
            field: "salt",
            source,
        })?;
        if bytes.len() > 32 {
            return Err(InputError::SaltTooLong(bytes.len()));
        }
        let mut salt = [0u8; 32];
        salt[32 - bytes.len()..].copy_from_slice(&bytes);
        return Ok(salt);
    }
    let n: u64 = s.trim().parse().map_err(|_| InputError::InvalidInteger {
        field: "salt",
        value: s.to_string(),
    })?;
    Ok(salt_from_u64(n))
}
