use crate::encoding::{self, parse_h256, parse_u256_quantity};
use crate::types::{GasEstimate, UserOperation, UserOperationReceipt};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use serde_json::Value;

/// The bundler's JSON-RPC surface, one method per call.
#[async_trait]
pub trait BundlerRpc: Send + Sync {
    async fn estimate_user_operation_gas(
        &self,
        user_op: &UserOperation,
        entrypoint: Address,
    ) -> Result<GasEstimate>;

    async fn send_user_operation(&self, user_op: &UserOperation, entrypoint: Address)
        -> Result<H256>;

    /// `None` while the operation has not been included yet.
    async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>>;

    async fn max_priority_fee_per_gas(&self) -> Result<U256>;
}

/// A JSON-RPC `error` object returned by the bundler, kept verbatim.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{method} rejected by bundler (code {code}): {message}")]
pub struct RpcError {
    pub method: String,
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

const MAX_PRIORITY_FEE_METHOD: &str = "rundler_maxPriorityFeePerGas";

#[derive(Debug, Clone)]
pub struct BundlerClient {
    url: String,
    http: reqwest::Client,
}

impl BundlerClient {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;

        let status = resp.status();
        let body: Value = resp.json().await.context("failed to decode JSON")?;

        if let Some(err) = body.get("error") {
            return Err(parse_rpc_error(method, err).into());
        }

        if !status.is_success() {
            return Err(anyhow!("HTTP {}: {}", status, body));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| anyhow!("missing result field"))
    }
}

#[async_trait]
impl BundlerRpc for BundlerClient {
    async fn estimate_user_operation_gas(
        &self,
        user_op: &UserOperation,
        entrypoint: Address,
    ) -> Result<GasEstimate> {
        let params = serde_json::json!([
            encoding::user_op_to_estimate_json(user_op),
            encoding::fmt_address(entrypoint)
        ]);
        let res = self.rpc("eth_estimateUserOperationGas", params).await?;
        parse_gas_estimate(&res)
    }

    async fn send_user_operation(
        &self,
        user_op: &UserOperation,
        entrypoint: Address,
    ) -> Result<H256> {
        let params = serde_json::json!([
            encoding::user_op_to_json(user_op),
            encoding::fmt_address(entrypoint)
        ]);
        let res = self.rpc("eth_sendUserOperation", params).await?;
        parse_userop_hash(&res)
    }

    async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>> {
        let params = serde_json::json!([encoding::fmt_h256(user_op_hash)]);
        let res = self.rpc("eth_getUserOperationReceipt", params).await?;
        parse_receipt(&res)
    }

    async fn max_priority_fee_per_gas(&self) -> Result<U256> {
        let res = self
            .rpc(MAX_PRIORITY_FEE_METHOD, serde_json::json!([]))
            .await?;
        let s = res
            .as_str()
            .ok_or_else(|| anyhow!("{MAX_PRIORITY_FEE_METHOD} returned non-string: {res}"))?;
        parse_u256_quantity(s)
    }
}

fn parse_rpc_error(method: &str, err: &Value) -> RpcError {
    RpcError {
        method: method.to_string(),
        code: err.get("code").and_then(|c| c.as_i64()).unwrap_or_default(),
        message: err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
        data: err.get("data").cloned(),
    }
}

fn parse_u256_field(v: &Value, key: &str) -> Result<U256> {
    let s = v
        .get(key)
        .and_then(|x| x.as_str())
        .ok_or_else(|| anyhow!("missing or invalid field {key}"))?;
    parse_u256_quantity(s)
}

fn parse_gas_estimate(res: &Value) -> Result<GasEstimate> {
    Ok(GasEstimate {
        pre_verification_gas: parse_u256_field(res, "preVerificationGas")?,
        call_gas_limit: parse_u256_field(res, "callGasLimit")?,
        verification_gas_limit: parse_u256_field(res, "verificationGasLimit")?,
    })
}

fn parse_userop_hash(res: &Value) -> Result<H256> {
    // Most bundlers return the userOpHash directly as a JSON string; a few wrap it.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(anyhow!(
            "unexpected eth_sendUserOperation result shape (expected string or {{result: ...}}): {}",
            res
        ));
    };

    parse_h256(hash_str)
}

fn parse_receipt(res: &Value) -> Result<Option<UserOperationReceipt>> {
    if res.is_null() {
        return Ok(None);
    }
    let success = res
        .get("success")
        .and_then(|s| s.as_bool())
        .ok_or_else(|| anyhow!("receipt is missing boolean `success`: {res}"))?;
    let reason = res
        .get("reason")
        .and_then(|r| r.as_str())
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    Ok(Some(UserOperationReceipt { success, reason }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::parse_h256;
    use serde_json::json;

    const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    #[test]
    fn parse_userop_hash_from_string() {
        let res = json!(HASH);
        let hash = parse_userop_hash(&res).unwrap();
        assert_eq!(hash, parse_h256(HASH).unwrap());
    }

    #[test]
    fn parse_userop_hash_from_wrapped_objects() {
        for key in ["result", "userOpHash", "userOperationHash"] {
            let mut obj = serde_json::Map::new();
            obj.insert(key.to_string(), json!(HASH));
            let res = Value::Object(obj);
            assert_eq!(parse_userop_hash(&res).unwrap(), parse_h256(HASH).unwrap());
        }
    }

    #[test]
    fn parse_userop_hash_rejects_unknown_shape() {
        let res = json!({ "foo": "bar" });
        assert!(parse_userop_hash(&res).is_err());
    }

    #[test]
    fn parse_estimate_hex_quantities() {
        let res = json!({
            "preVerificationGas": "0x30d40",
            "callGasLimit": "0x186a0",
            "verificationGasLimit": "0x186a0",
        });
        let est = parse_gas_estimate(&res).unwrap();
        assert_eq!(est.pre_verification_gas, U256::from(200_000u64));
        assert_eq!(est.call_gas_limit, U256::from(100_000u64));
        assert_eq!(est.verification_gas_limit, U256::from(100_000u64));

        assert!(parse_gas_estimate(&json!({ "callGasLimit": "0x1" })).is_err());
    }

    #[test]
    fn pending_receipt_is_none() {
        assert_eq!(parse_receipt(&Value::Null).unwrap(), None);
    }

    #[test]
    fn included_receipt_keeps_reason() {
        let ok = parse_receipt(&json!({ "success": true, "reason": "" })).unwrap();
        assert_eq!(
            ok,
            Some(UserOperationReceipt {
                success: true,
                reason: None
            })
        );

        let failed =
            parse_receipt(&json!({ "success": false, "reason": "AA23 reverted" })).unwrap();
        assert_eq!(failed.unwrap().reason.as_deref(), Some("AA23 reverted"));
    }

    #[test]
    fn rpc_error_message_is_verbatim() {
        let err = parse_rpc_error(
            "eth_sendUserOperation",
            &json!({ "code": -32500, "message": "AA25 invalid account nonce" }),
        );
        assert_eq!(err.code, -32500);
        assert_eq!(err.message, "AA25 invalid account nonce");
        assert!(err.to_string().contains("AA25 invalid account nonce"));
    }
}
