use crate::builder::PaymasterGas;
use crate::gas::GasPolicy;
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::time::Duration;
use std::{env, fs, path::Path};

/// How a freshly derived wallet receives its initial balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FundingMode {
    /// `paymaster.mintTokens(wallet, amount)`.
    #[default]
    PaymasterMint,
    /// Plain value transfer from the operator key.
    Native,
    None,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRaw {
    #[serde(default)]
    pub markup_bps: Option<u64>,
    /// Decimal wei.
    #[serde(default)]
    pub initial_funding_wei: Option<String>,
    #[serde(default)]
    pub funding_mode: FundingMode,
    #[serde(default)]
    pub paymaster_validity_seconds: Option<u64>,
    #[serde(default)]
    pub paymaster_verification_gas_limit: Option<u64>,
    #[serde(default)]
    pub paymaster_post_op_gas_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRaw {
    pub chain_id: u64,
    pub rpc: String,
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    pub bundler: String,
    pub entry_point: String,
    pub account_factory: String,
    pub paymaster: String,
    #[serde(default)]
    pub policy: PolicyRaw,
}

/// Immutable settings shared by every pipeline component.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub bundler_url: String,
    pub entry_point: Address,
    pub account_factory: Address,
    pub paymaster: Address,
    pub gas_policy: GasPolicy,
    pub paymaster_gas: PaymasterGas,
    pub paymaster_validity: Duration,
    pub initial_funding: U256,
    pub funding_mode: FundingMode,
}

const DEFAULT_VALIDITY_SECS: u64 = 3600;

pub fn load_deployment(
    path: &Path,
    rpc_override: Option<String>,
    bundler_override: Option<String>,
) -> Result<PipelineConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read deployment json at {}", path.display()))?;
    let raw: DeploymentRaw = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse deployment json at {}", path.display()))?;
    build_config(raw, rpc_override, bundler_override)
}

fn build_config(
    raw: DeploymentRaw,
    rpc_override: Option<String>,
    bundler_override: Option<String>,
) -> Result<PipelineConfig> {
    let rpc_url = if let Some(rpc) = rpc_override {
        rpc
    } else if let Some(env_var) = raw.rpc_env_var.clone() {
        env::var(&env_var).unwrap_or(raw.rpc.clone())
    } else {
        raw.rpc.clone()
    };

    let policy = raw.policy;
    let defaults = PaymasterGas::default();
    let initial_funding = match policy.initial_funding_wei.as_deref() {
        Some(s) => U256::from_dec_str(s.trim())
            .map_err(|e| anyhow!("invalid policy.initialFundingWei {s:?}: {e}"))?,
        None => U256::exp10(18),
    };

    Ok(PipelineConfig {
        chain_id: raw.chain_id,
        rpc_url,
        bundler_url: bundler_override.unwrap_or(raw.bundler),
        entry_point: parse_addr(&raw.entry_point).context("invalid entryPoint address")?,
        account_factory: parse_addr(&raw.account_factory)
            .context("invalid accountFactory address")?,
        paymaster: parse_addr(&raw.paymaster).context("invalid paymaster address")?,
        gas_policy: GasPolicy {
            markup_bps: policy.markup_bps.unwrap_or(GasPolicy::default().markup_bps),
        },
        paymaster_gas: PaymasterGas {
            verification_gas_limit: policy
                .paymaster_verification_gas_limit
                .map(U256::from)
                .unwrap_or(defaults.verification_gas_limit),
            post_op_gas_limit: policy
                .paymaster_post_op_gas_limit
                .map(U256::from)
                .unwrap_or(defaults.post_op_gas_limit),
        },
        paymaster_validity: Duration::from_secs(
            policy
                .paymaster_validity_seconds
                .unwrap_or(DEFAULT_VALIDITY_SECS),
        ),
        initial_funding,
        funding_mode: policy.funding_mode,
    })
}

fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}
