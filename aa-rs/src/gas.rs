use crate::bundler::BundlerRpc;
use crate::chain::ChainRpc;
use crate::signer::SIGNATURE_LEN;
use crate::types::{GasEstimate, UserOperation};
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;

/// Fixed-length stand-in signature sent with gas estimation requests.
pub const DUMMY_SIGNATURE: [u8; SIGNATURE_LEN] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xf0,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x7a, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa,
    0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa,
    0x1c,
];

// Initial values, overwritten before the op is hashed.
pub const PLACEHOLDER_CALL_GAS_LIMIT: u64 = 400_000;
pub const PLACEHOLDER_VERIFICATION_GAS_LIMIT: u64 = 400_000;
pub const PLACEHOLDER_PRE_VERIFICATION_GAS: u64 = 200_000;
pub const PLACEHOLDER_MAX_FEE_PER_GAS: u64 = 10_000_000_000;
pub const PLACEHOLDER_MAX_PRIORITY_FEE_PER_GAS: u64 = 5_000_000_000;

const BPS_DENOMINATOR: u64 = 10_000;

/// `floor(gas * markup_bps / 10_000)`; 11_000 bps is the 1.10 markup.
pub fn apply_markup(gas: U256, markup_bps: u64) -> Result<U256> {
    gas.checked_mul(U256::from(markup_bps))
        .map(|v| v / U256::from(BPS_DENOMINATOR))
        .ok_or_else(|| anyhow!("gas markup overflow: {gas} * {markup_bps} bps"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
    pub markup_bps: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self { markup_bps: 11_000 }
    }
}

impl GasPolicy {
    pub fn mark_up(&self, est: &GasEstimate) -> Result<GasEstimate> {
        Ok(GasEstimate {
            pre_verification_gas: apply_markup(est.pre_verification_gas, self.markup_bps)?,
            call_gas_limit: apply_markup(est.call_gas_limit, self.markup_bps)?,
            verification_gas_limit: apply_markup(est.verification_gas_limit, self.markup_bps)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fees {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Gas limits from the bundler plus fresh fee data. Nothing here is cached.
pub struct GasEstimator {
    bundler: Arc<dyn BundlerRpc>,
    chain: Arc<dyn ChainRpc>,
    entrypoint: Address,
    policy: GasPolicy,
}

impl GasEstimator {
    pub fn new(
        bundler: Arc<dyn BundlerRpc>,
        chain: Arc<dyn ChainRpc>,
        entrypoint: Address,
        policy: GasPolicy,
    ) -> Self {
        Self {
            bundler,
            chain,
            entrypoint,
            policy,
        }
    }

    /// Bundler estimate for `op` with [`DUMMY_SIGNATURE`] in place of the real one.
    pub async fn estimate(&self, op: &UserOperation) -> Result<GasEstimate> {
        let mut probe = op.clone();
        probe.signature = Bytes::from(DUMMY_SIGNATURE.to_vec());
        self.bundler
            .estimate_user_operation_gas(&probe, self.entrypoint)
            .await
            .context("bundler gas estimate failed")
    }

    /// `maxPriorityFeePerGas` from the bundler, `maxFeePerGas = gasPrice + priority`.
    pub async fn fees(&self) -> Result<Fees> {
        let max_priority_fee_per_gas = self
            .bundler
            .max_priority_fee_per_gas()
            .await
            .context("bundler maxPriorityFeePerGas failed")?;
        let base_fee = self.chain.gas_price().await?;
        Ok(Fees {
            max_fee_per_gas: base_fee
                .checked_add(max_priority_fee_per_gas)
                .ok_or_else(|| anyhow!("maxFeePerGas overflow"))?,
            max_priority_fee_per_gas,
        })
    }

    /// Writes marked-up gas limits and fresh fees into `op`.
    pub async fn apply(&self, op: &mut UserOperation) -> Result<()> {
        let raw = self.estimate(op).await?;
        let gas = self.policy.mark_up(&raw)?;
        tracing::debug!(
            raw_pre_verification_gas = %raw.pre_verification_gas,
            raw_call_gas_limit = %raw.call_gas_limit,
            raw_verification_gas_limit = %raw.verification_gas_limit,
            markup_bps = self.policy.markup_bps,
            "bundler gas estimate"
        );
        op.pre_verification_gas = gas.pre_verification_gas;
        op.call_gas_limit = gas.call_gas_limit;
        op.verification_gas_limit = gas.verification_gas_limit;

        let fees = self.fees().await?;
        op.max_priority_fee_per_gas = fees.max_priority_fee_per_gas;
        op.max_fee_per_gas = fees.max_fee_per_gas;
        tracing::debug!(
            max_fee_per_gas = %fees.max_fee_per_gas,
            max_priority_fee_per_gas = %fees.max_priority_fee_per_gas,
            "fees"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBundler, FakeChain};

    #[test]
    fn markup_floors_the_product() {
        assert_eq!(
            apply_markup(U256::from(100_000u64), 11_000).unwrap(),
            U256::from(110_000u64)
        );
        assert_eq!(
            apply_markup(U256::from(100_001u64), 11_000).unwrap(),
            U256::from(110_001u64)
        );
        assert_eq!(apply_markup(U256::from(9u64), 11_000).unwrap(), U256::from(9u64));
        assert!(apply_markup(U256::MAX, 11_000).is_err());
    }

    #[test]
    fn dummy_signature_has_real_length() {
        assert_eq!(DUMMY_SIGNATURE.len(), 65);
        assert_eq!(DUMMY_SIGNATURE[64], 0x1c);
    }

    #[tokio::test]
    async fn apply_marks_up_estimate_and_sums_fees() {
        let bundler = Arc::new(FakeBundler::default());
        let chain = Arc::new(FakeChain::default());
        let estimator = GasEstimator::new(
            bundler.clone(),
            chain.clone(),
            Address::repeat_byte(0xee),
            GasPolicy::default(),
        );

        let mut op = UserOperation {
            signature: Bytes::default(),
            ..Default::default()
        };
        estimator.apply(&mut op).await.unwrap();

        assert_eq!(op.pre_verification_gas, U256::from(220_000u64));
        assert_eq!(op.call_gas_limit, U256::from(110_000u64));
        assert_eq!(op.verification_gas_limit, U256::from(110_000u64));
        assert_eq!(op.max_priority_fee_per_gas, U256::from(1_500_000_000u64));
        assert_eq!(op.max_fee_per_gas, U256::from(3_500_000_000u64));

        // The bundler saw the dummy signature; the op itself was not signed.
        let seen = bundler.estimated.lock().unwrap();
        assert_eq!(seen[0].signature.as_ref(), &DUMMY_SIGNATURE[..]);
        assert!(op.signature.is_empty());
    }

    #[tokio::test]
    async fn estimate_failure_aborts() {
        let bundler = Arc::new(FakeBundler {
            fail_estimate: true,
            ..Default::default()
        });
        let estimator = GasEstimator::new(
            bundler,
            Arc::new(FakeChain::default()),
            Address::zero(),
            GasPolicy::default(),
        );
        let mut op = UserOperation::default();
        assert!(estimator.apply(&mut op).await.is_err());
        assert!(op.call_gas_limit.is_zero());
    }
}
