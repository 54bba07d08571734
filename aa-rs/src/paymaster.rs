use crate::contracts::AccountContracts;
use crate::signer::HashSigner;
use crate::types::UserOperation;
use anyhow::{anyhow, Context, Result};
use ethers::abi::{encode, Token};
use ethers::types::{Bytes, U256};
use std::sync::Arc;
use std::time::Duration;

pub const MAX_UINT48: u64 = (1 << 48) - 1;

/// Time bounds (unix seconds) of a paymaster authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub valid_until: u64,
    pub valid_after: u64,
}

impl ValidityWindow {
    /// `[now, now + validity]`, both bounds checked to fit a `uint48`.
    pub fn starting_at(now: u64, validity: Duration) -> Result<Self> {
        let valid_until = now
            .checked_add(validity.as_secs())
            .filter(|t| *t <= MAX_UINT48)
            .ok_or_else(|| anyhow!("paymaster validUntil does not fit uint48"))?;
        Ok(Self {
            valid_until,
            valid_after: now,
        })
    }
}

/// `abi.encode(uint48 validUntil, uint48 validAfter) || signature`.
pub fn encode_paymaster_data(window: ValidityWindow, signature: &[u8]) -> Bytes {
    let mut data = encode(&[
        Token::Uint(U256::from(window.valid_until)),
        Token::Uint(U256::from(window.valid_after)),
    ]);
    data.extend_from_slice(signature);
    Bytes::from(data)
}

/// Inverse of [`encode_paymaster_data`].
#[cfg(test)]
pub fn decode_paymaster_data(data: &[u8]) -> Option<(ValidityWindow, Bytes)> {
    if data.len() < 64 {
        return None;
    }
    let valid_until = U256::from_big_endian(&data[..32]);
    let valid_after = U256::from_big_endian(&data[32..64]);
    if valid_until > U256::from(MAX_UINT48) || valid_after > U256::from(MAX_UINT48) {
        return None;
    }
    Some((
        ValidityWindow {
            valid_until: valid_until.as_u64(),
            valid_after: valid_after.as_u64(),
        },
        Bytes::from(data[64..].to_vec()),
    ))
}

/// Obtains the verifying paymaster's signed, time-bounded sponsorship.
///
/// Must run after every gas field is final: the paymaster hash commits to them.
pub struct PaymasterCoordinator {
    contracts: Arc<dyn AccountContracts>,
    signer: Arc<dyn HashSigner>,
    validity: Duration,
}

impl PaymasterCoordinator {
    pub fn new(
        contracts: Arc<dyn AccountContracts>,
        signer: Arc<dyn HashSigner>,
        validity: Duration,
    ) -> Self {
        Self {
            contracts,
            signer,
            validity,
        }
    }

    /// Replaces `op.paymaster_data` with a fresh authorization valid from `now`.
    pub async fn authorize(&self, op: &mut UserOperation, now: u64) -> Result<ValidityWindow> {
        let paymaster = op
            .active_paymaster()
            .ok_or_else(|| anyhow!("authorize called without a paymaster"))?;
        let window = ValidityWindow::starting_at(now, self.validity)?;

        let packed = op.pack()?;
        let hash = self
            .contracts
            .paymaster_hash(paymaster, &packed, window)
            .await?;
        let signature = self
            .signer
            .sign_digest(hash)
            .await
            .context("paymaster signer failed")?;

        op.paymaster_data = encode_paymaster_data(window, &signature);
        tracing::debug!(
            paymaster = ?paymaster,
            valid_after = window.valid_after,
            valid_until = window.valid_until,
            paymaster_hash = ?hash,
            "paymaster authorization attached"
        );
        Ok(window)
    }
}
