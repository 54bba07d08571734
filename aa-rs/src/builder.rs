//! Staged construction of a single UserOperation.
//!
//! Each stage consumes the previous one, so an op can only be signed once its
//! gas fields are final and its paymaster authorization (if any) is attached.
//! A failed stage drops the builder; retrying means starting again from a
//! freshly read nonce.

use crate::contracts::AccountContracts;
use crate::gas::{
    GasEstimator, PLACEHOLDER_CALL_GAS_LIMIT, PLACEHOLDER_MAX_FEE_PER_GAS,
    PLACEHOLDER_MAX_PRIORITY_FEE_PER_GAS, PLACEHOLDER_PRE_VERIFICATION_GAS,
    PLACEHOLDER_VERIFICATION_GAS_LIMIT,
};
use crate::packer::PackError;
use crate::paymaster::{PaymasterCoordinator, ValidityWindow};
use crate::resolver::SenderResolution;
use crate::signer::HashSigner;
use crate::types::{PackedUserOperation, UserOperation};
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, Bytes, H256, U256};
use std::marker::PhantomData;

pub struct Built;
pub struct GasEstimated;
pub struct Authorized;

/// Gas limits the paymaster is given; these are not estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymasterGas {
    pub verification_gas_limit: U256,
    pub post_op_gas_limit: U256,
}

impl Default for PaymasterGas {
    fn default() -> Self {
        Self {
            verification_gas_limit: U256::from(1_000_000u64),
            post_op_gas_limit: U256::from(21_000u64),
        }
    }
}

pub struct UserOpBuilder<Stage> {
    op: UserOperation,
    _stage: PhantomData<Stage>,
}

impl<Stage> UserOpBuilder<Stage> {
    #[cfg(test)]
    pub fn user_op(&self) -> &UserOperation {
        &self.op
    }

    fn advance<Next>(self) -> UserOpBuilder<Next> {
        UserOpBuilder {
            op: self.op,
            _stage: PhantomData,
        }
    }
}

impl UserOpBuilder<Built> {
    /// Starts an op for `sender` with placeholder gas and fee values.
    pub fn new(sender: &SenderResolution, nonce: U256, call_data: Bytes) -> Self {
        let (factory, factory_data) = match &sender.init {
            Some((factory, data)) => (Some(*factory), data.clone()),
            None => (None, Bytes::default()),
        };
        let op = UserOperation {
            sender: sender.sender,
            nonce,
            factory,
            factory_data,
            call_data,
            call_gas_limit: U256::from(PLACEHOLDER_CALL_GAS_LIMIT),
            verification_gas_limit: U256::from(PLACEHOLDER_VERIFICATION_GAS_LIMIT),
            pre_verification_gas: U256::from(PLACEHOLDER_PRE_VERIFICATION_GAS),
            max_fee_per_gas: U256::from(PLACEHOLDER_MAX_FEE_PER_GAS),
            max_priority_fee_per_gas: U256::from(PLACEHOLDER_MAX_PRIORITY_FEE_PER_GAS),
            ..Default::default()
        };
        Self {
            op,
            _stage: PhantomData,
        }
    }

    /// Selects a sponsoring paymaster. `placeholder` is carried until authorization replaces it.
    pub fn with_paymaster(
        mut self,
        paymaster: Address,
        gas: PaymasterGas,
        placeholder: Bytes,
    ) -> Self {
        self.op.paymaster = Some(paymaster);
        self.op.paymaster_verification_gas_limit = gas.verification_gas_limit;
        self.op.paymaster_post_op_gas_limit = gas.post_op_gas_limit;
        self.op.paymaster_data = placeholder;
        self
    }

    pub async fn estimate_gas(
        mut self,
        estimator: &GasEstimator,
    ) -> Result<UserOpBuilder<GasEstimated>> {
        estimator.apply(&mut self.op).await?;
        Ok(self.advance())
    }
}

impl UserOpBuilder<GasEstimated> {
    /// Attaches the paymaster's signed validity window.
    pub async fn authorize(
        mut self,
        coordinator: &PaymasterCoordinator,
        now: u64,
    ) -> Result<(UserOpBuilder<Authorized>, ValidityWindow)> {
        let window = coordinator.authorize(&mut self.op, now).await?;
        Ok((self.advance(), window))
    }

    /// Proceeds without sponsorship. Refused when a paymaster was selected.
    pub fn skip_paymaster(self) -> Result<UserOpBuilder<Authorized>> {
        if let Some(paymaster) = self.op.active_paymaster() {
            return Err(anyhow!("paymaster {paymaster:?} selected but not authorized"));
        }
        Ok(self.advance())
    }
}

impl UserOpBuilder<Authorized> {
    /// Fetches the entry point hash of the final op and signs it with the wallet owner key.
    pub async fn sign(
        mut self,
        contracts: &dyn AccountContracts,
        owner: &dyn HashSigner,
    ) -> Result<SignedUserOp> {
        self.op.signature = Bytes::default();
        let packed = self.op.pack()?;
        let hash = contracts.user_op_hash(&packed).await?;
        let signature = owner
            .sign_digest(hash)
            .await
            .context("wallet owner signer failed")?;
        tracing::debug!(user_op_hash = ?hash, sender = ?self.op.sender, "userOp signed");
        self.op.signature = signature;
        Ok(SignedUserOp { op: self.op, hash })
    }
}

/// A signed op together with the entry point hash its signature covers.
#[derive(Debug, Clone)]
pub struct SignedUserOp {
    op: UserOperation,
    hash: H256,
}

impl SignedUserOp {
    pub fn user_op(&self) -> &UserOperation {
        &self.op
    }

    pub fn hash(&self) -> H256 {
        self.hash
    }

    pub fn pack(&self) -> Result<PackedUserOperation, PackError> {
        self.op.pack()
    }

    #[cfg(test)]
    pub fn into_user_op(self) -> UserOperation {
        self.op
    }
}
