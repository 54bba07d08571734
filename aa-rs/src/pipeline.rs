use crate::builder::UserOpBuilder;
use crate::bundler::BundlerRpc;
use crate::chain::ChainRpc;
use crate::config::PipelineConfig;
use crate::contracts::AccountContracts;
use crate::encoding::salt_from_u64;
use crate::gas::GasEstimator;
use crate::hash::user_op_hash_v07;
use crate::paymaster::PaymasterCoordinator;
use crate::resolver::AddressResolver;
use crate::registry::{WalletRecord, WalletRegistry};
use crate::signer::HashSigner;
use crate::submission::SubmissionClient;
use crate::types::{SimpleUserOperation, WalletRef};
use anyhow::{anyhow, Result};
use ethers::types::{Address, Bytes, H256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per sender, held from the nonce read until the bundler
/// has accepted (or rejected) the op. An entry lives only while someone holds
/// or waits on it.
#[derive(Default)]
pub struct SenderLocks {
    locks: StdMutex<HashMap<Address, Arc<Mutex<()>>>>,
}

/// Held for the duration of one send; releasing it drops the sender's entry
/// once nobody else is queued on it.
pub struct SenderGuard<'a> {
    locks: &'a SenderLocks,
    sender: Address,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SenderLocks {
    pub async fn acquire(&self, sender: Address) -> SenderGuard<'_> {
        let lock = {
            let mut locks = self.map();
            locks.entry(sender).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        SenderGuard {
            locks: self,
            sender,
            guard: Some(guard),
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<Address, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

impl Drop for SenderGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.map();
        if locks
            .get(&self.sender)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.sender);
        }
    }
}

pub fn now_unix() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| anyhow!("system clock before unix epoch: {e}"))?
        .as_secs())
}

/// Turns a [`SimpleUserOperation`] into a submitted op.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    contracts: Arc<dyn AccountContracts>,
    owner: Arc<dyn HashSigner>,
    resolver: AddressResolver,
    estimator: GasEstimator,
    paymaster: PaymasterCoordinator,
    submission: SubmissionClient,
    locks: SenderLocks,
}

impl Pipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        chain: Arc<dyn ChainRpc>,
        bundler: Arc<dyn BundlerRpc>,
        contracts: Arc<dyn AccountContracts>,
        owner: Arc<dyn HashSigner>,
        paymaster_signer: Arc<dyn HashSigner>,
    ) -> Self {
        let resolver = AddressResolver::new(
            chain.clone(),
            contracts.clone(),
            owner.signer_address(),
            config.account_factory,
            config.initial_funding,
        );
        let estimator = GasEstimator::new(
            bundler.clone(),
            chain,
            config.entry_point,
            config.gas_policy,
        );
        let paymaster = PaymasterCoordinator::new(
            contracts.clone(),
            paymaster_signer,
            config.paymaster_validity,
        );
        let submission = SubmissionClient::new(bundler, config.entry_point);
        Self {
            config,
            contracts,
            owner,
            resolver,
            estimator,
            paymaster,
            submission,
            locks: SenderLocks::default(),
        }
    }

    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    pub fn submission(&self) -> &SubmissionClient {
        &self.submission
    }

    /// Builds, signs and submits one op; returns the bundler's userOpHash.
    ///
    /// Any failure is terminal for this attempt.
    pub async fn send_user_operation(&self, request: SimpleUserOperation) -> Result<H256> {
        let sender = self.resolver.sender_address(&request.wallet).await?;
        let _guard = self.locks.acquire(sender).await;

        let resolution = self.resolver.resolve(&request.wallet).await?;
        let nonce = self.contracts.nonce(resolution.sender).await?;
        tracing::info!(sender = ?resolution.sender, nonce = %nonce, "building userOp");

        let mut builder = UserOpBuilder::new(&resolution, nonce, request.call_data);
        let sponsor = request.paymaster.filter(|p| !p.is_zero());
        if let Some(paymaster) = sponsor {
            builder = builder.with_paymaster(
                paymaster,
                self.config.paymaster_gas,
                request.paymaster_data,
            );
        }

        let estimated = builder.estimate_gas(&self.estimator).await?;
        let authorized = match sponsor {
            Some(_) => {
                let (authorized, window) =
                    estimated.authorize(&self.paymaster, now_unix()?).await?;
                tracing::info!(
                    valid_after = window.valid_after,
                    valid_until = window.valid_until,
                    "paymaster sponsorship attached"
                );
                authorized
            }
            None => estimated.skip_paymaster()?,
        };

        let signed = authorized
            .sign(self.contracts.as_ref(), self.owner.as_ref())
            .await?;

        let local = user_op_hash_v07(
            &signed.pack()?,
            self.config.entry_point,
            self.config.chain_id,
        );
        if local != signed.hash() {
            tracing::warn!(
                local = ?local,
                entry_point = ?signed.hash(),
                "local userOpHash differs from entry point; check the entry point version"
            );
        }

        let hash = self.submission.submit(&signed).await?;
        tracing::info!(user_op_hash = ?hash, sender = ?resolution.sender, "userOp submitted");
        Ok(hash)
    }

    /// Deploys the wallet for the registry's next salt. The record is written
    /// as soon as the bundler accepts the op, before any receipt wait, so the
    /// salt is never handed out twice.
    pub async fn create_wallet(
        &self,
        registry: &mut WalletRegistry,
        paymaster: Option<Address>,
    ) -> Result<WalletRecord> {
        let counter = registry.next_salt();
        let salt = salt_from_u64(counter);
        let address = self.resolver.counterfactual_address(salt).await?;
        tracing::info!(salt = counter, wallet = ?address, "creating wallet");

        let hash = self
            .send_user_operation(SimpleUserOperation {
                wallet: WalletRef::New { salt },
                call_data: Bytes::default(),
                paymaster,
                paymaster_data: Bytes::default(),
            })
            .await?;

        let record = WalletRecord {
            address,
            salt: counter,
            created_at: now_unix()?,
            user_op_hash: Some(hash),
        };
        registry.create(record.clone())?;
        Ok(record)
    }
}
