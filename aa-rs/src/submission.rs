use crate::builder::SignedUserOp;
use crate::bundler::BundlerRpc;
use crate::types::{OperationStatus, UserOperationReceipt};
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, H256};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where an operation stands from the bundler's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptState {
    Pending,
    Included(UserOperationReceipt),
}

pub struct SubmissionClient {
    bundler: Arc<dyn BundlerRpc>,
    entrypoint: Address,
}

impl SubmissionClient {
    pub fn new(bundler: Arc<dyn BundlerRpc>, entrypoint: Address) -> Self {
        Self {
            bundler,
            entrypoint,
        }
    }

    /// Sends a signed op. Bundler rejections come back unchanged; nothing is retried.
    pub async fn submit(&self, op: &SignedUserOp) -> Result<H256> {
        let hash = self
            .bundler
            .send_user_operation(op.user_op(), self.entrypoint)
            .await?;
        if hash != op.hash() {
            tracing::warn!(
                bundler = ?hash,
                entry_point = ?op.hash(),
                "bundler returned a different userOpHash than the entry point"
            );
        }
        Ok(hash)
    }

    pub async fn receipt_state(&self, user_op_hash: H256) -> Result<ReceiptState> {
        let receipt = self
            .bundler
            .get_user_operation_receipt(user_op_hash)
            .await?;
        Ok(match receipt {
            Some(r) => ReceiptState::Included(r),
            None => ReceiptState::Pending,
        })
    }

    /// Success/failure only: a pending op reads as `success = false, reason = None`.
    pub async fn poll_status(&self, user_op_hash: H256) -> Result<OperationStatus> {
        Ok(match self.receipt_state(user_op_hash).await? {
            ReceiptState::Included(r) => OperationStatus {
                success: r.success,
                reason: r.reason,
            },
            ReceiptState::Pending => OperationStatus {
                success: false,
                reason: None,
            },
        })
    }

    /// Caller-side polling until inclusion or timeout. A zero timeout waits forever.
    pub async fn wait_for_inclusion(
        &self,
        user_op_hash: H256,
        interval: Duration,
        timeout: Duration,
    ) -> Result<UserOperationReceipt> {
        let start = Instant::now();
        loop {
            if !timeout.is_zero() && start.elapsed() > timeout {
                return Err(anyhow!(
                    "timed out waiting for userOp receipt after {:?}",
                    timeout
                ));
            }

            match self.receipt_state(user_op_hash).await {
                Ok(ReceiptState::Included(r)) => return Ok(r),
                Ok(ReceiptState::Pending) => {}
                Err(e) => {
                    // transient errors are common on free-tier bundlers; keep polling
                    tracing::warn!(error = %e, "bundler receipt poll error");
                }
            }

            tokio::time::sleep(interval).await;
        }
    }
}

/// Parses a `0x`-prefixed 32-byte op hash given on the command line.
pub fn parse_user_op_hash(s: &str) -> Result<H256> {
    crate::encoding::parse_h256(s).with_context(|| format!("invalid userOpHash {s:?}"))
}
