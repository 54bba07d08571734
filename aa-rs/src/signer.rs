use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256};
use std::str::FromStr;

/// Length of an ECDSA `r || s || v` signature.
pub const SIGNATURE_LEN: usize = 65;

/// Signs 32-byte hashes for one key (wallet owner or paymaster signer).
///
/// The hash is signed as an EIP-191 personal message, which is how both the
/// wallet and the verifying paymaster recover it on-chain.
#[async_trait]
pub trait HashSigner: Send + Sync {
    fn signer_address(&self) -> Address;

    async fn sign_digest(&self, hash: H256) -> Result<Bytes>;
}

#[async_trait]
impl HashSigner for LocalWallet {
    fn signer_address(&self) -> Address {
        self.address()
    }

    async fn sign_digest(&self, hash: H256) -> Result<Bytes> {
        let sig = self
            .sign_message(hash.as_bytes())
            .await
            .context("failed to sign hash")?;
        Ok(Bytes::from(sig.to_vec()))
    }
}

pub fn load_wallet(env_name: &str, key: Option<&str>, chain_id: u64) -> Result<LocalWallet> {
    let key = key.ok_or_else(|| anyhow!("missing {env_name} (or the matching --flag)"))?;
    let wallet = LocalWallet::from_str(key.trim())
        .with_context(|| format!("invalid private key in {env_name}"))?;
    Ok(wallet.with_chain_id(chain_id))
}
