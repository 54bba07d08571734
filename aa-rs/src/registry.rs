use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, H256};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub address: Address,
    /// Creation salt counter; the on-chain salt is this value left-padded to 32 bytes.
    pub salt: u64,
    pub created_at: u64,
    /// userOp that deployed the wallet.
    #[serde(default)]
    pub user_op_hash: Option<H256>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryFile {
    #[serde(default)]
    wallets: Vec<WalletRecord>,
}

/// Exclusive lock held by commands that allocate a salt.
#[derive(Debug)]
pub struct RegistryLock {
    _file: File,
}

/// Wallets created by this operator, persisted as a JSON file.
#[derive(Debug)]
pub struct WalletRegistry {
    path: PathBuf,
    file: RegistryFile,
}

impl WalletRegistry {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read wallet registry {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse wallet registry {}", path.display()))?
        } else {
            RegistryFile::default()
        };
        Ok(Self { path, file })
    }

    /// Takes the lock next to the registry file. Fails fast if another process holds it.
    pub fn lock(path: impl AsRef<Path>) -> Result<RegistryLock> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create registry directory {}", parent.display())
            })?;
        }
        let lock_path = path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;
        file.try_lock_exclusive().map_err(|e| {
            anyhow!(
                "wallet registry is locked by another process ({}): {e}",
                lock_path.display()
            )
        })?;
        Ok(RegistryLock { _file: file })
    }

    pub fn count(&self) -> u64 {
        self.file.wallets.len() as u64
    }

    /// Salt counter for the next wallet: `count + 1`.
    pub fn next_salt(&self) -> u64 {
        self.count() + 1
    }

    pub fn all(&self) -> &[WalletRecord] {
        &self.file.wallets
    }

    pub fn get(&self, address: Address) -> Option<&WalletRecord> {
        self.file.wallets.iter().find(|w| w.address == address)
    }

    /// Records a wallet and writes the registry to disk.
    pub fn create(&mut self, record: WalletRecord) -> Result<()> {
        if self.get(record.address).is_some() {
            return Err(anyhow!("wallet {:?} is already registered", record.address));
        }
        self.file.wallets.push(record);
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create registry directory {}", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(&self.file)
            .context("failed to serialize wallet registry")?;

        // Write to a temp file, then rename over the registry.
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .with_context(|| format!("failed to write temp registry {}", tmp_path.display()))?;
        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            if cfg!(windows) {
                let _ = fs::remove_file(&self.path);
                fs::rename(&tmp_path, &self.path).with_context(|| {
                    format!("failed to replace wallet registry {}", self.path.display())
                })?;
            } else {
                return Err(anyhow!(
                    "failed to replace wallet registry {}: {err}",
                    self.path.display()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(byte: u8, salt: u64) -> WalletRecord {
        WalletRecord {
            address: Address::repeat_byte(byte),
            salt,
            created_at: 1_700_000_000,
            user_op_hash: Some(H256::repeat_byte(byte)),
        }
    }

    #[test]
    fn missing_file_is_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let reg = WalletRegistry::open(dir.path().join("wallets.json")).unwrap();
        assert_eq!(reg.count(), 0);
        assert_eq!(reg.next_salt(), 1);
        assert!(reg.all().is_empty());
    }

    #[test]
    fn create_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("wallets.json");

        let mut reg = WalletRegistry::open(&path).unwrap();
        reg.create(record(0xab, reg.next_salt())).unwrap();
        reg.create(record(0xcd, reg.next_salt())).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let reg = WalletRegistry::open(&path).unwrap();
        assert_eq!(reg.count(), 2);
        assert_eq!(reg.next_salt(), 3);
        assert_eq!(reg.get(Address::repeat_byte(0xcd)).unwrap().salt, 2);
        assert!(reg.get(Address::repeat_byte(0x01)).is_none());
    }

    #[test]
    fn lookup_ignores_address_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        fs::write(
            &path,
            r#"{"wallets":[{"address":"0xABABABABABABABABABABABABABABABABABABABAB","salt":1,"createdAt":0}]}"#,
        )
        .unwrap();
        let reg = WalletRegistry::open(&path).unwrap();
        let rec = reg.get(Address::repeat_byte(0xab)).unwrap();
        assert_eq!(rec.user_op_hash, None);
    }

    #[test]
    fn duplicate_address_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = WalletRegistry::open(dir.path().join("wallets.json")).unwrap();
        reg.create(record(0xab, 1)).unwrap();
        assert!(reg.create(record(0xab, 2)).is_err());
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn second_lock_fails_until_first_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        let first = WalletRegistry::lock(&path).unwrap();
        assert!(WalletRegistry::lock(&path).is_err());
        drop(first);
        assert!(WalletRegistry::lock(&path).is_ok());
    }
}
