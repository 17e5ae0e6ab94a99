use crate::error::{ChainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallet.dat";

/// Local keyring. Keys are stored under the account name they sign for,
/// which is the key's own address until the user registers something nicer.
pub struct Wallets {
    path: PathBuf,
    wallets: BTreeMap<String, Wallet>,
}

impl Wallets {
    pub fn open(path: impl Into<PathBuf>) -> Result<Wallets> {
        let path = path.into();
        let wallets = if path.exists() {
            let bytes = fs::read(&path)?;
            deserialize(&bytes)?
        } else {
            BTreeMap::new()
        };
        Ok(Wallets { path, wallets })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates a key filed under its address and returns the address.
    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.address();
        self.wallets.insert(address.clone(), wallet);
        self.save()?;
        Ok(address)
    }

    /// Files an existing key under another name as well.
    pub fn alias(&mut self, existing: &str, name: &str) -> Result<()> {
        let wallet = self
            .wallets
            .get(existing)
            .cloned()
            .ok_or_else(|| ChainError::Wallet(format!("No key for {existing}")))?;
        self.wallets.insert(name.to_string(), wallet);
        self.save()
    }

    pub fn names(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, name: &str) -> Option<&Wallet> {
        self.wallets.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Wallet> {
        self.get_wallet(name)
            .ok_or_else(|| ChainError::Wallet(format!("No key for {name} in {}", self.path.display())))
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&serialize(&self.wallets)?)?;
        writer.flush()?;
        Ok(())
    }
}
