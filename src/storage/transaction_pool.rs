use crate::core::SignedTransaction;
use crate::error::{ChainError, Result};
use crate::storage::keyvalue::{KeyValueTree, TreeKey};
use crate::utils::{Digest, DIGEST_LEN};
use log::debug;

/// Where a transaction sits relative to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Tier {
    /// Known but not in any block yet
    Pending = 0,
    /// Included in the current head block, which may still be replaced
    Head = 1,
    /// Buried under at least one more block
    Applied = 2,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Pending, Tier::Head, Tier::Applied];

    fn from_byte(byte: u8) -> Result<Tier> {
        match byte {
            0 => Ok(Tier::Pending),
            1 => Ok(Tier::Head),
            2 => Ok(Tier::Applied),
            other => Err(ChainError::Database(format!("Unknown pool tier {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolKey {
    pub tier: Tier,
    pub digest: Digest,
}

impl TreeKey for PoolKey {
    fn to_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + DIGEST_LEN);
        key.push(self.tier as u8);
        key.extend_from_slice(self.digest.as_bytes());
        key
    }

    fn from_key(bytes: &[u8]) -> Result<PoolKey> {
        match bytes.split_first() {
            Some((tier, digest)) => Ok(PoolKey {
                tier: Tier::from_byte(*tier)?,
                digest: Digest::from_slice(digest)?,
            }),
            None => Err(ChainError::Database("Empty pool key".to_string())),
        }
    }
}

/// Every signed transaction the node has seen, keyed by (tier, digest).
pub struct TransactionPool {
    entries: KeyValueTree<PoolKey, SignedTransaction>,
}

impl TransactionPool {
    pub fn open(db: &sled::Db) -> Result<TransactionPool> {
        Ok(TransactionPool {
            entries: KeyValueTree::open(db, "transaction_pool")?,
        })
    }

    pub fn insert(&self, tier: Tier, digest: &Digest, trx: &SignedTransaction) -> Result<()> {
        self.entries.set(&PoolKey { tier, digest: *digest }, trx)
    }

    pub fn get(&self, tier: Tier, digest: &Digest) -> Result<Option<SignedTransaction>> {
        self.entries.get(&PoolKey { tier, digest: *digest })
    }

    pub fn tier_of(&self, digest: &Digest) -> Result<Option<Tier>> {
        for tier in Tier::ALL {
            if self.entries.contains(&PoolKey { tier, digest: *digest })? {
                return Ok(Some(tier));
            }
        }
        Ok(None)
    }

    /// Looks in every tier.
    pub fn find(&self, digest: &Digest) -> Result<Option<SignedTransaction>> {
        for tier in Tier::ALL {
            if let Some(trx) = self.get(tier, digest)? {
                return Ok(Some(trx));
            }
        }
        Ok(None)
    }

    pub fn contains(&self, digest: &Digest) -> Result<bool> {
        Ok(self.tier_of(digest)?.is_some())
    }

    pub fn list(&self, tier: Tier) -> Result<Vec<(Digest, SignedTransaction)>> {
        self.entries
            .scan_prefix(&[tier as u8])
            .map(|entry| entry.map(|(key, trx)| (key.digest, trx)))
            .collect()
    }

    pub fn len(&self, tier: Tier) -> usize {
        self.entries.scan_prefix(&[tier as u8]).count()
    }

    /// Moves every entry of `from` into `to`.
    pub fn move_all(&self, from: Tier, to: Tier) -> Result<usize> {
        let entries = self.list(from)?;
        for (digest, trx) in &entries {
            self.entries.remove(&PoolKey { tier: from, digest: *digest })?;
            self.insert(to, digest, trx)?;
        }
        debug!("Moved {} transactions from {from:?} to {to:?}", entries.len());
        Ok(entries.len())
    }

    /// Moves the listed digests from `from` to `to`, skipping any that are
    /// not in `from`.
    pub fn move_some(&self, digests: &[Digest], from: Tier, to: Tier) -> Result<usize> {
        let mut moved = 0;
        for digest in digests {
            if let Some(trx) = self.get(from, digest)? {
                self.entries.remove(&PoolKey { tier: from, digest: *digest })?;
                self.insert(to, digest, &trx)?;
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Fetches each digest from `tier`, or returns None if one is missing.
    pub fn get_many(&self, tier: Tier, digests: &[Digest]) -> Result<Option<Vec<SignedTransaction>>> {
        let mut found = Vec::with_capacity(digests.len());
        for digest in digests {
            match self.get(tier, digest)? {
                Some(trx) => found.push(trx),
                None => return Ok(None),
            }
        }
        Ok(Some(found))
    }

    pub fn sync(&self) -> Result<()> {
        self.entries.sync()
    }
}
