use crate::error::{ChainError, Result};
use crate::utils::{deserialize, serialize, Digest};
use std::marker::PhantomData;

/// Byte encoding for keys. Encodings must sort the same way the keys do,
/// since range scans walk sled's byte order.
pub trait TreeKey: Sized {
    fn to_key(&self) -> Vec<u8>;
    fn from_key(bytes: &[u8]) -> Result<Self>;
}

impl TreeKey for String {
    fn to_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_key(bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ChainError::Database(format!("Invalid utf-8 key: {e}")))
    }
}

impl TreeKey for u64 {
    fn to_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn from_key(bytes: &[u8]) -> Result<u64> {
        let array: [u8; 8] = bytes
            .try_into()
            .map_err(|_| ChainError::Database(format!("Bad u64 key length {}", bytes.len())))?;
        Ok(u64::from_be_bytes(array))
    }
}

impl TreeKey for Digest {
    fn to_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_key(bytes: &[u8]) -> Result<Digest> {
        Digest::from_slice(bytes)
    }
}

/// A typed view over one sled tree: keys through [`TreeKey`], values through
/// bincode.
pub struct KeyValueTree<K, V> {
    tree: sled::Tree,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> KeyValueTree<K, V>
where
    K: TreeKey,
    V: bincode::Encode + bincode::Decode<()>,
{
    pub fn open(db: &sled::Db, name: &str) -> Result<Self> {
        let tree = db
            .open_tree(name)
            .map_err(|e| ChainError::Database(format!("Failed to open {name} tree: {e}")))?;
        Ok(KeyValueTree {
            tree,
            _marker: PhantomData,
        })
    }

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        match self.tree.get(key.to_key())? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set(&self, key: &K, value: &V) -> Result<()> {
        self.tree.insert(key.to_key(), serialize(value)?)?;
        Ok(())
    }

    /// Returns true if something was removed.
    pub fn remove(&self, key: &K) -> Result<bool> {
        Ok(self.tree.remove(key.to_key())?.is_some())
    }

    pub fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.tree.contains_key(key.to_key())?)
    }

    /// Ordered scan starting at the first key `>= lower`.
    pub fn search(&self, lower: &K) -> impl Iterator<Item = Result<(K, V)>> + '_ {
        self.tree.range(lower.to_key()..).map(decode_entry::<K, V>)
    }

    pub fn scan_prefix(&self, prefix: &[u8]) -> impl Iterator<Item = Result<(K, V)>> + '_ {
        self.tree.scan_prefix(prefix).map(decode_entry::<K, V>)
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<(K, V)>> + '_ {
        self.tree.iter().map(decode_entry::<K, V>)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn clear(&self) -> Result<()> {
        self.tree.clear()?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }
}

fn decode_entry<K, V>(entry: sled::Result<(sled::IVec, sled::IVec)>) -> Result<(K, V)>
where
    K: TreeKey,
    V: bincode::Decode<()>,
{
    let (key, value) = entry?;
    Ok((K::from_key(&key)?, deserialize(&value)?))
}
