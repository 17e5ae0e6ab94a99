// This is the durable bottom of the ledger: one append-only file plus two sled indices
// The file is the source of truth; the indices can always be rebuilt by replaying it
// Only the committed StateView ever writes here

use crate::error::{ChainError, Result};
use crate::storage::keyvalue::{KeyValueTree, TreeKey};
use crate::storage::record::{
    RawRecord, StateRecord, RECORD_HEADER_LEN, RECORD_TRAILER_LEN,
};
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const NAME_INDEX_TREE: &str = "name_index";
const TRANSFER_INDEX_TREE: &str = "transfer_index";
const META_TREE: &str = "state_meta";
const INDEXED_LEN_KEY: &str = "indexed_len";

// A balance is addressed by (account name index, stock name index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountKey {
    pub account: u64,
    pub type_idx: u64,
}

impl AccountKey {
    pub fn new(account: u64, type_idx: u64) -> AccountKey {
        AccountKey { account, type_idx }
    }
}

// Big endian so sled's byte order groups all balances of one account together
impl TreeKey for AccountKey {
    fn to_key(&self) -> Vec<u8> {
        let mut key = self.account.to_be_bytes().to_vec();
        key.extend_from_slice(&self.type_idx.to_be_bytes());
        key
    }

    fn from_key(bytes: &[u8]) -> Result<AccountKey> {
        if bytes.len() != 16 {
            return Err(ChainError::Database(format!(
                "Bad account key length {}",
                bytes.len()
            )));
        }
        Ok(AccountKey {
            account: u64::from_key(&bytes[..8])?,
            type_idx: u64::from_key(&bytes[8..])?,
        })
    }
}

pub struct StateLog {
    path: PathBuf,
    file: File,
    len: u64,
    names: KeyValueTree<String, u64>,
    transfers: KeyValueTree<AccountKey, u64>,
    meta: KeyValueTree<String, u64>,
}

impl StateLog {
    // When I open the log I first cut off any torn record a crash left behind,
    // then check the indices were written for exactly this much log
    pub fn open(db: &sled::Db, path: impl Into<PathBuf>) -> Result<StateLog> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ChainError::Io(format!("Failed to open {}: {e}", path.display())))?;

        let file_len = file.metadata()?.len();
        let len = walk_records(&file, file_len, |_, _| Ok(()))?;
        if len < file_len {
            warn!(
                "Truncating {} torn bytes from {}",
                file_len - len,
                path.display()
            );
            file.set_len(len)?;
            file.sync_all()?;
        }

        let mut log = StateLog {
            path,
            file,
            len,
            names: KeyValueTree::open(db, NAME_INDEX_TREE)?,
            transfers: KeyValueTree::open(db, TRANSFER_INDEX_TREE)?,
            meta: KeyValueTree::open(db, META_TREE)?,
        };

        let indexed = log.meta.get(&INDEXED_LEN_KEY.to_string())?.unwrap_or(0);
        if indexed != len {
            warn!("State indices cover {indexed} bytes but log has {len}, reindexing");
            log.reindex()?;
        }
        info!("Opened state log {} ({} bytes)", log.path.display(), log.len);
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        if pos >= self.len {
            return Ok(0);
        }
        let available = usize::try_from(self.len - pos).unwrap_or(usize::MAX);
        let n = buf.len().min(available);
        let mut file = &self.file;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut buf[..n])?;
        Ok(n)
    }

    // The durable write: bytes first (and fsync), then the index deltas
    pub fn append(
        &mut self,
        bytes: &[u8],
        transfers: &BTreeMap<AccountKey, u64>,
        names: &BTreeMap<String, u64>,
    ) -> Result<()> {
        if bytes.is_empty() && transfers.is_empty() && names.is_empty() {
            return Ok(());
        }
        let mut file = &self.file;
        file.seek(SeekFrom::Start(self.len))?;
        file.write_all(bytes)?;
        file.sync_data()?;
        self.len += bytes.len() as u64;

        for (name, offset) in names {
            self.names.set(name, offset)?;
        }
        for (key, offset) in transfers {
            self.transfers.set(key, offset)?;
        }
        self.meta.set(&INDEXED_LEN_KEY.to_string(), &self.len)?;
        self.sync()
    }

    pub fn sync(&self) -> Result<()> {
        self.names.sync()?;
        self.transfers.sync()?;
        self.meta.sync()
    }

    pub fn last_name_edit(&self, name: &str) -> Result<Option<u64>> {
        self.names.get(&name.to_string())
    }

    pub fn last_transfer(&self, key: &AccountKey) -> Result<Option<u64>> {
        self.transfers.get(key)
    }

    // Every stock index this account has ever held
    pub fn account_types(&self, account: u64) -> Result<Vec<u64>> {
        self.transfers
            .scan_prefix(&account.to_be_bytes())
            .map(|entry| entry.map(|(key, _)| key.type_idx))
            .collect()
    }

    pub fn names_in_range(&self, start: &str, end: &str, limit: usize) -> Result<Vec<String>> {
        let mut found = vec![];
        for entry in self.names.search(&start.to_string()) {
            let (name, _) = entry?;
            if name.as_str() > end || found.len() >= limit {
                break;
            }
            found.push(name);
        }
        Ok(found)
    }

    pub fn name_count(&self) -> u64 {
        self.names.len() as u64
    }

    // Rebuilds both indices from the file, the same way commits would have
    pub fn reindex(&mut self) -> Result<()> {
        self.names.clear()?;
        self.transfers.clear()?;
        let mut defined: HashMap<u64, String> = HashMap::new();
        let names = &self.names;
        let transfers = &self.transfers;

        walk_records(&self.file, self.len, |offset, raw| {
            match StateRecord::from_raw(raw)? {
                StateRecord::DefineName(define) => {
                    names.set(&define.name, &offset)?;
                    defined.insert(offset, define.name);
                }
                StateRecord::UpdateName(update) => {
                    let name = defined.get(&update.name_record_offset).ok_or_else(|| {
                        ChainError::Corruption(format!(
                            "UpdateName at {offset} names unknown record {}",
                            update.name_record_offset
                        ))
                    })?;
                    names.set(name, &offset)?;
                }
                StateRecord::TransferLog(transfer) => {
                    transfers.set(&AccountKey::new(transfer.from_idx, transfer.type_idx), &offset)?;
                    transfers.set(&AccountKey::new(transfer.to_idx, transfer.type_idx), &offset)?;
                }
                StateRecord::StartTransaction(_) | StateRecord::EndBlock(_) => {}
            }
            Ok(())
        })?;

        self.meta.set(&INDEXED_LEN_KEY.to_string(), &self.len)?;
        self.sync()?;
        info!(
            "Reindexed {} names and {} balances",
            self.names.len(),
            self.transfers.len()
        );
        Ok(())
    }
}

// Walks forward over well-formed records and returns where the last one ends.
// A record is well formed when its frame fits and its trailer holds its own offset.
fn walk_records<F>(file: &File, file_len: u64, mut visit: F) -> Result<u64>
where
    F: FnMut(u64, &RawRecord) -> Result<()>,
{
    let mut reader = file;
    let mut offset = 0u64;
    reader.seek(SeekFrom::Start(0))?;

    while offset + (RECORD_HEADER_LEN + RECORD_TRAILER_LEN) as u64 <= file_len {
        let mut header = [0u8; RECORD_HEADER_LEN];
        reader.read_exact(&mut header)?;
        let len = match RawRecord::parse_header(&header) {
            Ok((_, len)) => len,
            Err(e) => {
                warn!("Stopping log scan at {offset}: {e}");
                break;
            }
        };
        let total = (RECORD_HEADER_LEN + len + RECORD_TRAILER_LEN) as u64;
        if offset + total > file_len {
            break;
        }

        let mut bytes = header.to_vec();
        bytes.resize(total as usize, 0);
        reader.read_exact(&mut bytes[RECORD_HEADER_LEN..])?;
        let raw = RawRecord::from_bytes(&bytes)?;
        if raw.previous_offset != offset {
            warn!(
                "Stopping log scan at {offset}: trailer points at {}",
                raw.previous_offset
            );
            break;
        }
        visit(offset, &raw)?;
        offset += total;
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::DefineName;
    use crate::utils::PublicKey;
    use tempfile::tempdir;

    fn define(name: &str, offset: u64) -> Vec<u8> {
        StateRecord::DefineName(DefineName {
            name: name.to_string(),
            key: PublicKey(vec![7]),
        })
        .to_raw(offset)
        .unwrap()
        .to_bytes()
        .unwrap()
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        let mut log = StateLog::open(&db, dir.path().join("state.log")).unwrap();
        assert!(log.is_empty());

        let bytes = define("alice", 0);
        let mut names = BTreeMap::new();
        names.insert("alice".to_string(), 0u64);
        log.append(&bytes, &BTreeMap::new(), &names).unwrap();

        assert_eq!(log.len(), bytes.len() as u64);
        assert_eq!(log.last_name_edit("alice").unwrap(), Some(0));
        let mut buf = vec![0u8; bytes.len() + 10];
        assert_eq!(log.read_at(0, &mut buf).unwrap(), bytes.len());
        assert_eq!(&buf[..bytes.len()], bytes.as_slice());
    }

    #[test]
    fn test_torn_tail_is_truncated_on_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.log");
        let first = define("alice", 0);
        let second = define("bob", first.len() as u64);
        {
            let db = sled::open(dir.path().join("db")).unwrap();
            let mut log = StateLog::open(&db, &path).unwrap();
            log.append(&first, &BTreeMap::new(), &BTreeMap::new()).unwrap();
        }
        {
            // half of a second record, as if the process died mid-write
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&second[..second.len() / 2]).unwrap();
        }

        let db = sled::open(dir.path().join("db")).unwrap();
        let log = StateLog::open(&db, &path).unwrap();
        assert_eq!(log.len(), first.len() as u64);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), first.len() as u64);
    }

    #[test]
    fn test_reindex_rebuilds_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.log");
        let first = define("alice", 0);
        let second = define("bob", first.len() as u64);
        {
            let mut file = File::create(&path).unwrap();
            file.write_all(&first).unwrap();
            file.write_all(&second).unwrap();
        }

        let db = sled::open(dir.path().join("db")).unwrap();
        let log = StateLog::open(&db, &path).unwrap();
        assert_eq!(log.last_name_edit("alice").unwrap(), Some(0));
        assert_eq!(log.last_name_edit("bob").unwrap(), Some(first.len() as u64));
        assert_eq!(log.name_count(), 2);
        assert_eq!(
            log.names_in_range("a", "b", 10).unwrap(),
            vec!["alice".to_string()]
        );
    }

    #[test]
    fn test_account_key_ordering_groups_accounts() {
        let a = AccountKey::new(1, 900).to_key();
        let b = AccountKey::new(2, 0).to_key();
        assert!(a < b);
        assert_eq!(
            AccountKey::from_key(&a).unwrap(),
            AccountKey::new(1, 900)
        );
    }
}
