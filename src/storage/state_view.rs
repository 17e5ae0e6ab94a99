//! Layered views over the state log.
//!
//! A [`StateView`] buffers new records and index deltas locally and reads
//! through to its base for everything older. Views stack: the node keeps a
//! committed view over the [`StateLog`], a head view over that, and a
//! candidate view over the head. Throwaway children are cheap, and dropping
//! or aborting one never disturbs the layers below it.
//!
//! Record offsets are global. A view's first local byte sits at
//! `start() == base.size()`, so an offset handed out by any layer stays
//! valid after the layer is committed downwards.

use crate::error::{ChainError, Result};
use crate::storage::record::{
    EndBlock, RawRecord, StateRecord, TransferLog, RECORD_HEADER_LEN, RECORD_TRAILER_LEN,
};
use crate::storage::state_log::{AccountKey, StateLog};
use crate::utils::PublicKey;
use log::{debug, trace};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

pub type ViewHandle = Rc<RefCell<StateView>>;

pub enum Base {
    Layered(ViewHandle),
    Persisted(StateLog),
}

pub struct StateView {
    base: Base,
    local: Vec<u8>,
    transfer_edits: BTreeMap<AccountKey, u64>,
    name_edits: BTreeMap<String, u64>,
}

/// Local state captured before a speculative mutation.
pub struct Savepoint {
    pub size: u64,
    local_len: usize,
    transfer_edits: BTreeMap<AccountKey, u64>,
    name_edits: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize)]
struct LoggedRecord<'a> {
    offset: u64,
    #[serde(flatten)]
    record: &'a StateRecord,
}

impl StateView {
    pub fn persisted(log: StateLog) -> StateView {
        StateView::with_base(Base::Persisted(log))
    }

    pub fn layered(parent: ViewHandle) -> StateView {
        StateView::with_base(Base::Layered(parent))
    }

    fn with_base(base: Base) -> StateView {
        StateView {
            base,
            local: vec![],
            transfer_edits: BTreeMap::new(),
            name_edits: BTreeMap::new(),
        }
    }

    pub fn into_handle(self) -> ViewHandle {
        Rc::new(RefCell::new(self))
    }

    /// Offset of the first local byte.
    pub fn start(&self) -> u64 {
        match &self.base {
            Base::Layered(parent) => parent.borrow().size(),
            Base::Persisted(log) => log.len(),
        }
    }

    pub fn size(&self) -> u64 {
        self.start() + self.local.len() as u64
    }

    pub fn has_local_changes(&self) -> bool {
        !self.local.is_empty() || !self.transfer_edits.is_empty() || !self.name_edits.is_empty()
    }

    pub fn read(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let start = self.start();
        let mut filled = 0usize;
        if pos < start {
            let below = usize::try_from(start - pos).unwrap_or(usize::MAX);
            let want = buf.len().min(below);
            filled = match &self.base {
                Base::Layered(parent) => parent.borrow().read(pos, &mut buf[..want])?,
                Base::Persisted(log) => log.read_at(pos, &mut buf[..want])?,
            };
            if filled < want || filled == buf.len() {
                return Ok(filled);
            }
        }

        let local_pos = usize::try_from(pos + filled as u64 - start)
            .map_err(|_| ChainError::Corruption(format!("Offset {pos} out of range")))?;
        if local_pos >= self.local.len() {
            return Ok(filled);
        }
        let n = (buf.len() - filled).min(self.local.len() - local_pos);
        buf[filled..filled + n].copy_from_slice(&self.local[local_pos..local_pos + n]);
        Ok(filled + n)
    }

    pub(crate) fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.read(pos, buf)?;
        if n != buf.len() {
            return Err(ChainError::Corruption(format!(
                "Short read at {pos}: wanted {} bytes, got {n}",
                buf.len()
            )));
        }
        Ok(())
    }

    /// Reads the record starting at `offset`. Any offset that is not the
    /// start of a well-formed record is corruption.
    pub fn get_raw_record(&self, offset: u64) -> Result<RawRecord> {
        let size = self.size();
        let min_len = (RECORD_HEADER_LEN + RECORD_TRAILER_LEN) as u64;
        if offset.checked_add(min_len).map_or(true, |end| end > size) {
            return Err(ChainError::Corruption(format!(
                "Record offset {offset} out of range (log size {size})"
            )));
        }

        let mut header = [0u8; RECORD_HEADER_LEN];
        self.read_exact_at(offset, &mut header)?;
        let (_, len) = RawRecord::parse_header(&header)?;
        let total = RECORD_HEADER_LEN + len + RECORD_TRAILER_LEN;
        if offset + total as u64 > size {
            return Err(ChainError::Corruption(format!(
                "Record at {offset} runs past the end of the log"
            )));
        }

        let mut bytes = vec![0u8; total];
        self.read_exact_at(offset, &mut bytes)?;
        let raw = RawRecord::from_bytes(&bytes)?;
        if raw.previous_offset != offset {
            return Err(ChainError::Corruption(format!(
                "No record starts at offset {offset}"
            )));
        }
        Ok(raw)
    }

    pub fn get_record(&self, offset: u64) -> Result<StateRecord> {
        StateRecord::from_raw(&self.get_raw_record(offset)?)
    }

    /// Appends to the local buffer and returns the record's offset.
    pub fn append_record(&mut self, record: &StateRecord) -> Result<u64> {
        let offset = self.size();
        let bytes = record.to_raw(offset)?.to_bytes()?;
        self.local.extend_from_slice(&bytes);
        trace!("Appended {:?} record at {offset}", record.kind());
        Ok(offset)
    }

    pub(crate) fn record_name_edit(&mut self, name: &str, offset: u64) {
        self.name_edits.insert(name.to_string(), offset);
    }

    pub(crate) fn record_transfer_edit(&mut self, key: AccountKey, offset: u64) {
        self.transfer_edits.insert(key, offset);
    }

    pub fn last_name_edit(&self, name: &str) -> Result<Option<u64>> {
        if let Some(offset) = self.name_edits.get(name) {
            return Ok(Some(*offset));
        }
        match &self.base {
            Base::Layered(parent) => parent.borrow().last_name_edit(name),
            Base::Persisted(log) => log.last_name_edit(name),
        }
    }

    pub fn last_transfer(&self, key: &AccountKey) -> Result<Option<u64>> {
        if let Some(offset) = self.transfer_edits.get(key) {
            return Ok(Some(*offset));
        }
        match &self.base {
            Base::Layered(parent) => parent.borrow().last_transfer(key),
            Base::Persisted(log) => log.last_transfer(key),
        }
    }

    pub fn account_types(&self, account: u64) -> Result<Vec<u64>> {
        let mut types = match &self.base {
            Base::Layered(parent) => parent.borrow().account_types(account)?,
            Base::Persisted(log) => log.account_types(account)?,
        };
        let range = AccountKey::new(account, 0)..=AccountKey::new(account, u64::MAX);
        types.extend(self.transfer_edits.range(range).map(|(key, _)| key.type_idx));
        types.sort_unstable();
        types.dedup();
        Ok(types)
    }

    pub fn get_public_key(&self, name: &str) -> Result<Option<PublicKey>> {
        let offset = match self.last_name_edit(name)? {
            Some(offset) => offset,
            None => return Ok(None),
        };
        match self.get_record(offset)? {
            StateRecord::DefineName(define) => Ok(Some(define.key)),
            StateRecord::UpdateName(update) => Ok(Some(update.key)),
            other => Err(ChainError::Corruption(format!(
                "Name index for {name} points at a {:?} record",
                other.kind()
            ))),
        }
    }

    /// Offset of the `DefineName` record that owns `name`.
    pub fn get_name_index(&self, name: &str) -> Result<Option<u64>> {
        let offset = match self.last_name_edit(name)? {
            Some(offset) => offset,
            None => return Ok(None),
        };
        match self.get_record(offset)? {
            StateRecord::DefineName(_) => Ok(Some(offset)),
            StateRecord::UpdateName(update) => Ok(Some(update.name_record_offset)),
            other => Err(ChainError::Corruption(format!(
                "Name index for {name} points at a {:?} record",
                other.kind()
            ))),
        }
    }

    pub fn get_name_for_index(&self, index: u64) -> Result<String> {
        match self.get_record(index)? {
            StateRecord::DefineName(define) => Ok(define.name),
            StateRecord::UpdateName(update) => self.get_name_for_index(update.name_record_offset),
            other => Err(ChainError::Corruption(format!(
                "Name index {index} points at a {:?} record",
                other.kind()
            ))),
        }
    }

    pub(crate) fn get_transfer(&self, offset: u64) -> Result<TransferLog> {
        match self.get_record(offset)? {
            StateRecord::TransferLog(transfer) => Ok(transfer),
            other => Err(ChainError::Corruption(format!(
                "Expected a transfer at {offset}, found {:?}",
                other.kind()
            ))),
        }
    }

    /// Latest balance for an (account, stock) pair with the offset of the
    /// transfer that set it. `None` means the balance is NULL.
    pub fn get_balance_entry(&self, account: u64, type_idx: u64) -> Result<Option<(u64, u64)>> {
        let offset = match self.last_transfer(&AccountKey::new(account, type_idx))? {
            Some(offset) => offset,
            None => return Ok(None),
        };
        let transfer = self.get_transfer(offset)?;
        if transfer.from_idx == account {
            Ok(Some((transfer.new_from_balance, offset)))
        } else if transfer.to_idx == account {
            Ok(Some((transfer.new_to_balance, offset)))
        } else {
            Err(ChainError::Corruption(format!(
                "Transfer at {offset} does not touch account {account}"
            )))
        }
    }

    pub fn get_balance(&self, account: &str, stock: &str) -> Result<Option<u64>> {
        let (account_idx, type_idx) = match (self.get_name_index(account)?, self.get_name_index(stock)?) {
            (Some(a), Some(t)) => (a, t),
            _ => return Ok(None),
        };
        Ok(self
            .get_balance_entry(account_idx, type_idx)?
            .map(|(balance, _)| balance))
    }

    /// Names of every stock this account has a balance record for.
    pub fn get_account_contents(&self, account: &str) -> Result<Vec<String>> {
        let account_idx = match self.get_name_index(account)? {
            Some(idx) => idx,
            None => return Ok(vec![]),
        };
        let mut names = self
            .account_types(account_idx)?
            .into_iter()
            .map(|type_idx| self.get_name_for_index(type_idx))
            .collect::<Result<Vec<_>>>()?;
        names.sort();
        names.dedup();
        Ok(names)
    }

    pub fn query_names(&self, start: &str, end: &str, limit: usize) -> Result<Vec<String>> {
        let mut names = match &self.base {
            Base::Layered(parent) => parent.borrow().query_names(start, end, limit)?,
            Base::Persisted(log) => log.names_in_range(start, end, limit)?,
        };
        names.extend(
            self.name_edits
                .range(start.to_string()..)
                .take_while(|(name, _)| name.as_str() <= end)
                .map(|(name, _)| name.clone()),
        );
        names.sort();
        names.dedup();
        names.truncate(limit);
        Ok(names)
    }

    pub fn name_count(&self) -> Result<u64> {
        let (base_count, mut added) = match &self.base {
            Base::Layered(parent) => {
                let parent = parent.borrow();
                let mut added = 0;
                for name in self.name_edits.keys() {
                    if parent.last_name_edit(name)?.is_none() {
                        added += 1;
                    }
                }
                (parent.name_count()?, added)
            }
            Base::Persisted(log) => {
                let mut added = 0;
                for name in self.name_edits.keys() {
                    if log.last_name_edit(name)?.is_none() {
                        added += 1;
                    }
                }
                (log.name_count(), added)
            }
        };
        added += base_count;
        Ok(added)
    }

    /// Receives a child's local changes. The child's bytes must start where
    /// this view currently ends.
    pub(crate) fn append_changes(
        &mut self,
        bytes: &[u8],
        transfers: &BTreeMap<AccountKey, u64>,
        names: &BTreeMap<String, u64>,
        child_start: u64,
    ) -> Result<()> {
        let size = self.size();
        if child_start != size {
            return Err(ChainError::Corruption(format!(
                "Child view starts at {child_start} but parent ends at {size}"
            )));
        }
        self.local.extend_from_slice(bytes);
        self.transfer_edits
            .extend(transfers.iter().map(|(key, offset)| (*key, *offset)));
        self.name_edits
            .extend(names.iter().map(|(name, offset)| (name.clone(), *offset)));
        Ok(())
    }

    /// Folds local changes into the base. On a persisted view this is the
    /// durable write.
    pub fn commit(&mut self) -> Result<()> {
        if !self.has_local_changes() {
            return Ok(());
        }
        let start = self.start();
        match &mut self.base {
            Base::Layered(parent) => parent.borrow_mut().append_changes(
                &self.local,
                &self.transfer_edits,
                &self.name_edits,
                start,
            )?,
            Base::Persisted(log) => {
                log.append(&self.local, &self.transfer_edits, &self.name_edits)?
            }
        }
        debug!("Committed {} bytes at {start}", self.local.len());
        self.abort();
        Ok(())
    }

    pub fn abort(&mut self) {
        self.local.clear();
        self.transfer_edits.clear();
        self.name_edits.clear();
    }

    /// Points a layered view at a new parent. Local offsets stay valid only
    /// if the new parent ends exactly where the old one did.
    pub fn rebase(&mut self, parent: ViewHandle) -> Result<()> {
        let new_start = parent.borrow().size();
        let old_start = self.start();
        if new_start != old_start {
            return Err(ChainError::Corruption(format!(
                "Cannot rebase view starting at {old_start} onto parent of size {new_start}"
            )));
        }
        self.base = Base::Layered(parent);
        Ok(())
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            size: self.size(),
            local_len: self.local.len(),
            transfer_edits: self.transfer_edits.clone(),
            name_edits: self.name_edits.clone(),
        }
    }

    pub fn rollback(&mut self, savepoint: Savepoint) {
        self.local.truncate(savepoint.local_len);
        self.transfer_edits = savepoint.transfer_edits;
        self.name_edits = savepoint.name_edits;
    }

    /// Walks back from the end of the log to the most recent `EndBlock`.
    pub fn find_last_block(&self) -> Result<Option<EndBlock>> {
        let mut end = self.size();
        while end >= (RECORD_HEADER_LEN + RECORD_TRAILER_LEN) as u64 {
            let mut trailer = [0u8; RECORD_TRAILER_LEN];
            self.read_exact_at(end - RECORD_TRAILER_LEN as u64, &mut trailer)?;
            let start = u64::from_le_bytes(trailer);
            if start >= end {
                return Err(ChainError::Corruption(format!(
                    "Record ending at {end} claims to start at {start}"
                )));
            }
            if let StateRecord::EndBlock(end_block) = self.get_record(start)? {
                return Ok(Some(end_block));
            }
            end = start;
        }
        Ok(None)
    }

    /// Records from `offset` to the end of the view, in order.
    pub fn records_from(&self, offset: u64) -> Result<Vec<(u64, StateRecord)>> {
        let size = self.size();
        let mut pos = offset;
        let mut records = vec![];
        while pos < size {
            let raw = self.get_raw_record(pos)?;
            let len = raw.encoded_len() as u64;
            records.push((pos, StateRecord::from_raw(&raw)?));
            pos += len;
        }
        Ok(records)
    }

    /// One JSON object per line, for diagnostics.
    pub fn dump_records(&self, offset: u64) -> Result<String> {
        let mut out = String::new();
        for (offset, record) in self.records_from(offset)? {
            out.push_str(&serde_json::to_string(&LoggedRecord {
                offset,
                record: &record,
            })?);
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::DefineName;
    use crate::testnet::open_test_log;

    fn define(name: &str) -> StateRecord {
        StateRecord::DefineName(DefineName {
            name: name.to_string(),
            key: PublicKey(vec![1]),
        })
    }

    #[test]
    fn test_child_reads_through_parent() {
        let (_dir, log) = open_test_log();
        let root = StateView::persisted(log).into_handle();
        let first = root.borrow_mut().append_record(&define("alice")).unwrap();
        assert_eq!(first, 0);

        let mut child = StateView::layered(root.clone());
        assert_eq!(child.start(), root.borrow().size());
        let second = child.append_record(&define("bob")).unwrap();
        assert_eq!(second, root.borrow().size());

        assert!(matches!(child.get_record(first).unwrap(), StateRecord::DefineName(_)));
        assert!(matches!(child.get_record(second).unwrap(), StateRecord::DefineName(_)));
        assert!(root.borrow().get_record(second).is_err());
    }

    #[test]
    fn test_out_of_range_record_is_corruption() {
        let (_dir, log) = open_test_log();
        let mut view = StateView::persisted(log);
        view.append_record(&define("alice")).unwrap();
        assert!(matches!(view.get_record(9_999), Err(ChainError::Corruption(_))));
        assert!(matches!(view.get_record(1), Err(ChainError::Corruption(_))));
    }

    #[test]
    fn test_commit_reaches_disk() {
        let (_dir, log) = open_test_log();
        let root = StateView::persisted(log).into_handle();
        let mut child = StateView::layered(root.clone());
        let offset = child.append_record(&define("alice")).unwrap();
        child.record_name_edit("alice", offset);

        child.commit().unwrap();
        assert!(!child.has_local_changes());
        assert_eq!(root.borrow().last_name_edit("alice").unwrap(), Some(offset));

        root.borrow_mut().commit().unwrap();
        assert!(!root.borrow().has_local_changes());
        assert_eq!(root.borrow().last_name_edit("alice").unwrap(), Some(offset));
        assert_eq!(root.borrow().size(), child.size());
    }

    #[test]
    fn test_abort_discards_only_local_layer() {
        let (_dir, log) = open_test_log();
        let root = StateView::persisted(log).into_handle();
        root.borrow_mut().append_record(&define("alice")).unwrap();
        let root_size = root.borrow().size();

        let mut child = StateView::layered(root.clone());
        child.append_record(&define("bob")).unwrap();
        child.abort();
        assert_eq!(child.size(), root_size);
        assert_eq!(root.borrow().size(), root_size);
    }

    #[test]
    fn test_rebase_requires_matching_size() {
        let (_dir, log) = open_test_log();
        let root = StateView::persisted(log).into_handle();
        let middle = StateView::layered(root.clone()).into_handle();
        middle.borrow_mut().append_record(&define("alice")).unwrap();

        let mut top = StateView::layered(middle.clone());
        top.append_record(&define("bob")).unwrap();
        assert!(top.rebase(root.clone()).is_err());

        middle.borrow_mut().commit().unwrap();
        top.rebase(root.clone()).unwrap();
        assert!(matches!(top.get_record(0).unwrap(), StateRecord::DefineName(_)));
    }

    #[test]
    fn test_records_from_and_dump() {
        let (_dir, log) = open_test_log();
        let mut view = StateView::persisted(log);
        view.append_record(&define("alice")).unwrap();
        view.append_record(&define("bob")).unwrap();

        let records = view.records_from(0).unwrap();
        assert_eq!(records.len(), 2);
        let dump = view.dump_records(0).unwrap();
        assert_eq!(dump.lines().count(), 2);
        assert!(dump.contains("\"kind\":\"DefineName\""));
        assert!(view.find_last_block().unwrap().is_none());
    }
}
