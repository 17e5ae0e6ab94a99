// This is where commands actually change the ledger
// Everything here appends records to a StateView; nothing touches disk until a commit
// A command that fails its checks leaves the view exactly as it found it

use crate::core::{Block, Command, SignedTransaction};
use crate::error::{ChainError, Result};
use crate::storage::record::{
    DefineName, EndBlock, StartTransaction, StateRecord, TransferLog, UpdateName,
    MAX_RECORD_PAYLOAD,
};
use crate::storage::state_log::AccountKey;
use crate::storage::state_view::StateView;
use crate::utils::{encode_address, hash, validate_address_format, Digest, PublicKey};
use log::{error, warn};

// The state digest hashes the log in windows of this size
pub const STATE_CHUNK_SIZE: usize = 1024 * 1024;
// Balance marker for a stock's own holding once it has been issued
pub const ISSUED: u64 = u64::MAX;
// Room for the varint lengths and offsets around a name and key in a name record
const NAME_RECORD_OVERHEAD: usize = 64;

impl StateView {
    // Registers or re-keys a name and returns the offset of its DefineName record
    pub fn set_public_key(&mut self, name: &str, key: &PublicKey) -> Result<u64> {
        let last = match self.last_name_edit(name)? {
            Some(last) => last,
            None => {
                let offset = self.append_record(&StateRecord::DefineName(DefineName {
                    name: name.to_string(),
                    key: key.clone(),
                }))?;
                self.record_name_edit(name, offset);
                return Ok(offset);
            }
        };

        let name_idx = match self.get_record(last)? {
            StateRecord::DefineName(_) => last,
            StateRecord::UpdateName(update) => update.name_record_offset,
            other => {
                return Err(ChainError::Corruption(format!(
                    "Name index for {name} points at a {:?} record",
                    other.kind()
                )))
            }
        };
        let offset = self.append_record(&StateRecord::UpdateName(UpdateName {
            name_record_offset: name_idx,
            key: key.clone(),
            last_update_offset: last,
        }))?;
        self.record_name_edit(name, offset);
        Ok(name_idx)
    }

    pub fn transfer_balance(
        &mut self,
        from: &str,
        to: &str,
        stock: &str,
        amount: u64,
        owning_transaction: Option<u64>,
    ) -> Result<()> {
        let from_idx = self.require_name_index(from)?;
        let to_idx = self.require_name_index(to)?;
        let type_idx = self.require_name_index(stock)?;
        if from_idx == to_idx {
            return Err(ChainError::Transaction(format!(
                "{from} cannot transfer to itself"
            )));
        }

        let (from_balance, last_from) = split_entry(self.get_balance_entry(from_idx, type_idx)?);
        if from_balance < amount {
            return Err(ChainError::InsufficientFunds {
                required: amount,
                available: from_balance,
            });
        }
        let (to_balance, last_to) = split_entry(self.get_balance_entry(to_idx, type_idx)?);
        let new_to_balance = to_balance.checked_add(amount).ok_or_else(|| {
            ChainError::Transaction(format!("Balance of {to} in {stock} would overflow"))
        })?;

        let offset = self.size();
        self.record_transfer_edit(AccountKey::new(from_idx, type_idx), offset);
        self.record_transfer_edit(AccountKey::new(to_idx, type_idx), offset);
        self.append_record(&StateRecord::TransferLog(TransferLog {
            amount,
            type_idx,
            from_idx,
            to_idx,
            new_from_balance: from_balance - amount,
            new_to_balance,
            last_from_offset: last_from,
            last_to_offset: last_to,
            owning_transaction_offset: owning_transaction,
        }))?;
        Ok(())
    }

    // The issuer ends up holding ISSUED units of its own stock
    pub fn issue(&mut self, stock: &str, owning_transaction: Option<u64>) -> Result<()> {
        let type_idx = self.require_name_index(stock)?;
        if self.get_balance_entry(type_idx, type_idx)?.is_some() {
            return Err(ChainError::Transaction(format!(
                "Stock {stock} has already been issued"
            )));
        }

        let offset = self.size();
        self.record_transfer_edit(AccountKey::new(type_idx, type_idx), offset);
        self.append_record(&StateRecord::TransferLog(TransferLog {
            amount: ISSUED,
            type_idx,
            from_idx: type_idx,
            to_idx: type_idx,
            new_from_balance: ISSUED,
            new_to_balance: ISSUED,
            last_from_offset: None,
            last_to_offset: None,
            owning_transaction_offset: owning_transaction,
        }))?;
        Ok(())
    }

    // Ok(false) means a command was refused; the view is rolled back in that case
    pub fn apply_transaction(&mut self, signed: &SignedTransaction, generator: &str) -> Result<bool> {
        let savepoint = self.savepoint();
        match self.apply_commands(signed, generator) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.rollback(savepoint);
                Ok(false)
            }
            Err(e) => {
                self.rollback(savepoint);
                Err(e)
            }
        }
    }

    fn apply_commands(&mut self, signed: &SignedTransaction, generator: &str) -> Result<bool> {
        let trx_digest = signed.transaction.digest()?;
        let trx_offset = self.append_record(&StateRecord::StartTransaction(StartTransaction {
            trx_digest,
            utc_time: signed.transaction.utc_time,
        }))?;

        for command in &signed.transaction.commands {
            let applied = match command {
                Command::RegisterName { name, public_key } => {
                    self.apply_register(signed, name, public_key)?
                }
                Command::Issue { stock_name } => self.apply_issue(signed, stock_name, trx_offset)?,
                Command::Transfer {
                    amount,
                    stock_name,
                    from_name,
                    to_name,
                } => self.apply_transfer(
                    signed, *amount, stock_name, from_name, to_name, generator, trx_offset,
                )?,
            };
            if !applied {
                warn!(
                    "Rejected {} command in transaction {trx_digest}",
                    command.kind()
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn apply_register(
        &mut self,
        signed: &SignedTransaction,
        name: &str,
        key: &PublicKey,
    ) -> Result<bool> {
        if name.is_empty() {
            return Ok(false);
        }
        if name.len() + key.as_bytes().len() + NAME_RECORD_OVERHEAD > MAX_RECORD_PAYLOAD {
            warn!(
                "Registration of a {} byte name with a {} byte key is too large to record",
                name.len(),
                key.as_bytes().len()
            );
            return Ok(false);
        }
        // a name derived from the key itself needs no permission
        if name == encode_address(key) {
            self.set_public_key(name, key)?;
            return Ok(true);
        }
        if let Some(current) = self.get_public_key(name)? {
            if !signed.verify(&current) {
                warn!("Re-registration of {name} is not signed by its current key");
                return Ok(false);
            }
        }
        self.set_public_key(name, key)?;
        Ok(true)
    }

    fn apply_issue(
        &mut self,
        signed: &SignedTransaction,
        stock: &str,
        trx_offset: u64,
    ) -> Result<bool> {
        let key = match self.get_public_key(stock)? {
            Some(key) => key,
            None => {
                warn!("Cannot issue {stock}: name is not registered");
                return Ok(false);
            }
        };
        let type_idx = self.require_name_index(stock)?;
        if self.get_balance_entry(type_idx, type_idx)?.is_some() {
            warn!("Stock {stock} has already been issued");
            return Ok(false);
        }
        if !signed.verify(&key) {
            warn!("Issue of {stock} is not signed by its key");
            return Ok(false);
        }
        self.issue(stock, Some(trx_offset))?;
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_transfer(
        &mut self,
        signed: &SignedTransaction,
        amount: u64,
        stock: &str,
        from: &str,
        to: &str,
        generator: &str,
        trx_offset: u64,
    ) -> Result<bool> {
        let to = if to.is_empty() { generator } else { to };
        if to.is_empty() || from == to {
            warn!("Transfer from {from} has no distinct recipient");
            return Ok(false);
        }
        let from_key = match self.get_public_key(from)? {
            Some(key) => key,
            None => {
                warn!("Transfer source {from} is not registered");
                return Ok(false);
            }
        };
        if self.get_public_key(stock)?.is_none() {
            warn!("Stock {stock} is not registered");
            return Ok(false);
        }
        if !signed.verify(&from_key) {
            warn!("Transfer is not signed by {from}");
            return Ok(false);
        }

        let from_idx = self.require_name_index(from)?;
        let type_idx = self.require_name_index(stock)?;
        let (balance, _) = split_entry(self.get_balance_entry(from_idx, type_idx)?);
        if balance < amount {
            warn!("{from} holds {balance} {stock}, cannot send {amount}");
            return Ok(false);
        }

        if self.get_name_index(to)?.is_none() {
            if !validate_address_format(to) {
                warn!("Recipient {to} is neither registered nor an address");
                return Ok(false);
            }
            // placeholder until the key holder registers the address
            self.set_public_key(to, &PublicKey::default())?;
        }
        self.transfer_balance(from, to, stock, amount, Some(trx_offset))?;
        Ok(true)
    }

    // Applies a block's transactions and checks the resulting digest.
    // On any failure the view is left as it was.
    pub fn apply_block(
        &mut self,
        block: &Block,
        generator: &str,
        transactions: &[SignedTransaction],
        expected_state: &Digest,
    ) -> Result<bool> {
        let savepoint = self.savepoint();
        let from = savepoint.size;

        for signed in transactions {
            match self.apply_transaction(signed, generator) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Block {} carries a transaction that does not apply", block.digest());
                    self.rollback(savepoint);
                    return Ok(false);
                }
                Err(e) => {
                    self.rollback(savepoint);
                    return Err(e);
                }
            }
        }

        let state = match self.calculate_state_hash() {
            Ok(state) => state,
            Err(e) => {
                self.rollback(savepoint);
                return Err(e);
            }
        };
        if state != *expected_state {
            error!(
                "State digest mismatch for block {}: expected {expected_state}, computed {state}",
                block.digest()
            );
            match self.dump_records(from) {
                Ok(dump) => error!("Records applied for the block:\n{dump}"),
                Err(e) => error!("Could not dump records: {e}"),
            }
            self.rollback(savepoint);
            return Ok(false);
        }

        if let Err(e) = self.append_record(&StateRecord::EndBlock(EndBlock {
            block: *block,
            generator: generator.to_string(),
        })) {
            self.rollback(savepoint);
            return Err(e);
        }
        Ok(true)
    }

    // Digest of the per-chunk digests, always from offset 0
    pub fn calculate_state_hash(&self) -> Result<Digest> {
        let size = self.size();
        let mut chunk = vec![0u8; STATE_CHUNK_SIZE];
        let mut digests = Vec::new();
        let mut pos = 0u64;
        while pos < size {
            let n = STATE_CHUNK_SIZE.min(usize::try_from(size - pos).unwrap_or(usize::MAX));
            self.read_exact_at(pos, &mut chunk[..n])?;
            digests.extend_from_slice(hash(&chunk[..n]).as_bytes());
            pos += n as u64;
        }
        Ok(hash(&digests))
    }

    // One STATE_CHUNK_SIZE window of the log, for peers checking a single chunk
    pub fn get_state_chunk(&self, part: u64) -> Result<Vec<u8>> {
        let size = self.size();
        let pos = part.saturating_mul(STATE_CHUNK_SIZE as u64);
        if pos >= size {
            return Ok(vec![]);
        }
        let n = STATE_CHUNK_SIZE.min(usize::try_from(size - pos).unwrap_or(usize::MAX));
        let mut chunk = vec![0u8; n];
        self.read_exact_at(pos, &mut chunk)?;
        Ok(chunk)
    }

    fn require_name_index(&self, name: &str) -> Result<u64> {
        self.get_name_index(name)?
            .ok_or_else(|| ChainError::UnknownName(name.to_string()))
    }
}

fn split_entry(entry: Option<(u64, u64)>) -> (u64, Option<u64>) {
    match entry {
        Some((balance, offset)) => (balance, Some(offset)),
        None => (0, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::testnet::{open_test_log, signed, TestKey};
    use crate::storage::state_view::ViewHandle;

    fn root() -> (tempfile::TempDir, ViewHandle) {
        let (dir, log) = open_test_log();
        (dir, StateView::persisted(log).into_handle())
    }

    fn issued_view(alice: &TestKey) -> (tempfile::TempDir, StateView) {
        let (dir, root) = root();
        let mut view = StateView::layered(root);
        let trx = signed(
            vec![
                Command::RegisterName {
                    name: "alice".to_string(),
                    public_key: alice.public_key.clone(),
                },
                Command::Issue {
                    stock_name: "alice".to_string(),
                },
            ],
            &[alice],
        );
        assert!(view.apply_transaction(&trx, "miner").unwrap());
        (dir, view)
    }

    #[test]
    fn test_set_public_key_tracks_owner() {
        let (_dir, root) = root();
        let mut view = StateView::layered(root);
        let idx = view.set_public_key("alice", &PublicKey(vec![1])).unwrap();
        assert_eq!(view.get_name_index("alice").unwrap(), Some(idx));

        let again = view.set_public_key("alice", &PublicKey(vec![2])).unwrap();
        let third = view.set_public_key("alice", &PublicKey(vec![3])).unwrap();
        assert_eq!(again, idx);
        assert_eq!(third, idx);
        assert_eq!(view.get_public_key("alice").unwrap(), Some(PublicKey(vec![3])));
        assert_eq!(view.get_name_for_index(idx).unwrap(), "alice");
        assert_eq!(view.name_count().unwrap(), 1);
    }

    #[test]
    fn test_transfer_moves_exact_amount() {
        let (_dir, root) = root();
        let mut view = StateView::layered(root);
        view.set_public_key("stock", &PublicKey(vec![1])).unwrap();
        view.set_public_key("bob", &PublicKey(vec![2])).unwrap();
        view.issue("stock", None).unwrap();

        view.transfer_balance("stock", "bob", "stock", 250, None).unwrap();
        assert_eq!(view.get_balance("stock", "stock").unwrap(), Some(ISSUED - 250));
        assert_eq!(view.get_balance("bob", "stock").unwrap(), Some(250));

        view.transfer_balance("bob", "stock", "stock", 50, None).unwrap();
        assert_eq!(view.get_balance("bob", "stock").unwrap(), Some(200));
        assert_eq!(view.get_balance("stock", "stock").unwrap(), Some(ISSUED - 200));
    }

    #[test]
    fn test_overdraft_leaves_balances_unchanged() {
        let (_dir, root) = root();
        let mut view = StateView::layered(root);
        view.set_public_key("stock", &PublicKey(vec![1])).unwrap();
        view.set_public_key("bob", &PublicKey(vec![2])).unwrap();
        view.set_public_key("carol", &PublicKey(vec![3])).unwrap();
        view.issue("stock", None).unwrap();
        view.transfer_balance("stock", "bob", "stock", 10, None).unwrap();
        let size = view.size();

        let err = view
            .transfer_balance("bob", "carol", "stock", 11, None)
            .unwrap_err();
        assert!(matches!(
            err,
            ChainError::InsufficientFunds {
                required: 11,
                available: 10
            }
        ));
        assert_eq!(view.size(), size);
        assert_eq!(view.get_balance("bob", "stock").unwrap(), Some(10));
        assert_eq!(view.get_balance("carol", "stock").unwrap(), None);
    }

    #[test]
    fn test_issue_twice_fails() {
        let (_dir, root) = root();
        let mut view = StateView::layered(root);
        view.set_public_key("stock", &PublicKey(vec![1])).unwrap();
        assert_eq!(view.get_balance("stock", "stock").unwrap(), None);

        view.issue("stock", None).unwrap();
        assert_eq!(view.get_balance("stock", "stock").unwrap(), Some(ISSUED));
        assert!(view.issue("stock", None).is_err());
        assert!(matches!(
            view.issue("nobody", None),
            Err(ChainError::UnknownName(_))
        ));
    }

    #[test]
    fn test_signed_issue_and_double_issue() {
        let alice = TestKey::new();
        let (_dir, mut view) = issued_view(&alice);
        assert_eq!(view.get_balance("alice", "alice").unwrap(), Some(ISSUED));
        assert_eq!(view.get_public_key("alice").unwrap(), Some(alice.public_key.clone()));

        let size = view.size();
        let again = signed(
            vec![Command::Issue {
                stock_name: "alice".to_string(),
            }],
            &[&alice],
        );
        assert!(!view.apply_transaction(&again, "miner").unwrap());
        assert_eq!(view.size(), size);
    }

    #[test]
    fn test_transfer_auto_registers_address() {
        let alice = TestKey::new();
        let bob = TestKey::new();
        let (_dir, mut view) = issued_view(&alice);

        let trx = signed(
            vec![Command::Transfer {
                amount: 100,
                stock_name: "alice".to_string(),
                from_name: "alice".to_string(),
                to_name: bob.address.clone(),
            }],
            &[&alice],
        );
        assert!(view.apply_transaction(&trx, "miner").unwrap());
        assert_eq!(view.get_balance("alice", "alice").unwrap(), Some(ISSUED - 100));
        assert_eq!(view.get_balance(&bob.address, "alice").unwrap(), Some(100));
        assert_eq!(view.get_public_key(&bob.address).unwrap(), Some(PublicKey::default()));

        // the address owner can claim it later without anyone's permission
        let claim = signed(
            vec![Command::RegisterName {
                name: bob.address.clone(),
                public_key: bob.public_key.clone(),
            }],
            &[],
        );
        assert!(view.apply_transaction(&claim, "miner").unwrap());
        assert_eq!(view.get_public_key(&bob.address).unwrap(), Some(bob.public_key.clone()));
        assert_eq!(view.get_balance(&bob.address, "alice").unwrap(), Some(100));
    }

    #[test]
    fn test_transfer_to_unknown_plain_name_rejected() {
        let alice = TestKey::new();
        let (_dir, mut view) = issued_view(&alice);
        let size = view.size();

        let trx = signed(
            vec![Command::Transfer {
                amount: 1,
                stock_name: "alice".to_string(),
                from_name: "alice".to_string(),
                to_name: "bob".to_string(),
            }],
            &[&alice],
        );
        assert!(!view.apply_transaction(&trx, "miner").unwrap());
        assert_eq!(view.size(), size);
        assert_eq!(view.get_name_index("bob").unwrap(), None);
    }

    #[test]
    fn test_transfer_requires_sender_signature() {
        let alice = TestKey::new();
        let mallory = TestKey::new();
        let (_dir, mut view) = issued_view(&alice);

        let trx = signed(
            vec![Command::Transfer {
                amount: 1,
                stock_name: "alice".to_string(),
                from_name: "alice".to_string(),
                to_name: mallory.address.clone(),
            }],
            &[&mallory],
        );
        assert!(!view.apply_transaction(&trx, "miner").unwrap());
        assert_eq!(view.get_balance(&mallory.address, "alice").unwrap(), None);
    }

    #[test]
    fn test_empty_recipient_pays_generator() {
        let alice = TestKey::new();
        let (_dir, mut view) = issued_view(&alice);
        let trx = signed(
            vec![
                Command::RegisterName {
                    name: "miner".to_string(),
                    public_key: PublicKey(vec![9]),
                },
                Command::Transfer {
                    amount: 7,
                    stock_name: "alice".to_string(),
                    from_name: "alice".to_string(),
                    to_name: String::new(),
                },
            ],
            &[&alice],
        );
        assert!(view.apply_transaction(&trx, "miner").unwrap());
        assert_eq!(view.get_balance("miner", "alice").unwrap(), Some(7));
    }

    #[test]
    fn test_transfer_to_self_is_refused() {
        let alice = TestKey::new();
        let (_dir, mut view) = issued_view(&alice);
        let size = view.size();

        let direct = signed(
            vec![Command::Transfer {
                amount: 5,
                stock_name: "alice".to_string(),
                from_name: "alice".to_string(),
                to_name: "alice".to_string(),
            }],
            &[&alice],
        );
        assert!(!view.apply_transaction(&direct, "miner").unwrap());

        // an empty recipient resolves to the generator, which is alice here
        let via_generator = signed(
            vec![Command::Transfer {
                amount: 5,
                stock_name: "alice".to_string(),
                from_name: "alice".to_string(),
                to_name: String::new(),
            }],
            &[&alice],
        );
        assert!(!view.apply_transaction(&via_generator, "alice").unwrap());

        assert_eq!(view.size(), size);
        assert_eq!(view.get_balance("alice", "alice").unwrap(), Some(ISSUED));
    }

    #[test]
    fn test_key_too_large_to_record_is_refused() {
        let alice = TestKey::new();
        let (_dir, mut view) = issued_view(&alice);
        let size = view.size();

        let huge = signed(
            vec![Command::RegisterName {
                name: "bob".to_string(),
                public_key: PublicKey(vec![7; MAX_RECORD_PAYLOAD + 1024]),
            }],
            &[&alice],
        );
        assert!(!view.apply_transaction(&huge, "miner").unwrap());
        assert_eq!(view.size(), size);
        assert_eq!(view.get_public_key("bob").unwrap(), None);

        // the view keeps working for ordinary commands
        let bob = TestKey::new();
        let register = signed(
            vec![Command::RegisterName {
                name: "bob".to_string(),
                public_key: bob.public_key.clone(),
            }],
            &[&bob],
        );
        assert!(view.apply_transaction(&register, "miner").unwrap());
        assert_eq!(view.get_public_key("bob").unwrap(), Some(bob.public_key.clone()));
        assert_eq!(view.get_balance("alice", "alice").unwrap(), Some(ISSUED));
    }

    #[test]
    fn test_reregistration_needs_current_key() {
        let alice = TestKey::new();
        let mallory = TestKey::new();
        let (_dir, mut view) = issued_view(&alice);

        let steal = signed(
            vec![Command::RegisterName {
                name: "alice".to_string(),
                public_key: mallory.public_key.clone(),
            }],
            &[&mallory],
        );
        assert!(!view.apply_transaction(&steal, "miner").unwrap());

        let hand_over = signed(
            vec![Command::RegisterName {
                name: "alice".to_string(),
                public_key: mallory.public_key.clone(),
            }],
            &[&alice],
        );
        assert!(view.apply_transaction(&hand_over, "miner").unwrap());
        assert_eq!(view.get_public_key("alice").unwrap(), Some(mallory.public_key.clone()));
    }

    #[test]
    fn test_failed_command_rolls_back_whole_transaction() {
        let alice = TestKey::new();
        let (_dir, mut view) = issued_view(&alice);
        let size = view.size();

        let trx = signed(
            vec![
                Command::RegisterName {
                    name: "carol".to_string(),
                    public_key: PublicKey(vec![3]),
                },
                Command::Issue {
                    stock_name: "nobody".to_string(),
                },
            ],
            &[&alice],
        );
        assert!(!view.apply_transaction(&trx, "miner").unwrap());
        assert_eq!(view.size(), size);
        assert_eq!(view.get_public_key("carol").unwrap(), None);
    }

    #[test]
    fn test_sibling_views_are_isolated() {
        let (_dir, root) = root();
        let committed = StateView::layered(root.clone()).into_handle();
        committed
            .borrow_mut()
            .set_public_key("alice", &PublicKey(vec![1]))
            .unwrap();
        committed.borrow_mut().commit().unwrap();

        let mut sibling = StateView::layered(root.clone());
        sibling.set_public_key("bob", &PublicKey(vec![2])).unwrap();
        sibling.set_public_key("alice", &PublicKey(vec![3])).unwrap();
        sibling.abort();

        assert_eq!(
            root.borrow().get_public_key("alice").unwrap(),
            Some(PublicKey(vec![1]))
        );
        assert_eq!(root.borrow().get_public_key("bob").unwrap(), None);
        assert_eq!(
            committed.borrow().get_public_key("alice").unwrap(),
            Some(PublicKey(vec![1]))
        );
    }

    #[test]
    fn test_state_hash_tracks_contents() {
        let (_dir, root) = root();
        let mut view = StateView::layered(root);
        let empty = view.calculate_state_hash().unwrap();
        assert_eq!(empty, hash(&[]));

        view.set_public_key("alice", &PublicKey(vec![1])).unwrap();
        let one = view.calculate_state_hash().unwrap();
        assert_ne!(one, empty);
        assert_eq!(view.calculate_state_hash().unwrap(), one);
        assert_eq!(view.get_state_chunk(0).unwrap().len() as u64, view.size());
        assert!(view.get_state_chunk(1).unwrap().is_empty());
    }

    #[test]
    fn test_apply_block_checks_state_digest() {
        let alice = TestKey::new();
        let (_dir, root) = root();
        let trx = signed(
            vec![Command::RegisterName {
                name: "alice".to_string(),
                public_key: alice.public_key.clone(),
            }],
            &[&alice],
        );
        let block = Block::new(Digest::zero(), 0, hash(b"state"));

        // learn the digest with a throwaway view
        let mut probe = StateView::layered(root.clone());
        assert!(probe.apply_transaction(&trx, "miner").unwrap());
        let expected = probe.calculate_state_hash().unwrap();

        let mut view = StateView::layered(root.clone());
        assert!(!view
            .apply_block(&block, "miner", std::slice::from_ref(&trx), &hash(b"wrong"))
            .unwrap());
        assert_eq!(view.size(), 0);

        assert!(view
            .apply_block(&block, "miner", std::slice::from_ref(&trx), &expected)
            .unwrap());
        let last = view.find_last_block().unwrap().unwrap();
        assert_eq!(last.block, block);
        assert_eq!(last.generator, "miner");
    }

    #[test]
    fn test_query_names_and_contents() {
        let (_dir, root) = root();
        {
            let mut base = StateView::layered(root.clone());
            base.set_public_key("alice", &PublicKey(vec![1])).unwrap();
            base.set_public_key("stock", &PublicKey(vec![2])).unwrap();
            base.issue("stock", None).unwrap();
            base.commit().unwrap();
            root.borrow_mut().commit().unwrap();
        }
        let mut view = StateView::layered(root.clone());
        view.set_public_key("bob", &PublicKey(vec![3])).unwrap();
        view.set_public_key("other", &PublicKey(vec![4])).unwrap();
        view.issue("other", None).unwrap();
        view.transfer_balance("stock", "alice", "stock", 5, None).unwrap();
        view.transfer_balance("other", "alice", "other", 5, None).unwrap();

        assert_eq!(
            view.query_names("a", "c", 10).unwrap(),
            vec!["alice".to_string(), "bob".to_string()]
        );
        assert_eq!(view.query_names("", "~", 2).unwrap().len(), 2);
        assert_eq!(view.name_count().unwrap(), 4);
        assert_eq!(
            view.get_account_contents("alice").unwrap(),
            vec!["other".to_string(), "stock".to_string()]
        );
        assert!(view.get_account_contents("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_transaction_without_commands_is_not_buildable() {
        assert!(Transaction::new(vec![]).is_err());
    }
}
