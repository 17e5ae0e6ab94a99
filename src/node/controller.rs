//! The consensus controller.
//!
//! [`Node`] owns the chain, the durable log and every view over it. All
//! mutations go through `&mut self` on one thread; the only concurrency is
//! the miner, which reports back over a channel (see `generation.rs`).
//!
//! View layering:
//!
//! ```text
//! committed  (Persisted, durable log)   everything up to the block before head
//! head_view  (Layered on committed)     the head block's records only
//! candidate  (Layered on head_view)     pending transactions being mined
//! ```
//!
//! The chain file holds every block except the head. When a block extends
//! the head, the old head is folded into `committed` and written durably.

use crate::config::NodeConfig;
use crate::core::{
    calculate_difficulty, calculate_hash_rate, validate, Block, BlockState, ChainFile,
    FullBlockState, MinedBlock, MinerHandle, SignedTransaction, MAX_FUTURE_SECONDS,
};
use crate::error::{ChainError, Result};
use crate::storage::{
    KeyValueTree, StateLog, StateView, Tier, TransactionPool, TransferLogEntry, ViewHandle,
};
use crate::utils::{current_utc_seconds, Digest, PublicKey};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fs;
use std::sync::mpsc::{self, Receiver, Sender};

pub type Clock = Box<dyn Fn() -> Result<u32>>;

/// Blocks parked while their state is fetched.
pub const MAX_DEFERRED_BLOCKS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Accepted,
    Rejected,
    Error,
}

/// Events the node reports to whoever relays for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    NewTransaction(SignedTransaction),
    NewBlock(FullBlockState),
    /// A block arrived whose state is unknown; fetch it and hand it to
    /// `add_full_block`.
    BlockStateRequested(Digest),
}

pub struct Node {
    pub(crate) config: NodeConfig,
    pub(crate) clock: Clock,
    pub(crate) chain: Vec<Block>,
    pub(crate) chain_file: ChainFile,
    pub(crate) block_states: KeyValueTree<Digest, BlockState>,
    pub(crate) pool: TransactionPool,
    pub(crate) committed: ViewHandle,
    pub(crate) head_view: ViewHandle,
    pub(crate) candidate_view: ViewHandle,
    pub(crate) deferred: HashMap<Digest, Block>,
    pub(crate) listeners: Vec<Sender<Notification>>,
    pub(crate) generator: String,
    pub(crate) generating: bool,
    pub(crate) hash_rate: u64,
    pub(crate) miner: Option<MinerHandle>,
    pub(crate) next_job_id: u64,
    pub(crate) mined_tx: Sender<MinedBlock>,
    pub(crate) mined_rx: Receiver<MinedBlock>,
    _db: sled::Db,
}

impl Node {
    pub fn open(config: NodeConfig) -> Result<Node> {
        Node::open_with_clock(config, Box::new(current_utc_seconds))
    }

    pub fn open_with_clock(config: NodeConfig, clock: Clock) -> Result<Node> {
        fs::create_dir_all(&config.data_dir)?;
        let db = sled::open(config.index_db_path())?;
        let log = StateLog::open(&db, config.state_log_path())?;
        let pool = TransactionPool::open(&db)?;
        let block_states = KeyValueTree::open(&db, "block_states")?;
        let chain_file = ChainFile::new(config.chain_path());
        let chain = chain_file.load()?;

        let committed = StateView::persisted(log).into_handle();
        let head_view = StateView::layered(committed.clone()).into_handle();
        let candidate_view = StateView::layered(head_view.clone()).into_handle();

        info!("Measuring hash rate over {} nonces", config.hash_rate_sample);
        let hash_rate = calculate_hash_rate(config.hash_rate_sample);
        info!("{hash_rate} hashes per second");

        let (mined_tx, mined_rx) = mpsc::channel();
        let mut node = Node {
            generator: config.generator.clone(),
            config,
            clock,
            chain,
            chain_file,
            block_states,
            pool,
            committed,
            head_view,
            candidate_view,
            deferred: HashMap::new(),
            listeners: vec![],
            generating: false,
            hash_rate,
            miner: None,
            next_job_id: 0,
            mined_tx,
            mined_rx,
            _db: db,
        };
        node.synchronize_state()?;
        info!(
            "Opened node at {} with {} blocks",
            node.config.data_dir.display(),
            node.chain.len()
        );

        if node.config.generate {
            let generator = node.generator.clone();
            node.configure_generation(&generator, true)?;
        }
        Ok(node)
    }

    /// Reconciles the chain file with the last block the log recorded. The
    /// log is authoritative: extra chain entries are dropped, and a single
    /// block the file missed is restored from its `EndBlock` record.
    pub fn synchronize_state(&mut self) -> Result<()> {
        // the head block only ever lived in memory, so its transactions are pending again
        let returned = self.pool.move_all(Tier::Head, Tier::Pending)?;
        if returned > 0 {
            info!("Returned {returned} transactions of the unsaved head block to the pool");
        }

        let last = self.committed.borrow().find_last_block()?;
        let last = match last {
            Some(end_block) => end_block.block,
            None => {
                if !self.chain.is_empty() {
                    warn!("Log records no blocks; dropping {} chain entries", self.chain.len());
                    self.chain.clear();
                }
                return Ok(());
            }
        };

        let digest = last.digest();
        if let Some(i) = self.chain.iter().rposition(|b| b.digest() == digest) {
            for dropped in &self.chain[i + 1..] {
                warn!("Dropping block {} that the log never recorded", dropped.digest());
            }
            self.chain.truncate(i + 1);
            return Ok(());
        }

        let tip = self.chain.last().map(Block::digest).unwrap_or_default();
        if last.prev_block == tip {
            info!("Restoring block {digest} from the state log");
            self.chain.push(last);
            self.chain_file.save(&self.chain)?;
            return Ok(());
        }
        Err(ChainError::Corruption(format!(
            "Last logged block {digest} does not fit the chain file"
        )))
    }

    pub fn subscribe(&mut self) -> Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        self.listeners.push(tx);
        rx
    }

    pub(crate) fn notify(&mut self, notification: Notification) {
        self.listeners
            .retain(|listener| listener.send(notification.clone()).is_ok());
    }

    pub(crate) fn now(&self) -> Result<u32> {
        (self.clock)()
    }

    /// Stores a new transaction as pending. Returns false for one already
    /// known in any tier.
    pub fn add_transaction(&mut self, trx: SignedTransaction) -> Result<bool> {
        let digest = trx.digest()?;
        if self.pool.contains(&digest)? {
            debug!("Already know transaction {digest}");
            return Ok(false);
        }
        self.pool.insert(Tier::Pending, &digest, &trx)?;
        info!("Added pending transaction {digest}");
        self.notify(Notification::NewTransaction(trx));
        if self.generating {
            self.start_block()?;
        }
        Ok(true)
    }

    pub fn add_full_block(&mut self, full: FullBlockState) -> Result<BlockStatus> {
        if full.block_state.digest()? != full.block.state {
            warn!("Block state for block {} does not match its header", full.index);
            return Ok(BlockStatus::Rejected);
        }

        let mut added_trx = false;
        for trx in &full.transactions {
            let digest = trx.digest()?;
            if !self.pool.contains(&digest)? {
                self.pool.insert(Tier::Pending, &digest, trx)?;
                added_trx = true;
            }
        }
        self.block_states.set(&full.block.state, &full.block_state)?;

        if self.chain.is_empty() && full.index == 0 {
            return self.adopt_genesis(&full);
        }

        let status = self.add_block(full.block)?;
        self.retry_deferred()?;
        if status != BlockStatus::Accepted && added_trx && self.generating {
            self.start_block()?;
        }
        Ok(status)
    }

    fn adopt_genesis(&mut self, full: &FullBlockState) -> Result<BlockStatus> {
        let block = full.block;
        if !full.block_state.transactions.is_empty() || !validate(&[block]) {
            warn!("Rejecting genesis block {}", block.digest());
            return Ok(BlockStatus::Rejected);
        }
        let applied = self.head_view.borrow_mut().apply_block(
            &block,
            &full.block_state.generator,
            &[],
            &full.block_state.state_digest,
        )?;
        if !applied {
            error!("Error applying genesis block {}", block.digest());
            return Ok(BlockStatus::Error);
        }
        self.chain.push(block);
        self.reset_candidate();
        info!("Adopted genesis block {}", block.digest());
        if self.generating {
            self.start_block()?;
        }
        Ok(BlockStatus::Accepted)
    }

    fn retry_deferred(&mut self) -> Result<()> {
        let mut ready = vec![];
        for state in self.deferred.keys() {
            if self.block_states.contains(state)? {
                ready.push(*state);
            }
        }
        for state in ready {
            if let Some(block) = self.deferred.remove(&state) {
                debug!("Retrying deferred block {}", block.digest());
                self.add_block(block)?;
            }
        }
        Ok(())
    }

    pub fn add_block(&mut self, block: Block) -> Result<BlockStatus> {
        let head = match self.chain.last() {
            Some(head) => *head,
            None => {
                warn!("No chain yet; ignoring block {}", block.digest());
                return Ok(BlockStatus::Rejected);
            }
        };

        let state = match self.block_states.get(&block.state)? {
            Some(state) => state,
            None => {
                if block.prev_block != head.digest() && block.prev_block != head.prev_block {
                    warn!(
                        "Unknown block state {} on block {} that does not link to the head",
                        block.state,
                        block.digest()
                    );
                    return Ok(BlockStatus::Rejected);
                }
                if !self.deferred.contains_key(&block.state)
                    && self.deferred.len() >= MAX_DEFERRED_BLOCKS
                {
                    warn!(
                        "{MAX_DEFERRED_BLOCKS} blocks already wait for state; dropping {}",
                        block.digest()
                    );
                    return Ok(BlockStatus::Rejected);
                }
                warn!("Unknown block state {}; requesting it", block.state);
                self.deferred.insert(block.state, block);
                self.notify(Notification::BlockStateRequested(block.state));
                return Ok(BlockStatus::Rejected);
            }
        };
        self.deferred.remove(&block.state);

        let now = self.now()?;
        if block.utc_time > now.saturating_add(MAX_FUTURE_SECONDS) {
            error!(
                "Block {} is {} seconds in the future",
                block.digest(),
                block.utc_time - now
            );
            return Ok(BlockStatus::Rejected);
        }

        let head_hash = head.digest();
        if block.digest() == head_hash {
            debug!("Block {head_hash} is already the head");
            return Ok(BlockStatus::Rejected);
        }
        if block.prev_block == head_hash {
            self.extend_head(block, state)
        } else if block.prev_block == head.prev_block {
            self.replace_head(block, state)
        } else {
            warn!(
                "Block links to {}, neither head {head_hash} nor its parent {}",
                block.prev_block, head.prev_block
            );
            Ok(BlockStatus::Rejected)
        }
    }

    fn extend_head(&mut self, block: Block, state: BlockState) -> Result<BlockStatus> {
        self.chain.push(block);
        if !validate(&self.chain) {
            error!("Block {} does not extend a valid chain", block.digest());
            self.chain.pop();
            return Ok(BlockStatus::Error);
        }

        let transactions = match self.pool.get_many(Tier::Pending, &state.transactions)? {
            Some(transactions) => transactions,
            None => {
                error!("Missing pending transactions for block {}", block.digest());
                self.chain.pop();
                return Ok(BlockStatus::Error);
            }
        };

        let mut view = StateView::layered(self.head_view.clone());
        match view.apply_block(&block, &state.generator, &transactions, &state.state_digest) {
            Ok(true) => {}
            Ok(false) => {
                error!("Error applying block {}", block.digest());
                self.chain.pop();
                return Ok(BlockStatus::Error);
            }
            Err(e) => {
                self.chain.pop();
                return Err(e);
            }
        }

        self.pool.move_all(Tier::Head, Tier::Applied)?;
        self.pool.move_some(&state.transactions, Tier::Pending, Tier::Head)?;

        // old head goes down into the durable log, the new block becomes head
        self.head_view.borrow_mut().commit()?;
        self.committed.borrow_mut().commit()?;
        view.rebase(self.committed.clone())?;
        self.head_view = view.into_handle();
        self.reset_candidate();

        self.chain_file.save(&self.chain[..self.chain.len() - 1])?;
        self.pool.sync()?;
        self.block_states.sync()?;

        self.adopted(block, state, transactions)
    }

    // A competitor for the head: same parent, so it is applied on `committed`.
    fn replace_head(&mut self, block: Block, state: BlockState) -> Result<BlockStatus> {
        let last = self.chain.len() - 1;
        let old_head = self.chain[last];
        self.chain[last] = block;
        if !validate(&self.chain) {
            error!("Competing block {} does not validate", block.digest());
            self.chain[last] = old_head;
            return Ok(BlockStatus::Error);
        }

        let old_transactions = self
            .block_states
            .get(&old_head.state)?
            .map(|s| s.transactions)
            .unwrap_or_default();
        self.pool
            .move_some(&old_transactions, Tier::Head, Tier::Pending)?;

        let outcome = match self.pool.get_many(Tier::Pending, &state.transactions)? {
            Some(transactions) => {
                let mut view = StateView::layered(self.committed.clone());
                view.apply_block(&block, &state.generator, &transactions, &state.state_digest)
                    .map(|ok| ok.then_some((view, transactions)))
            }
            None => {
                error!("Missing pending transactions for block {}", block.digest());
                Ok(None)
            }
        };

        match outcome {
            Ok(Some((view, transactions))) => {
                self.pool
                    .move_some(&state.transactions, Tier::Pending, Tier::Head)?;
                self.head_view = view.into_handle();
                self.reset_candidate();
                info!("Replaced head {} with {}", old_head.digest(), block.digest());
                self.adopted(block, state, transactions)
            }
            Ok(None) => {
                self.pool
                    .move_some(&old_transactions, Tier::Pending, Tier::Head)?;
                self.chain[last] = old_head;
                Ok(BlockStatus::Error)
            }
            Err(e) => {
                self.pool
                    .move_some(&old_transactions, Tier::Pending, Tier::Head)?;
                self.chain[last] = old_head;
                Err(e)
            }
        }
    }

    fn adopted(
        &mut self,
        block: Block,
        block_state: BlockState,
        transactions: Vec<SignedTransaction>,
    ) -> Result<BlockStatus> {
        let index = (self.chain.len() - 1) as u32;
        info!("Block {index} accepted: {}", block.digest());
        self.prune_deferred();
        self.notify(Notification::NewBlock(FullBlockState {
            index,
            head_index: Some(index),
            block,
            block_state,
            transactions,
        }));
        if self.generating {
            self.start_block()?;
        }
        Ok(BlockStatus::Accepted)
    }

    // Parked blocks that no longer link to the head or its parent can never be added
    fn prune_deferred(&mut self) {
        let (head, parent) = match self.chain.last() {
            Some(head) => (head.digest(), head.prev_block),
            None => return,
        };
        let before = self.deferred.len();
        self.deferred
            .retain(|_, block| block.prev_block == head || block.prev_block == parent);
        if self.deferred.len() < before {
            debug!("Dropped {} stale deferred blocks", before - self.deferred.len());
        }
    }

    pub(crate) fn reset_candidate(&mut self) {
        self.candidate_view = StateView::layered(self.head_view.clone()).into_handle();
    }

    pub fn get_head_block_index(&self) -> Option<u32> {
        self.chain.len().checked_sub(1).map(|i| i as u32)
    }

    pub fn head_block(&self) -> Option<&Block> {
        self.chain.last()
    }

    pub fn get_block_by_index(&self, index: u32) -> Result<Block> {
        self.chain.get(index as usize).copied().ok_or_else(|| {
            ChainError::InvalidBlock(format!(
                "Block index {index} is beyond the known chain of {}",
                self.chain.len()
            ))
        })
    }

    pub fn get_block_state(&self, state: &Digest) -> Result<Option<BlockState>> {
        self.block_states.get(state)
    }

    pub fn get_transaction(&self, digest: &Digest) -> Result<Option<SignedTransaction>> {
        self.pool.find(digest)
    }

    pub fn transaction_tier(&self, digest: &Digest) -> Result<Option<Tier>> {
        self.pool.tier_of(digest)
    }

    pub fn get_full_block(&self, index: u32) -> Result<Option<FullBlockState>> {
        let block = match self.chain.get(index as usize) {
            Some(block) => *block,
            None => return Ok(None),
        };
        let block_state = self.block_states.get(&block.state)?.ok_or_else(|| {
            ChainError::Database(format!("Missing block state for block {index}"))
        })?;
        let mut transactions = Vec::with_capacity(block_state.transactions.len());
        for digest in &block_state.transactions {
            let trx = self.pool.find(digest)?.ok_or_else(|| {
                ChainError::Database(format!("Missing transaction {digest} of block {index}"))
            })?;
            transactions.push(trx);
        }
        Ok(Some(FullBlockState {
            index,
            head_index: self.get_head_block_index(),
            block,
            block_state,
            transactions,
        }))
    }

    pub fn get_balance(&self, account: &str, stock: &str) -> Result<Option<u64>> {
        self.candidate_view.borrow().get_balance(account, stock)
    }

    pub fn has_balance(&self, account: &str, stock: &str) -> Result<bool> {
        Ok(self.get_balance(account, stock)?.is_some())
    }

    pub fn get_account_contents(&self, account: &str) -> Result<Vec<String>> {
        self.candidate_view.borrow().get_account_contents(account)
    }

    pub fn get_public_key(&self, name: &str) -> Result<Option<PublicKey>> {
        self.candidate_view.borrow().get_public_key(name)
    }

    pub fn can_register(&self, name: &str) -> Result<bool> {
        Ok(self.candidate_view.borrow().get_name_index(name)?.is_none())
    }

    pub fn get_transaction_log(
        &self,
        account: &str,
        stock: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<TransferLogEntry>> {
        self.candidate_view
            .borrow()
            .get_transaction_log(account, stock, start, end)
    }

    pub fn query_names(&self, start: &str, end: &str, limit: usize) -> Result<Vec<String>> {
        self.candidate_view.borrow().query_names(start, end, limit)
    }

    pub fn name_count(&self) -> Result<u64> {
        self.candidate_view.borrow().name_count()
    }

    pub fn get_state_chunk(&self, part: u64) -> Result<Vec<u8>> {
        self.committed.borrow().get_state_chunk(part)
    }

    pub fn get_hash_rate(&self) -> u64 {
        self.hash_rate
    }

    pub fn difficulty(&self) -> i64 {
        calculate_difficulty(&self.chain)
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }
}
