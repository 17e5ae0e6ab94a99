// Block generation for the node
// I build a candidate from the pending pool, hand a snapshot of it to a miner thread,
// and pick the result up again through process_mined_blocks on the controller thread

use crate::core::{
    calculate_hash_target, generate, spawn_miner, Block, BlockState, MiningJob, MAX_HASH,
    SECONDS_PER_BLOCK,
};
use crate::error::{ChainError, Result};
use crate::node::controller::{BlockStatus, Node};
use crate::storage::{StateView, Tier};
use crate::utils::Digest;
use log::{debug, info, warn};
use std::sync::mpsc::TryRecvError;

// A block ready to be mined: header, the state it names, and the target it must meet
#[derive(Debug, Clone)]
pub struct CandidateBlock {
    pub block: Block,
    pub block_state: BlockState,
    pub target: Digest,
}

impl Node {
    pub fn configure_generation(&mut self, generator: &str, on: bool) -> Result<()> {
        self.generator = generator.to_string();
        self.generating = on;
        info!(
            "Generation {} for {generator}",
            if on { "enabled" } else { "disabled" }
        );
        if on {
            self.start_block()
        } else {
            self.stop_miner();
            self.candidate_view.borrow_mut().abort();
            Ok(())
        }
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn generator(&self) -> &str {
        &self.generator
    }

    fn stop_miner(&mut self) {
        if let Some(miner) = self.miner.take() {
            debug!("Stopping miner for job {}", miner.job_id());
            miner.stop();
        }
    }

    // Restarts mining on a fresh candidate. Does nothing unless generation is on
    pub fn start_block(&mut self) -> Result<()> {
        if !self.generating {
            return Ok(());
        }
        self.stop_miner();
        let candidate = self.build_candidate()?;

        self.next_job_id += 1;
        let job = MiningJob {
            id: self.next_job_id,
            block: candidate.block,
            target: candidate.target,
            hash_rate: self.hash_rate,
        };
        info!(
            "Starting block {} with {} transactions",
            candidate.block_state.index,
            candidate.block_state.transactions.len()
        );
        self.miner = Some(spawn_miner(job, self.mined_tx.clone())?);
        Ok(())
    }

    // Fills the candidate view with every pending transaction that still applies
    // and records the resulting BlockState. A genesis block is made first if I have no chain
    pub fn build_candidate(&mut self) -> Result<CandidateBlock> {
        if self.chain.is_empty() {
            self.create_genesis()?;
        }
        self.candidate_view.borrow_mut().abort();

        let head = match self.chain.last() {
            Some(head) => *head,
            None => return Err(ChainError::Mining("No head block to build on".to_string())),
        };
        let mut block_state = BlockState {
            index: self.chain.len() as u32,
            generator: self.generator.clone(),
            ..BlockState::default()
        };

        for (digest, trx) in self.pool.list(Tier::Pending)? {
            // each try gets its own throwaway view so a bad one leaves no trace
            let mut probe = StateView::layered(self.candidate_view.clone());
            match probe.apply_transaction(&trx, &self.generator) {
                Ok(true) => {
                    probe.commit()?;
                    block_state.transactions.push(digest);
                }
                Ok(false) => warn!("Pending transaction {digest} does not apply; leaving it out"),
                Err(e) => warn!("Leaving out pending transaction {digest}: {e}"),
            }
        }
        block_state.state_digest = self.candidate_view.borrow().calculate_state_hash()?;

        let utc_time = self
            .now()?
            .max(head.utc_time.saturating_add(SECONDS_PER_BLOCK));
        let block = Block::new(head.digest(), utc_time, block_state.digest()?);
        self.block_states.set(&block.state, &block_state)?;

        Ok(CandidateBlock {
            block,
            target: calculate_hash_target(&self.chain, self.chain.len()),
            block_state,
        })
    }

    // The first block carries no transactions, so I mine it right here against MAX_HASH
    fn create_genesis(&mut self) -> Result<()> {
        let block_state = BlockState {
            index: 0,
            generator: self.generator.clone(),
            state_digest: self.head_view.borrow().calculate_state_hash()?,
            transactions: vec![],
        };
        let mut block = Block::new(Digest::zero(), self.now()?, block_state.digest()?);
        if !generate(&mut block, &MAX_HASH, 0, u64::MAX) {
            return Err(ChainError::Mining("No nonce meets the genesis target".to_string()));
        }

        let applied = self.head_view.borrow_mut().apply_block(
            &block,
            &block_state.generator,
            &[],
            &block_state.state_digest,
        )?;
        if !applied {
            return Err(ChainError::InvalidBlock("Error applying genesis block".to_string()));
        }
        self.block_states.set(&block.state, &block_state)?;
        self.chain.push(block);
        self.reset_candidate();
        info!("Created genesis block {}", block.digest());
        Ok(())
    }

    // Drains finished mining jobs. Results from jobs I have since replaced are dropped
    pub fn process_mined_blocks(&mut self) -> Result<usize> {
        let mut accepted = 0;
        loop {
            let mined = match self.mined_rx.try_recv() {
                Ok(mined) => mined,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            let current = self.miner.as_ref().map(|miner| miner.job_id());
            if current != Some(mined.job_id) {
                debug!("Ignoring block from stale job {}", mined.job_id);
                continue;
            }
            self.miner = None;
            if self.add_block(mined.block)? == BlockStatus::Accepted {
                accepted += 1;
            } else {
                warn!("Unable to add generated block {}", mined.block.digest());
                self.start_block()?;
            }
        }
        Ok(accepted)
    }
}
